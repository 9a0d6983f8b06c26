//! Batch Writer Module
//!
//! Buffers typed events and decides when to turn them into WAL records.
//!
//! ## Flush triggers
//! - **Count**: the buffer reaches `max_batch_size` events
//! - **Size**: adding an event would push the encoded record past
//!   `max_record_size`
//! - **Time**: `flush_delay` passes without a new event
//! - **Explicit**: `flush()` / `close()`
//!
//! A flush packs records greedily: each record takes as many buffered events
//! as fit under both caps, so one flush may emit several records.
//!
//! ## Concurrency
//! Buffer access, inline flushes and timer flushes all run under one mutex.
//! A timer flush only proceeds if no event re-armed the timer after it was
//! scheduled.

mod adapter;
mod timer;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::{Result, WalError};
use crate::wal::frame::{self, FRAME_OVERHEAD};
use crate::wal::{WalRecord, WalWriter};

pub use adapter::{OpaqueEventAdapter, RecordAdapter};

use timer::FlushTimer;

/// Groups events into size/count/time bounded WAL records
pub struct BatchWriter<E, A, W>
where
    E: Send + 'static,
    A: RecordAdapter<E> + 'static,
    W: WalWriter + 'static,
{
    inner: Arc<Inner<E, A, W>>,
    flush_delay: Duration,
    timer: Mutex<Option<FlushTimer>>,
}

struct Inner<E, A, W> {
    adapter: A,
    writer: Arc<W>,
    max_batch_size: usize,
    max_record_size: u64,
    state: Mutex<BatchState<E>>,
}

struct BatchState<E> {
    buffer: Vec<E>,
    /// Generation of the currently armed timer
    armed: Option<u64>,
    next_generation: u64,
    closed: bool,
}

impl<E, A, W> BatchWriter<E, A, W>
where
    E: Send + 'static,
    A: RecordAdapter<E> + 'static,
    W: WalWriter + 'static,
{
    /// Create a batch writer in front of `writer`
    pub fn new(adapter: A, writer: Arc<W>, config: &Config) -> Result<Self> {
        if config.max_batch_size == 0 {
            return Err(WalError::Config("max_batch_size must be > 0".to_string()));
        }
        if config.max_record_size <= FRAME_OVERHEAD {
            return Err(WalError::Config(format!(
                "max_record_size must exceed the {FRAME_OVERHEAD}-byte frame overhead"
            )));
        }

        let inner = Arc::new(Inner {
            adapter,
            writer,
            max_batch_size: config.max_batch_size,
            max_record_size: config.max_record_size,
            state: Mutex::new(BatchState {
                buffer: Vec::new(),
                armed: None,
                next_generation: 0,
                closed: false,
            }),
        });

        let timer = if config.flush_delay.is_zero() {
            None
        } else {
            let fired = Arc::clone(&inner);
            Some(FlushTimer::spawn(move |generation| fired.on_timer(generation))?)
        };

        Ok(Self {
            inner,
            flush_delay: config.flush_delay,
            timer: Mutex::new(timer),
        })
    }

    /// Buffer one event, flushing as thresholds require.
    ///
    /// An event that cannot fit in a record even on its own fails with
    /// `WalError::OversizedRecord` and is not buffered. If the flush that
    /// makes room for the event fails, the event is not buffered and may be
    /// retried. If the flush after buffering it fails, the event stays
    /// buffered for the next flush.
    pub fn consume(&self, event: E) -> Result<()> {
        let inner = &self.inner;
        inner.adapter.validate(&event)?;

        let single = inner.adapter.build_record(std::slice::from_ref(&event))?;
        let size = inner.encoded_size(&single)?;
        if size > inner.max_record_size {
            return Err(WalError::OversizedRecord {
                size,
                max: inner.max_record_size,
            });
        }

        let mut state = inner.state.lock();
        if state.closed {
            return Err(WalError::WriterClosed);
        }

        if state.buffer.len() + 1 > inner.max_batch_size {
            inner.flush_locked(&mut state)?;
        }

        state.buffer.push(event);
        if state.buffer.len() > 1 {
            let candidate = inner
                .adapter
                .build_record(&state.buffer)
                .and_then(|record| inner.encoded_size(&record));
            let candidate_size = match candidate {
                Ok(size) => size,
                Err(e) => {
                    state.buffer.pop();
                    return Err(e);
                }
            };
            if candidate_size > inner.max_record_size {
                if let Some(event) = state.buffer.pop() {
                    inner.flush_locked(&mut state)?;
                    state.buffer.push(event);
                }
            }
        }

        if state.buffer.len() >= inner.max_batch_size {
            inner.flush_locked(&mut state)
        } else {
            self.arm_timer(&mut state);
            Ok(())
        }
    }

    /// Write everything buffered
    pub fn flush(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.inner.flush_locked(&mut state)
    }

    /// Cancel the pending timer, flush, and stop accepting events
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.armed = None;
            if let Some(timer) = self.timer.lock().as_ref() {
                timer.cancel();
            }
            self.inner.flush_locked(&mut state)?;
        }
        if let Some(mut timer) = self.timer.lock().take() {
            timer.shutdown();
        }
        Ok(())
    }

    /// Number of buffered events
    pub fn pending(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn writer(&self) -> &Arc<W> {
        &self.inner.writer
    }

    /// (Re)arm the flush timer; each call supersedes the previous deadline
    fn arm_timer(&self, state: &mut BatchState<E>) {
        let timer = self.timer.lock();
        if let Some(timer) = timer.as_ref() {
            state.next_generation += 1;
            state.armed = Some(state.next_generation);
            timer.arm(state.next_generation, Instant::now() + self.flush_delay);
        }
    }
}

impl<E, A, W> Inner<E, A, W>
where
    A: RecordAdapter<E>,
    W: WalWriter,
{
    fn encoded_size(&self, record: &WalRecord) -> Result<u64> {
        Ok(frame::framed_len(record.serialized_size()?))
    }

    /// Greedily pack the buffer into records and write them.
    ///
    /// Events leave the buffer only once their record is written.
    fn flush_locked(&self, state: &mut BatchState<E>) -> Result<()> {
        let mut records = 0usize;
        while !state.buffer.is_empty() {
            let window = state.buffer.len().min(self.max_batch_size);

            let mut best: Option<(usize, WalRecord)> = None;
            for end in 1..=window {
                let candidate = self.adapter.build_record(&state.buffer[..end])?;
                if self.encoded_size(&candidate)? <= self.max_record_size {
                    best = Some((end, candidate));
                } else {
                    break;
                }
            }

            let Some((end, record)) = best else {
                let single = self.adapter.build_record(&state.buffer[..1])?;
                return Err(WalError::OversizedRecord {
                    size: self.encoded_size(&single)?,
                    max: self.max_record_size,
                });
            };

            self.writer.write(&record)?;
            state.buffer.drain(..end);
            records += 1;
        }

        state.armed = None;
        if records > 0 {
            debug!(records, "flushed batch");
        }
        Ok(())
    }

    fn on_timer(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.armed != Some(generation) {
            return;
        }
        state.armed = None;
        if let Err(e) = self.flush_locked(&mut state) {
            error!(error = %e, pending = state.buffer.len(), "timed batch flush failed");
        }
    }
}

impl<E, A, W> Drop for BatchWriter<E, A, W>
where
    E: Send + 'static,
    A: RecordAdapter<E> + 'static,
    W: WalWriter + 'static,
{
    fn drop(&mut self) {
        if let Some(mut timer) = self.timer.lock().take() {
            timer.shutdown();
        }
    }
}
