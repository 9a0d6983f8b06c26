//! Tests for the batch writer
//!
//! These tests verify:
//! - Count, size, time and explicit flush triggers
//! - Greedy packing of buffered events
//! - Oversized and invalid events
//! - Flush failures before and after an event is buffered
//! - End-to-end batching into a real spillover writer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use spillwal::wal::frame;
use spillwal::{
    BatchWriter, Config, EventFamily, FsyncPolicy, OpaqueEventAdapter, SequentialFramer,
    SpilloverWriter, StreamConsumer, StreamOptions, Streamer, WalError, WalRecord, WalWriter,
};
use tempfile::TempDir;

// =============================================================================
// Helper Types
// =============================================================================

/// In-memory writer that records every record it receives
#[derive(Default)]
struct MemoryWriter {
    records: Mutex<Vec<WalRecord>>,
    failing: AtomicBool,
}

impl MemoryWriter {
    fn batches(&self) -> Vec<Vec<Vec<u8>>> {
        self.records
            .lock()
            .iter()
            .map(|r| r.events().to_vec())
            .collect()
    }

    fn calls(&self) -> usize {
        self.records.lock().len()
    }
}

impl WalWriter for MemoryWriter {
    fn write(&self, record: &WalRecord) -> spillwal::Result<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WalError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        let mut records = self.records.lock();
        records.push(record.clone());
        Ok(records.len() as u64)
    }
}

fn config(max_batch: usize, max_record: u64, delay: Duration) -> Config {
    Config::builder()
        .max_batch_size(max_batch)
        .max_record_size(max_record)
        .flush_delay(delay)
        .build()
}

fn batch_writer(
    cfg: &Config,
) -> (
    BatchWriter<Vec<u8>, OpaqueEventAdapter, MemoryWriter>,
    Arc<MemoryWriter>,
) {
    let writer = Arc::new(MemoryWriter::default());
    let batch =
        BatchWriter::new(OpaqueEventAdapter::new(EventFamily::Logs), Arc::clone(&writer), cfg)
            .unwrap();
    (batch, writer)
}

/// Framed size of a record holding `n` events of `len` bytes each
fn record_size(n: usize, len: usize) -> u64 {
    frame::framed_len(12 + (n * (8 + len)) as u64)
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_rejects_zero_batch_size() {
    let writer = Arc::new(MemoryWriter::default());
    let result = BatchWriter::<Vec<u8>, _, _>::new(
        OpaqueEventAdapter::new(EventFamily::Logs),
        writer,
        &config(0, 1024, Duration::ZERO),
    );
    assert!(matches!(result, Err(WalError::Config(_))));
}

#[test]
fn test_rejects_record_size_below_overhead() {
    let writer = Arc::new(MemoryWriter::default());
    let result = BatchWriter::<Vec<u8>, _, _>::new(
        OpaqueEventAdapter::new(EventFamily::Logs),
        writer,
        &config(4, frame::FRAME_OVERHEAD, Duration::ZERO),
    );
    assert!(matches!(result, Err(WalError::Config(_))));
}

// =============================================================================
// Count Trigger Tests
// =============================================================================

#[test]
fn test_count_trigger_flushes_full_batches() {
    let (batch, writer) = batch_writer(&config(2, 1 << 20, Duration::ZERO));

    for e in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
        batch.consume(e).unwrap();
    }
    assert_eq!(writer.calls(), 1);
    assert_eq!(batch.pending(), 1);

    batch.close().unwrap();
    assert_eq!(
        writer.batches(),
        vec![vec![b"a".to_vec(), b"b".to_vec()], vec![b"c".to_vec()]]
    );
}

#[test]
fn test_explicit_flush() {
    let (batch, writer) = batch_writer(&config(10, 1 << 20, Duration::ZERO));

    batch.consume(b"one".to_vec()).unwrap();
    batch.consume(b"two".to_vec()).unwrap();
    assert_eq!(writer.calls(), 0);

    batch.flush().unwrap();
    assert_eq!(writer.batches(), vec![vec![b"one".to_vec(), b"two".to_vec()]]);
    assert_eq!(batch.pending(), 0);

    // Flushing an empty buffer writes nothing
    batch.flush().unwrap();
    assert_eq!(writer.calls(), 1);
}

// =============================================================================
// Size Trigger Tests
// =============================================================================

#[test]
fn test_size_trigger_flushes_before_overflow() {
    // Two 10-byte events fit, three do not
    let max = record_size(2, 10);
    let (batch, writer) = batch_writer(&config(100, max, Duration::ZERO));

    for i in 0..3u8 {
        batch.consume(vec![b'a' + i; 10]).unwrap();
    }

    assert_eq!(writer.calls(), 1);
    assert_eq!(writer.batches()[0].len(), 2);
    assert_eq!(batch.pending(), 1);
}

#[test]
fn test_records_never_exceed_max_size() {
    let max = record_size(3, 16);
    let (batch, writer) = batch_writer(&config(100, max, Duration::ZERO));

    for i in 0..20u8 {
        batch.consume(vec![i; 16]).unwrap();
    }
    batch.close().unwrap();

    let records = writer.records.lock();
    assert_eq!(records.iter().map(WalRecord::event_count).sum::<usize>(), 20);
    for record in records.iter() {
        assert!(frame::framed_len(record.serialized_size().unwrap()) <= max);
    }
}

#[test]
fn test_oversized_event_is_rejected_and_not_buffered() {
    let max = record_size(1, 64);
    let (batch, writer) = batch_writer(&config(10, max, Duration::ZERO));
    batch.consume(b"small".to_vec()).unwrap();

    let err = batch.consume(vec![0u8; 65]).unwrap_err();

    assert!(matches!(err, WalError::OversizedRecord { max: m, .. } if m == max));
    assert_eq!(batch.pending(), 1);
    assert_eq!(writer.calls(), 0);
}

#[test]
fn test_empty_event_is_invalid() {
    let (batch, _writer) = batch_writer(&config(10, 1 << 20, Duration::ZERO));
    assert!(matches!(
        batch.consume(Vec::new()),
        Err(WalError::InvalidEvent(_))
    ));
    assert_eq!(batch.pending(), 0);
}

// =============================================================================
// Time Trigger Tests
// =============================================================================

#[test]
fn test_time_trigger_flushes_idle_buffer() {
    let (batch, writer) = batch_writer(&config(100, 1 << 20, Duration::from_millis(50)));

    batch.consume(b"late".to_vec()).unwrap();
    assert_eq!(writer.calls(), 0);

    thread::sleep(Duration::from_millis(400));
    assert_eq!(writer.calls(), 1);
    assert_eq!(batch.pending(), 0);
}

#[test]
fn test_zero_delay_never_flushes_on_time() {
    let (batch, writer) = batch_writer(&config(100, 1 << 20, Duration::ZERO));

    batch.consume(b"waiting".to_vec()).unwrap();
    thread::sleep(Duration::from_millis(100));

    assert_eq!(writer.calls(), 0);
    assert_eq!(batch.pending(), 1);
}

#[test]
fn test_close_cancels_timer_and_flushes() {
    let (batch, writer) = batch_writer(&config(100, 1 << 20, Duration::from_millis(100)));

    batch.consume(b"x".to_vec()).unwrap();
    batch.close().unwrap();
    assert_eq!(writer.calls(), 1);

    thread::sleep(Duration::from_millis(250));
    assert_eq!(writer.calls(), 1);
    assert!(matches!(batch.consume(b"y".to_vec()), Err(WalError::WriterClosed)));
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_failed_flush_keeps_events_buffered() {
    let (batch, writer) = batch_writer(&config(2, 1 << 20, Duration::ZERO));
    writer.failing.store(true, Ordering::SeqCst);

    batch.consume(b"a".to_vec()).unwrap();
    assert!(batch.consume(b"b".to_vec()).is_err());
    assert_eq!(batch.pending(), 2);

    writer.failing.store(false, Ordering::SeqCst);
    batch.flush().unwrap();
    assert_eq!(writer.batches(), vec![vec![b"a".to_vec(), b"b".to_vec()]]);
}

#[test]
fn test_failed_size_flush_does_not_buffer_new_event() {
    // One 10-byte event per record
    let (batch, writer) = batch_writer(&config(100, record_size(1, 10), Duration::ZERO));
    batch.consume(vec![b'a'; 10]).unwrap();

    writer.failing.store(true, Ordering::SeqCst);
    assert!(batch.consume(vec![b'b'; 10]).is_err());
    assert_eq!(batch.pending(), 1);

    // Retrying the rejected event writes it exactly once
    writer.failing.store(false, Ordering::SeqCst);
    batch.consume(vec![b'b'; 10]).unwrap();
    batch.flush().unwrap();
    assert_eq!(
        writer.batches(),
        vec![vec![vec![b'a'; 10]], vec![vec![b'b'; 10]]]
    );
}

#[test]
fn test_failed_count_flush_does_not_buffer_new_event() {
    let (batch, writer) = batch_writer(&config(2, 1 << 20, Duration::ZERO));
    writer.failing.store(true, Ordering::SeqCst);

    batch.consume(b"a".to_vec()).unwrap();
    assert!(batch.consume(b"b".to_vec()).is_err());
    assert!(batch.consume(b"c".to_vec()).is_err());
    assert_eq!(batch.pending(), 2);

    writer.failing.store(false, Ordering::SeqCst);
    batch.consume(b"c".to_vec()).unwrap();
    batch.flush().unwrap();
    assert_eq!(
        writer.batches(),
        vec![vec![b"a".to_vec(), b"b".to_vec()], vec![b"c".to_vec()]]
    );
}

// =============================================================================
// Integration with Spillover Writer
// =============================================================================

#[derive(Default)]
struct Collector {
    events: Vec<Vec<u8>>,
    lsns: Vec<u64>,
}

impl StreamConsumer for Collector {
    fn last_applied_lsn(&self) -> Option<u64> {
        None
    }

    fn consume(&mut self, lsn: u64, record: WalRecord) -> Result<(), spillwal::CallbackError> {
        assert_eq!(record.family(), EventFamily::Traces);
        self.lsns.push(lsn);
        self.events.extend(record.into_events());
        Ok(())
    }
}

#[test]
fn test_batches_replay_in_order() {
    let temp = TempDir::new().unwrap();
    let cfg = Config::builder()
        .root_dir(temp.path())
        .max_segment_size(512)
        .fsync_policy(FsyncPolicy::EveryRecord)
        .max_batch_size(4)
        .build();
    let writer = Arc::new(SpilloverWriter::open(&cfg, SequentialFramer::new(), None).unwrap());
    let batch =
        BatchWriter::new(OpaqueEventAdapter::new(EventFamily::Traces), Arc::clone(&writer), &cfg)
            .unwrap();

    let sent: Vec<Vec<u8>> = (0..30).map(|i| format!("span-{i:03}").into_bytes()).collect();
    for e in &sent {
        batch.consume(e.clone()).unwrap();
    }
    batch.close().unwrap();
    writer.close().unwrap();

    let mut collector = Collector::default();
    Streamer::stream(temp.path(), &mut collector, &StreamOptions::default()).unwrap();

    assert_eq!(collector.events, sent);
    assert_eq!(collector.lsns, (1..=8).collect::<Vec<_>>());
}
