//! Flush timer
//!
//! One background thread per batch writer. Each arm carries a generation;
//! re-arming replaces the pending deadline, and the callback receives the
//! generation that fired so the owner can ignore stale deadlines.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Sender};

enum TimerCommand {
    Arm { generation: u64, deadline: Instant },
    Cancel,
}

pub(crate) struct FlushTimer {
    tx: Option<Sender<TimerCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Spawn the timer thread; `on_fire` runs on it
    pub(crate) fn spawn<F>(on_fire: F) -> io::Result<Self>
    where
        F: Fn(u64) + Send + 'static,
    {
        let (tx, rx) = channel::unbounded::<TimerCommand>();
        let handle = thread::Builder::new()
            .name("spillwal-flush-timer".to_string())
            .spawn(move || {
                let mut pending: Option<(u64, Instant)> = None;
                loop {
                    let timeout = match pending {
                        Some((_, deadline)) => channel::at(deadline),
                        None => channel::never(),
                    };
                    crossbeam::select! {
                        recv(rx) -> msg => match msg {
                            Ok(TimerCommand::Arm { generation, deadline }) => {
                                pending = Some((generation, deadline));
                            }
                            Ok(TimerCommand::Cancel) => pending = None,
                            Err(_) => break,
                        },
                        recv(timeout) -> _ => {
                            if let Some((generation, _)) = pending.take() {
                                on_fire(generation);
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub(crate) fn arm(&self, generation: u64, deadline: Instant) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(TimerCommand::Arm {
                generation,
                deadline,
            });
        }
    }

    pub(crate) fn cancel(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(TimerCommand::Cancel);
        }
    }

    /// Stop the thread and wait for it
    pub(crate) fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
