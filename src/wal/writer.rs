//! WAL Writer
//!
//! The append path: frames records into the active segment, rolls over to a
//! new segment when the active one is full, keeps the sidecar index current,
//! applies the fsync policy and notifies the commit listener.
//!
//! ```text
//!   no active segment ──open──▶ active ──full──▶ sealed + new active
//!                                  ▲                    │
//!                                  └────────────────────┘
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, FsyncPolicy};
use crate::error::{CallbackError, Result, WalError};
use crate::lock::ProcessLock;
use crate::segment::{SegmentAllocator, SegmentIndex};

use super::frame::{FrameWritten, Framer, SequentialFramer, LEN_PREFIX_SIZE};
use super::record::WalRecord;
use super::recovery::{RecoveryReport, RecoveryScanner};

/// Lock role held by a writer for its whole lifetime
pub const WRITER_ROLE: &str = "write";

/// Where a committed frame landed
#[derive(Debug, Clone, Copy)]
pub struct CommitContext<'a> {
    pub lsn: u64,
    pub crc32c: u32,
    pub segment: &'a Path,
    pub offset_before: u64,
    pub offset_after: u64,
    pub bytes_written: u64,
}

/// Synchronous hook run after each frame is appended (not necessarily after
/// fsync).
///
/// Runs inside the writer's critical section: it must be fast, must never
/// call back into the writer, and must be idempotent per LSN because
/// recovery may redeliver the same commit later.
pub trait CommitListener: Send + Sync {
    fn on_commit(&self, ctx: &CommitContext<'_>) -> std::result::Result<(), CallbackError>;
}

/// Anything that durably accepts WAL records
pub trait WalWriter: Send + Sync {
    /// Append one record, returning its LSN
    fn write(&self, record: &WalRecord) -> Result<u64>;
}

/// Segmenting WAL writer
///
/// ## Concurrency:
/// - All mutation happens under one `Mutex`; concurrent producers are
///   serialized at the append path
pub struct SpilloverWriter<F: Framer> {
    allocator: SegmentAllocator,
    framer: F,
    max_segment_size: u64,
    fsync_policy: FsyncPolicy,
    listener: Option<Arc<dyn CommitListener>>,
    state: Mutex<WriterState>,
}

struct WriterState {
    /// `None` once the writer is closed
    active: Option<ActiveSegment>,
    lock: Option<ProcessLock>,
    bytes_since_force: u64,
    last_force: Instant,
}

struct ActiveSegment {
    file: File,
    path: PathBuf,
    written: u64,
    index: SegmentIndex,
}

impl ActiveSegment {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        let mut index = SegmentIndex::load_or_new(path)?;
        index.sealed = false;
        index.store(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            written,
            index,
        })
    }
}

fn acquire_writer_lock(root: &Path) -> Result<ProcessLock> {
    let info = [
        ("role", WRITER_ROLE.to_string()),
        ("pid", process::id().to_string()),
        (
            "thread",
            thread::current().name().unwrap_or("unnamed").to_string(),
        ),
        ("started_at", crate::segment::now_millis().to_string()),
    ];
    ProcessLock::acquire(root, WRITER_ROLE, &info)
}

impl<F: Framer> SpilloverWriter<F> {
    /// Open the writer for `config.root_dir`
    ///
    /// On startup:
    /// 1. Acquire the writer process lock (fails if another writer holds it)
    /// 2. Resume at the highest segment, or create the first one
    /// 3. Mark the active segment's sidecar unsealed
    pub fn open(
        config: &Config,
        framer: F,
        listener: Option<Arc<dyn CommitListener>>,
    ) -> Result<Self> {
        let lock = acquire_writer_lock(&config.root_dir)?;
        Self::open_locked(config, framer, listener, lock)
    }

    fn open_locked(
        config: &Config,
        framer: F,
        listener: Option<Arc<dyn CommitListener>>,
        lock: ProcessLock,
    ) -> Result<Self> {
        let allocator = SegmentAllocator::open(&config.root_dir)?;
        let active = ActiveSegment::open(&allocator.active())?;
        info!(
            segment = %active.path.display(),
            offset = active.written,
            "WAL writer opened"
        );

        Ok(Self {
            allocator,
            framer,
            max_segment_size: config.max_segment_size,
            fsync_policy: config.fsync_policy,
            listener,
            state: Mutex::new(WriterState {
                active: Some(active),
                lock: Some(lock),
                bytes_since_force: 0,
                last_force: Instant::now(),
            }),
        })
    }

    /// Append one record
    pub fn append(&self, record: &WalRecord) -> Result<FrameWritten> {
        let payload = record.encode()?;
        self.write_payload(&payload)
    }

    /// Append one already-encoded payload as a frame
    pub fn write_payload(&self, payload: &[u8]) -> Result<FrameWritten> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let conservative =
            self.framer.per_record_overhead() + LEN_PREFIX_SIZE + payload.len() as u64;
        let written = state.active.as_ref().ok_or(WalError::WriterClosed)?.written;
        if written > 0 && written + conservative > self.max_segment_size {
            self.roll_over(state)?;
        }

        let active = state.active.as_mut().ok_or(WalError::WriterClosed)?;
        let offset_before = active.written;
        let res = match self.framer.write_framed(&mut active.file, payload) {
            Ok(res) => res,
            Err(e) => {
                // Cut any partial frame so the segment ends on a frame boundary
                match active.file.set_len(offset_before) {
                    Ok(()) => active.written = offset_before,
                    Err(trunc) => {
                        warn!(
                            segment = %active.path.display(),
                            offset = offset_before,
                            error = %trunc,
                            "failed to cut partial frame"
                        );
                        if let Ok(meta) = active.file.metadata() {
                            active.written = meta.len();
                        }
                    }
                }
                return Err(e);
            }
        };
        let offset_after = offset_before + res.bytes_written;
        active.written = offset_after;

        active.index.observe(res.lsn);
        active.index.store(&active.path)?;

        state.bytes_since_force += res.bytes_written;
        self.maybe_force(state)?;

        if let Some(listener) = &self.listener {
            let segment = state
                .active
                .as_ref()
                .map(|a| a.path.as_path())
                .ok_or(WalError::WriterClosed)?;
            let ctx = CommitContext {
                lsn: res.lsn,
                crc32c: res.crc32c,
                segment,
                offset_before,
                offset_after,
                bytes_written: res.bytes_written,
            };
            listener
                .on_commit(&ctx)
                .map_err(|source| WalError::CommitListener {
                    lsn: res.lsn,
                    source,
                })?;
        }

        Ok(res)
    }

    /// Force appended bytes to stable storage
    pub fn force(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let active = state.active.as_ref().ok_or(WalError::WriterClosed)?;
        active.file.sync_data()?;
        state.bytes_since_force = 0;
        state.last_force = Instant::now();
        Ok(())
    }

    /// Close the active segment and release the writer lock; idempotent
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(active) = state.active.take() {
            if self.fsync_policy != FsyncPolicy::Manual {
                active.file.sync_data()?;
            }
            debug!(segment = %active.path.display(), "closed active segment");
        }
        if let Some(mut lock) = state.lock.take() {
            lock.release()?;
        }
        Ok(())
    }

    /// Path of the active segment, `None` once closed
    pub fn active_segment(&self) -> Option<PathBuf> {
        self.state.lock().active.as_ref().map(|a| a.path.clone())
    }

    /// Bytes in the active segment
    pub fn written_in_segment(&self) -> u64 {
        self.state.lock().active.as_ref().map_or(0, |a| a.written)
    }

    /// Bytes appended since the last sync to disk
    pub fn bytes_since_force(&self) -> u64 {
        self.state.lock().bytes_since_force
    }

    pub fn framer(&self) -> &F {
        &self.framer
    }

    pub fn root(&self) -> &Path {
        self.allocator.root()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Seal the active segment and switch to a freshly allocated one
    fn roll_over(&self, state: &mut WriterState) -> Result<()> {
        let active = state.active.as_mut().ok_or(WalError::WriterClosed)?;
        if self.fsync_policy != FsyncPolicy::Manual {
            active.file.sync_data()?;
            state.bytes_since_force = 0;
            state.last_force = Instant::now();
        }
        active.index.sealed = true;
        active.index.store(&active.path)?;
        let sealed_epoch = active.index.epoch;

        let next = self.allocator.allocate()?;
        state.active = Some(ActiveSegment::open(&next)?);
        debug!(sealed_epoch, next = %next.display(), "rolled over to new segment");
        Ok(())
    }

    fn maybe_force(&self, state: &mut WriterState) -> Result<()> {
        let due = match self.fsync_policy {
            FsyncPolicy::EveryRecord => true,
            FsyncPolicy::Bytes { threshold } => {
                threshold > 0 && state.bytes_since_force >= threshold
            }
            FsyncPolicy::Interval { every } => {
                !every.is_zero() && state.last_force.elapsed() >= every
            }
            FsyncPolicy::Manual => false,
        };
        if due {
            if let Some(active) = &state.active {
                active.file.sync_data()?;
            }
            state.bytes_since_force = 0;
            state.last_force = Instant::now();
        }
        Ok(())
    }
}

impl SpilloverWriter<SequentialFramer> {
    /// Startup sequence for a writer that owns LSN assignment
    ///
    /// Takes the writer lock, runs recovery under it with
    /// `config.tail_policy`, then opens a writer whose LSNs continue after
    /// the highest valid one.
    pub fn recover_and_open(
        config: &Config,
        listener: Option<Arc<dyn CommitListener>>,
    ) -> Result<(Self, RecoveryReport)> {
        let lock = acquire_writer_lock(&config.root_dir)?;
        let report = RecoveryScanner::recover(&config.root_dir, config.tail_policy)?;
        let framer = SequentialFramer::resume_after(report.highest_valid_lsn.unwrap_or(0));
        let writer = Self::open_locked(config, framer, listener, lock)?;
        Ok((writer, report))
    }
}

impl<F: Framer> WalWriter for SpilloverWriter<F> {
    fn write(&self, record: &WalRecord) -> Result<u64> {
        Ok(self.append(record)?.lsn)
    }
}
