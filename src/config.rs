//! Configuration for spillwal
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a WAL root directory
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all WAL files
    /// Internal structure:
    ///   {root_dir}/
    ///     ├── wal_0000000001.segment       (sealed segment)
    ///     ├── wal_0000000001.segment.idx   (its sidecar index)
    ///     ├── wal_0000000002.segment       (active segment)
    ///     ├── wal_0000000002.segment.idx
    ///     ├── persisted.lsn                (external watermark)
    ///     ├── write.lock / cleaner.lock    (process locks)
    ///     └── .wal_trash/{millis}/         (segments pending purge)
    pub root_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Writer Configuration
    // -------------------------------------------------------------------------
    /// Roll over to a new segment before a write would push the active one
    /// past this many bytes
    pub max_segment_size: u64,

    /// When the writer forces appended bytes to stable storage
    pub fsync_policy: FsyncPolicy,

    // -------------------------------------------------------------------------
    // Batch Configuration
    // -------------------------------------------------------------------------
    /// Max number of events folded into one WAL record
    pub max_batch_size: usize,

    /// Max framed size (bytes) of one WAL record
    pub max_record_size: u64,

    /// How long a partially filled batch may wait before it is flushed.
    /// `Duration::ZERO` disables the timer; flushes are then only triggered
    /// by thresholds or explicit calls.
    pub flush_delay: Duration,

    // -------------------------------------------------------------------------
    // Recovery Configuration
    // -------------------------------------------------------------------------
    /// What recovery does with a torn or corrupt frame on the active segment
    pub tail_policy: TailPolicy,

    // -------------------------------------------------------------------------
    // Cleaner Configuration
    // -------------------------------------------------------------------------
    /// How long trashed segments linger before being purged
    pub grace_period: Duration,

    /// Number of newest deletable sealed segments kept anyway
    pub keep_last_sealed: usize,

    /// Run cleaner selection without touching the filesystem
    pub dry_run: bool,
}

/// WAL fsync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync after every record (safest, slowest)
    EveryRecord,

    /// fsync once at least `threshold` unforced bytes have accumulated
    Bytes { threshold: u64 },

    /// fsync once `every` has elapsed since the last force
    Interval { every: Duration },

    /// Never fsync internally; the owner calls `force()`
    Manual,
}

/// How recovery treats the first bad frame of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailPolicy {
    /// Truncate the active segment at the start of the bad frame
    #[default]
    StrictTruncate,

    /// Stop reading that segment but leave its bytes in place
    SalvageContinue,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./spillwal_data"),
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            fsync_policy: FsyncPolicy::Bytes {
                threshold: 1024 * 1024,
            },
            max_batch_size: 512,
            max_record_size: 4 * 1024 * 1024, // 4 MB
            flush_delay: Duration::ZERO,
            tail_policy: TailPolicy::StrictTruncate,
            grace_period: Duration::from_secs(10 * 60),
            keep_last_sealed: 1,
            dry_run: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the WAL root directory
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Set the max segment size (in bytes)
    pub fn max_segment_size(mut self, bytes: u64) -> Self {
        self.config.max_segment_size = bytes;
        self
    }

    /// Set the fsync policy
    pub fn fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.config.fsync_policy = policy;
        self
    }

    /// Set the max number of events per record
    pub fn max_batch_size(mut self, count: usize) -> Self {
        self.config.max_batch_size = count;
        self
    }

    /// Set the max framed record size (in bytes)
    pub fn max_record_size(mut self, bytes: u64) -> Self {
        self.config.max_record_size = bytes;
        self
    }

    /// Set the batch flush delay
    pub fn flush_delay(mut self, delay: Duration) -> Self {
        self.config.flush_delay = delay;
        self
    }

    /// Set the recovery tail policy
    pub fn tail_policy(mut self, policy: TailPolicy) -> Self {
        self.config.tail_policy = policy;
        self
    }

    /// Set the cleaner grace period
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period = grace;
        self
    }

    /// Set how many deletable sealed segments the cleaner keeps
    pub fn keep_last_sealed(mut self, count: usize) -> Self {
        self.config.keep_last_sealed = count;
        self
    }

    /// Enable or disable cleaner dry-run
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
