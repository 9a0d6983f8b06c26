//! WAL Cleaner
//!
//! Deletes sealed segments whose every frame is covered by the persisted
//! watermark. Deletion is two-phase:
//!
//! ```text
//!   wal_N.segment (+ .idx) ──move──▶ .wal_trash/{millis}/ ──grace──▶ purged
//! ```
//!
//! The newest `keep_last_sealed` eligible segments are retained as a
//! cushion. The cleaner holds its own process lock and only touches sealed
//! segments at or below the watermark, so it can run beside a live writer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::lock::ProcessLock;
use crate::persisted::PersistedLsnStore;
use crate::segment::{self, SegmentIndex};

/// Lock role held for the duration of a sweep
pub const CLEANER_ROLE: &str = "cleaner";

/// Trash directory under the WAL root
pub const TRASH_DIR: &str = ".wal_trash";

/// Source of wall-clock time in epoch millis
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        segment::now_millis()
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    /// Watermark the sweep ran against; `None` means nothing was eligible
    pub persisted_lsn: Option<u64>,

    /// Segments moved to trash (or, in dry-run, that would have been)
    pub selected: Vec<PathBuf>,

    /// Trash batch directory used by this sweep
    pub trash_batch: Option<PathBuf>,

    /// Trash batch directories purged by this sweep
    pub purged: Vec<PathBuf>,
}

struct SegmentView {
    epoch: u64,
    segment_path: PathBuf,
    index_path: PathBuf,
    max_lsn: Option<u64>,
    sealed: bool,
}

/// Watermark-driven segment cleaner
pub struct WalCleaner {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    grace_period: Duration,
    keep_last_sealed: usize,
    dry_run: bool,
}

impl WalCleaner {
    /// Cleaner for `config.root_dir` using the system clock
    pub fn new(config: &Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: config.root_dir.clone(),
            clock,
            grace_period: config.grace_period,
            keep_last_sealed: config.keep_last_sealed,
            dry_run: config.dry_run,
        }
    }

    /// Run one sweep
    pub fn run(&self) -> Result<CleanReport> {
        let info = [
            ("role", CLEANER_ROLE.to_string()),
            ("pid", std::process::id().to_string()),
            ("started_at", self.clock.now_millis().to_string()),
        ];
        let mut lock = ProcessLock::acquire(&self.root, CLEANER_ROLE, &info)?;
        let report = self.sweep();
        lock.release()?;
        report
    }

    fn sweep(&self) -> Result<CleanReport> {
        let mut report = CleanReport::default();

        let Some(persisted) = PersistedLsnStore::open(&self.root).read()? else {
            debug!("no persisted LSN yet, nothing to clean");
            return Ok(report);
        };
        report.persisted_lsn = Some(persisted);

        let mut eligible: Vec<SegmentView> = self
            .list_segments()?
            .into_iter()
            .filter(|s| s.sealed && s.max_lsn.is_some_and(|max| max <= persisted))
            .collect();
        eligible.sort_by_key(|s| s.epoch);
        let deletable = eligible.len().saturating_sub(self.keep_last_sealed);
        eligible.truncate(deletable);

        report.selected = eligible.iter().map(|s| s.segment_path.clone()).collect();

        if self.dry_run {
            info!(
                persisted_lsn = persisted,
                would_trash = ?report.selected,
                "dry run: no segments moved"
            );
            return Ok(report);
        }

        if !eligible.is_empty() {
            let batch_dir = self
                .root
                .join(TRASH_DIR)
                .join(self.clock.now_millis().to_string());
            fs::create_dir_all(&batch_dir)?;

            for s in &eligible {
                move_file(&s.segment_path, &batch_dir)?;
                if s.index_path.exists() {
                    move_file(&s.index_path, &batch_dir)?;
                }
            }
            info!(
                persisted_lsn = persisted,
                segments = eligible.len(),
                trash = %batch_dir.display(),
                "moved covered segments to trash"
            );
            report.trash_batch = Some(batch_dir);
        }

        report.purged = self.purge_old_trash()?;
        Ok(report)
    }

    /// Delete trash batches older than the grace period
    fn purge_old_trash(&self) -> Result<Vec<PathBuf>> {
        let trash_root = self.root.join(TRASH_DIR);
        if !trash_root.is_dir() {
            return Ok(Vec::new());
        }

        let grace = self.grace_period.as_millis() as u64;
        let cutoff = self.clock.now_millis().saturating_sub(grace);
        let mut purged = Vec::new();

        for entry in fs::read_dir(&trash_root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let created = match path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u64>().ok())
            {
                Some(millis) => millis,
                None => modified_millis(&path)?,
            };
            if grace == 0 || created < cutoff {
                fs::remove_dir_all(&path)?;
                debug!(batch = %path.display(), "purged trash batch");
                purged.push(path);
            }
        }

        if fs::read_dir(&trash_root)?.next().is_none() {
            fs::remove_dir(&trash_root)?;
        }
        Ok(purged)
    }

    fn list_segments(&self) -> Result<Vec<SegmentView>> {
        let mut out = Vec::new();
        for (epoch, path) in segment::list_segments(&self.root)? {
            let index = SegmentIndex::load_or_new(&path)?;
            out.push(SegmentView {
                epoch,
                index_path: SegmentIndex::index_path_for(&path),
                segment_path: path,
                max_lsn: index.max_lsn,
                sealed: index.sealed,
            });
        }
        Ok(out)
    }
}

/// Move `src` into `dir`: atomic rename, or copy + remove when the rename
/// crosses filesystems
fn move_file(src: &Path, dir: &Path) -> Result<()> {
    let Some(name) = src.file_name() else {
        return Ok(());
    };
    let target = dir.join(name);
    match fs::rename(src, &target) {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
            Err(e.into())
        }
        Err(_) => {
            fs::copy(src, &target)?;
            fs::remove_file(src)?;
            Ok(())
        }
    }
}

fn modified_millis(path: &Path) -> Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}
