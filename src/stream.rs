//! WAL Streamer
//!
//! Replays committed records to an idempotent consumer, strictly in LSN
//! order, starting after the consumer's last applied LSN.
//!
//! ## Steps
//! 1. Start bound = `consumer.last_applied_lsn()`
//! 2. Optionally run recovery first
//! 3. Upper bound = `up_to_lsn`, or the persisted watermark when fenced
//! 4. Read fence: capture every segment's size once; bytes appended later
//!    are not part of this run
//! 5. Replay frames across segments in epoch order
//! 6. `consumer.flush()` once the run completes

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::TailPolicy;
use crate::error::{CallbackError, Result, WalError};
use crate::persisted::PersistedLsnStore;
use crate::segment::{self, SegmentIndex};
use crate::wal::{FrameRead, RecoveryScanner, SegmentReader, WalRecord};

/// Receives replayed records
pub trait StreamConsumer {
    /// Highest LSN already applied; `None` if nothing has been applied
    fn last_applied_lsn(&self) -> Option<u64>;

    /// Apply one record. Must be idempotent per LSN.
    fn consume(&mut self, lsn: u64, record: WalRecord) -> std::result::Result<(), CallbackError>;

    /// Called once after a successful run
    fn flush(&mut self) -> std::result::Result<(), CallbackError> {
        Ok(())
    }
}

/// Options for one streaming run
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Run recovery before streaming
    pub run_recovery: bool,

    /// Tail policy used when `run_recovery` is set
    pub tail_policy: TailPolicy,

    /// Verify each frame's CRC before delivering it
    pub verify_crc: bool,

    /// Stop at the persisted watermark (ignored when `up_to_lsn` is set)
    pub fence_to_persisted_lsn: bool,

    /// Explicit inclusive upper bound
    pub up_to_lsn: Option<u64>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            run_recovery: false,
            tail_policy: TailPolicy::StrictTruncate,
            verify_crc: true,
            fence_to_persisted_lsn: false,
            up_to_lsn: None,
        }
    }
}

/// Result of a streaming run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub records_delivered: u64,
    pub last_delivered_lsn: Option<u64>,
    pub segments_visited: usize,
}

/// Segment as captured at fence time
struct SegmentView {
    path: PathBuf,
    size_fence: u64,
    max_lsn: Option<u64>,
}

/// Replays WAL records to consumers
pub struct Streamer;

impl Streamer {
    /// Stream everything after `consumer.last_applied_lsn()`, then flush the
    /// consumer
    pub fn stream<C: StreamConsumer + ?Sized>(
        root: &Path,
        consumer: &mut C,
        options: &StreamOptions,
    ) -> Result<StreamReport> {
        let start_after = consumer.last_applied_lsn();
        let report = Self::stream_from(root, start_after, consumer, options)?;
        consumer.flush().map_err(|source| WalError::Consumer {
            lsn: report.last_delivered_lsn,
            source,
        })?;
        info!(
            delivered = report.records_delivered,
            last_lsn = ?report.last_delivered_lsn,
            segments = report.segments_visited,
            "WAL stream complete"
        );
        Ok(report)
    }

    /// Stream records with LSN > `start_after` (all records if `None`)
    pub fn stream_from<C: StreamConsumer + ?Sized>(
        root: &Path,
        start_after: Option<u64>,
        consumer: &mut C,
        options: &StreamOptions,
    ) -> Result<StreamReport> {
        if options.run_recovery {
            RecoveryScanner::recover(root, options.tail_policy)?;
        }

        let upper = match options.up_to_lsn {
            Some(lsn) => Some(lsn),
            None if options.fence_to_persisted_lsn => PersistedLsnStore::open(root).read()?,
            None => None,
        };

        let views = Self::snapshot_segments(root)?;
        let mut report = StreamReport::default();
        let below_start = |lsn: u64| start_after.is_some_and(|start| lsn <= start);

        for view in views {
            if view.max_lsn.is_some_and(below_start) {
                continue;
            }
            report.segments_visited += 1;

            let mut reader = SegmentReader::open_fenced(&view.path, view.size_fence)?;
            while let Some(read) = reader.next_frame()? {
                let frame = match read {
                    FrameRead::Frame(frame) => frame,
                    FrameRead::Torn { offset } => {
                        warn!(segment = %view.path.display(), offset, "torn frame at read fence");
                        break;
                    }
                    FrameRead::Malformed { offset, reason } => {
                        return Err(WalError::Corruption {
                            path: view.path.clone(),
                            offset,
                            reason,
                        });
                    }
                };

                if options.verify_crc && !frame.checksum_ok() {
                    return Err(WalError::ChecksumMismatch {
                        path: view.path.clone(),
                        offset: frame.start,
                        stored: frame.crc32c,
                        computed: frame.computed_crc(),
                    });
                }

                if below_start(frame.lsn) {
                    continue;
                }
                if upper.is_some_and(|upper| frame.lsn > upper) {
                    debug!(lsn = frame.lsn, ?upper, "reached upper bound");
                    return Ok(report);
                }

                let record = WalRecord::decode(&frame.payload).map_err(|e| WalError::Corruption {
                    path: view.path.clone(),
                    offset: frame.start,
                    reason: format!("invalid record: {e}"),
                })?;

                consumer
                    .consume(frame.lsn, record)
                    .map_err(|source| WalError::Consumer {
                        lsn: Some(frame.lsn),
                        source,
                    })?;

                report.records_delivered += 1;
                report.last_delivered_lsn = Some(frame.lsn);
            }
        }

        Ok(report)
    }

    /// Capture every segment's size and sidecar max LSN, in epoch order
    fn snapshot_segments(root: &Path) -> Result<Vec<SegmentView>> {
        let mut views = Vec::new();
        for (_, path) in segment::list_segments(root)? {
            let size_fence = path.metadata()?.len();
            let max_lsn = SegmentIndex::load_or_new(&path)?.max_lsn;
            views.push(SegmentView {
                path,
                size_fence,
                max_lsn,
            });
        }
        Ok(views)
    }
}
