//! WAL Recovery
//!
//! Startup pass over every segment, run before any new writes.
//!
//! For each segment in epoch order, frames are validated one by one:
//! 1. Every length prefix must stay within the file (else: torn tail)
//! 2. The stored CRC-32C must match the payload (else: corruption)
//! 3. The payload must decode as a record (else: corruption)
//!
//! The first bad frame ends the scan of that segment. Under
//! `StrictTruncate` the last (active) segment is cut at that frame's start
//! offset; sealed segments are never rewritten. Every sidecar is then rebuilt
//! from the frames actually found.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::TailPolicy;
use crate::error::Result;
use crate::segment::{self, SegmentIndex};

use super::reader::{FrameRead, SegmentReader};
use super::record::WalRecord;

/// Why the scan of a segment ended early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// A declared length ran past the end of the file
    Torn,
    /// CRC mismatch or a structurally invalid frame
    Corrupt,
}

/// Where and why a segment scan stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStop {
    pub offset: u64,
    pub kind: StopKind,
}

/// Per-segment scan outcome
#[derive(Debug, Clone)]
pub struct SegmentScan {
    pub epoch: u64,
    pub path: PathBuf,
    pub records: u64,
    pub min_lsn: Option<u64>,
    pub max_lsn: Option<u64>,
    pub stop: Option<ScanStop>,
    pub truncated: bool,
}

/// Result of a recovery run
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Highest LSN among all valid frames
    pub highest_valid_lsn: Option<u64>,

    /// Segment that was truncated, if any
    pub tail_segment: Option<PathBuf>,

    /// Offset the tail segment was truncated at
    pub truncate_offset: Option<u64>,

    /// Sidecars rewritten from scanned frames
    pub rebuilt_indexes: Vec<PathBuf>,

    /// Per-segment details, in epoch order
    pub segments: Vec<SegmentScan>,
}

impl RecoveryReport {
    /// Total valid frames across all segments
    pub fn records_recovered(&self) -> u64 {
        self.segments.iter().map(|s| s.records).sum()
    }

    pub fn was_truncated(&self) -> bool {
        self.truncate_offset.is_some()
    }
}

/// Handles WAL recovery after a crash
pub struct RecoveryScanner;

impl RecoveryScanner {
    /// Scan, validate and (by policy) repair every segment under `root`
    pub fn recover(root: &Path, policy: TailPolicy) -> Result<RecoveryReport> {
        let segments = segment::list_segments(root)?;
        let mut report = RecoveryReport::default();

        let last = segments.len().saturating_sub(1);
        for (i, (epoch, path)) in segments.into_iter().enumerate() {
            let is_last = i == last;
            let scan = Self::scan_segment(epoch, &path, policy, is_last)?;

            if let Some(max) = scan.max_lsn {
                report.highest_valid_lsn = Some(report.highest_valid_lsn.map_or(max, |h| h.max(max)));
            }
            if scan.truncated {
                report.tail_segment = Some(path.clone());
                report.truncate_offset = scan.stop.map(|s| s.offset);
            }

            let mut index = SegmentIndex::new(epoch);
            index.min_lsn = scan.min_lsn;
            index.max_lsn = scan.max_lsn;
            index.record_count = scan.records;
            index.sealed = !is_last;
            index.store(&path)?;
            report.rebuilt_indexes.push(SegmentIndex::index_path_for(&path));

            report.segments.push(scan);
        }

        info!(
            root = %root.display(),
            segments = report.segments.len(),
            records = report.records_recovered(),
            highest_lsn = ?report.highest_valid_lsn,
            truncated_at = ?report.truncate_offset,
            "WAL recovery complete"
        );
        Ok(report)
    }

    /// Validate one segment without modifying anything
    pub fn verify(path: &Path) -> Result<SegmentScan> {
        let epoch = segment::parse_epoch(path).unwrap_or(0);
        Self::scan_segment(epoch, path, TailPolicy::SalvageContinue, false)
    }

    fn scan_segment(
        epoch: u64,
        path: &Path,
        policy: TailPolicy,
        truncate_allowed: bool,
    ) -> Result<SegmentScan> {
        let mut scan = SegmentScan {
            epoch,
            path: path.to_path_buf(),
            records: 0,
            min_lsn: None,
            max_lsn: None,
            stop: None,
            truncated: false,
        };

        let mut reader = SegmentReader::open(path)?;
        while let Some(read) = reader.next_frame()? {
            let stop = match read {
                FrameRead::Frame(frame) => {
                    if !frame.checksum_ok() {
                        debug!(epoch, offset = frame.start, lsn = frame.lsn, "CRC mismatch");
                        Some(ScanStop {
                            offset: frame.start,
                            kind: StopKind::Corrupt,
                        })
                    } else if let Err(e) = WalRecord::decode(&frame.payload) {
                        debug!(epoch, offset = frame.start, error = %e, "undecodable record");
                        Some(ScanStop {
                            offset: frame.start,
                            kind: StopKind::Corrupt,
                        })
                    } else {
                        scan.records += 1;
                        scan.min_lsn = Some(scan.min_lsn.map_or(frame.lsn, |m| m.min(frame.lsn)));
                        scan.max_lsn = Some(scan.max_lsn.map_or(frame.lsn, |m| m.max(frame.lsn)));
                        None
                    }
                }
                FrameRead::Torn { offset } => Some(ScanStop {
                    offset,
                    kind: StopKind::Torn,
                }),
                FrameRead::Malformed { offset, reason } => {
                    debug!(epoch, offset, %reason, "malformed frame");
                    Some(ScanStop {
                        offset,
                        kind: StopKind::Corrupt,
                    })
                }
            };

            if let Some(stop) = stop {
                scan.stop = Some(stop);
                break;
            }
        }
        drop(reader);

        if let Some(stop) = scan.stop {
            if policy == TailPolicy::StrictTruncate && truncate_allowed {
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(stop.offset)?;
                file.sync_all()?;
                scan.truncated = true;
                warn!(
                    segment = %path.display(),
                    offset = stop.offset,
                    kind = ?stop.kind,
                    "truncated WAL tail"
                );
            } else {
                warn!(
                    segment = %path.display(),
                    offset = stop.offset,
                    kind = ?stop.kind,
                    "stopped scanning segment at bad frame"
                );
            }
        }

        Ok(scan)
    }
}
