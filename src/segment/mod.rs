//! Segment Module
//!
//! Segments are append-only files of frames, identified by a monotonically
//! increasing epoch.
//!
//! ## Responsibilities
//! - Name segment files and parse epochs back out of them
//! - Discover existing segments in epoch order
//! - Allocate the next segment on rollover
//! - Persist per-segment sidecar indexes
//!
//! ## Naming
//! ```text
//! wal_0000000001.segment        segment, epoch zero-padded to 10 digits
//! wal_0000000001.segment.idx    its sidecar index
//! ```

mod allocator;
mod index;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use allocator::SegmentAllocator;
pub use index::{SegmentIndex, INDEX_SUFFIX};
pub(crate) use index::now_millis;

const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_SUFFIX: &str = ".segment";
const EPOCH_DIGITS: usize = 10;

/// File name of the segment with the given epoch
/// 42 → "wal_0000000042.segment"
pub fn segment_file_name(epoch: u64) -> String {
    format!("{SEGMENT_PREFIX}{epoch:010}{SEGMENT_SUFFIX}")
}

/// Full path of the segment with the given epoch
pub fn segment_path(root: &Path, epoch: u64) -> PathBuf {
    root.join(segment_file_name(epoch))
}

/// Parse the epoch from a segment path
/// "wal_0000000042.segment" → Some(42); anything else → None
pub fn parse_epoch(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let digits = name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?;
    if digits.len() != EPOCH_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List segments under `root` as (epoch, path), ordered by epoch.
///
/// A missing root directory holds no segments.
pub fn list_segments(root: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(epoch) = parse_epoch(&path) {
            segments.push((epoch, path));
        }
    }
    segments.sort_by_key(|(epoch, _)| *epoch);
    Ok(segments)
}
