//! Segment Allocator
//!
//! Hands out append targets in a root directory and tracks the active one.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

use super::{list_segments, segment_path};

/// Allocates segment files in epoch order
///
/// ## Concurrency:
/// - `active_epoch`: Mutex, so allocation and lookup never observe a
///   half-switched epoch
pub struct SegmentAllocator {
    /// Directory holding the segments
    root: PathBuf,

    /// Epoch of the segment currently accepting appends
    active_epoch: Mutex<u64>,
}

impl SegmentAllocator {
    /// Open the allocator for `root`
    ///
    /// On startup:
    /// 1. Create the directory if it doesn't exist
    /// 2. Resume at the highest existing epoch
    /// 3. Or create epoch 1 in an empty directory
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;

        let highest = list_segments(root)?.last().map(|(epoch, _)| *epoch);
        let active = match highest {
            Some(epoch) => epoch,
            None => {
                create_segment_file(&segment_path(root, 1))?;
                debug!(root = %root.display(), "created first segment");
                1
            }
        };

        Ok(Self {
            root: root.to_path_buf(),
            active_epoch: Mutex::new(active),
        })
    }

    /// Create the next segment and make it active
    pub fn allocate(&self) -> Result<PathBuf> {
        let mut active = self.active_epoch.lock();
        let next = *active + 1;
        let path = segment_path(&self.root, next);
        create_segment_file(&path)?;
        *active = next;
        debug!(epoch = next, path = %path.display(), "allocated segment");
        Ok(path)
    }

    /// Path of the active segment
    pub fn active(&self) -> PathBuf {
        segment_path(&self.root, *self.active_epoch.lock())
    }

    /// Epoch of the active segment
    pub fn active_epoch(&self) -> u64 {
        *self.active_epoch.lock()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Create an empty segment file; an existing file is left untouched
fn create_segment_file(path: &Path) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}
