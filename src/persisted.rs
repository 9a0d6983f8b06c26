//! Persisted-LSN Store
//!
//! A single durable watermark, `{root}/persisted.lsn`: every frame with an
//! LSN at or below it is safely captured outside the WAL. An external
//! snapshot/indexing process moves it forward; the cleaner and the streamer
//! read it.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

const FILE_NAME: &str = "persisted.lsn";
const TMP_NAME: &str = "persisted.lsn.tmp";

/// Durable watermark store for one WAL root
pub struct PersistedLsnStore {
    path: PathBuf,
    tmp_path: PathBuf,
    /// Serializes read-compare-write in `update_if_greater`
    update_lock: Mutex<()>,
}

impl PersistedLsnStore {
    /// Store for `root`. Nothing touches the disk until the first `write`.
    pub fn open(root: &Path) -> Self {
        Self {
            path: root.join(FILE_NAME),
            tmp_path: root.join(TMP_NAME),
            update_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current watermark; `None` if nothing has been persisted yet.
    ///
    /// An unparsable file also reads as `None`: no durability signal is the
    /// safe interpretation.
    pub fn read(&self) -> Result<Option<u64>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match text.trim().parse::<u64>() {
            Ok(lsn) => Ok(Some(lsn)),
            Err(_) => {
                warn!(path = %self.path.display(), "unparsable persisted LSN, treating as absent");
                Ok(None)
            }
        }
    }

    /// Atomically replace the watermark, creating the root if needed
    pub fn write(&self, lsn: u64) -> Result<()> {
        if let Some(root) = self.path.parent() {
            fs::create_dir_all(root)?;
        }
        let mut file = File::create(&self.tmp_path)?;
        writeln!(file, "{lsn}")?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.path)?;
        debug!(lsn, "persisted LSN updated");
        Ok(())
    }

    /// Persist `lsn` only if it is strictly greater than the stored value.
    ///
    /// Returns whether the watermark moved.
    pub fn update_if_greater(&self, lsn: u64) -> Result<bool> {
        let _guard = self.update_lock.lock();
        match self.read()? {
            Some(current) if current >= lsn => Ok(false),
            _ => {
                self.write(lsn)?;
                Ok(true)
            }
        }
    }
}
