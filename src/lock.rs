//! Process Lock
//!
//! Advisory, file-presence mutual exclusion per (root directory, role).
//! The lock is `{root}/{role}.lock`, created with exclusive-create and
//! holding `key=value` diagnostic lines. It is held for as long as the file
//! exists; there is no lease, TTL or heartbeat.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, WalError};

const LOCK_SUFFIX: &str = ".lock";

/// A held process lock; released on `release()` or drop
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    role: String,
    released: bool,
}

impl ProcessLock {
    /// Acquire the `role` lock in `root`
    ///
    /// Fails with `WalError::LockHeld` if the marker already exists.
    pub fn acquire(root: &Path, role: &str, info: &[(&str, String)]) -> Result<Self> {
        fs::create_dir_all(root)?;
        let path = Self::lock_path(root, role);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(WalError::LockHeld {
                    role: role.to_string(),
                    path,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut body = String::new();
        for (key, value) in info {
            body.push_str(&format!("{key}={value}\n"));
        }
        let written = file
            .write_all(body.as_bytes())
            .and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }

        debug!(role, path = %path.display(), "acquired process lock");
        Ok(Self {
            path,
            role: role.to_string(),
            released: false,
        })
    }

    /// Path of the marker for `role` in `root`
    pub fn lock_path(root: &Path, role: &str) -> PathBuf {
        root.join(format!("{role}{LOCK_SUFFIX}"))
    }

    /// Diagnostic lines of whoever holds `role` in `root`, if anyone
    pub fn holder_info(root: &Path, role: &str) -> Result<Option<Vec<(String, String)>>> {
        let text = match fs::read_to_string(Self::lock_path(root, role)) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pairs = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(Some(pairs))
    }

    /// Remove a marker left behind by a crashed process.
    ///
    /// Operator override: returns whether a marker was removed.
    pub fn force_release(root: &Path, role: &str) -> Result<bool> {
        match fs::remove_file(Self::lock_path(root, role)) {
            Ok(()) => {
                warn!(role, root = %root.display(), "force-released process lock");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Release the lock; calling it again is a no-op
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.released = true;
        debug!(role = %self.role, "released process lock");
        Ok(())
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(role = %self.role, error = %e, "failed to release process lock");
        }
    }
}
