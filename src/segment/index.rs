//! Segment Index (sidecar)
//!
//! Small key/value file next to each segment summarizing its frames:
//!
//! ```text
//! epoch=3
//! minLsn=120
//! maxLsn=181
//! recordCount=62
//! sealed=true
//! updatedAtMillis=1760000000000
//! ```
//!
//! `minLsn`/`maxLsn` are omitted while the segment holds no frames.
//! Writes go to a temp file that is renamed over the final name, so a crash
//! never leaves a half-written index visible. Sidecars are advisory: recovery
//! can always rebuild them from the segment itself.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, WalError};

use super::parse_epoch;

/// Suffix appended to a segment file name to form its sidecar name
pub const INDEX_SUFFIX: &str = ".idx";

const TMP_SUFFIX: &str = ".tmp";

/// Persisted summary of one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentIndex {
    pub epoch: u64,
    pub min_lsn: Option<u64>,
    pub max_lsn: Option<u64>,
    pub record_count: u64,
    pub sealed: bool,
    pub updated_at_millis: u64,
}

impl SegmentIndex {
    /// An empty, unsealed index
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            min_lsn: None,
            max_lsn: None,
            record_count: 0,
            sealed: false,
            updated_at_millis: 0,
        }
    }

    /// Sidecar path for a segment path
    pub fn index_path_for(segment: &Path) -> PathBuf {
        let mut name = segment
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(INDEX_SUFFIX);
        segment.with_file_name(name)
    }

    /// Load the sidecar of `segment`, or an empty unsealed index if absent
    pub fn load_or_new(segment: &Path) -> Result<Self> {
        let epoch = parse_epoch(segment).ok_or_else(|| WalError::InvalidSidecar {
            path: segment.to_path_buf(),
            reason: "not a segment file name".to_string(),
        })?;
        let idx_path = Self::index_path_for(segment);

        let text = match fs::read_to_string(&idx_path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new(epoch)),
            Err(e) => return Err(e.into()),
        };

        let mut index = Self::new(epoch);
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(invalid(&idx_path, format!("malformed line {line:?}")));
            };
            let value = value.trim();
            match key.trim() {
                "epoch" => {}
                "minLsn" => index.min_lsn = Some(parse_field(&idx_path, key, value)?),
                "maxLsn" => index.max_lsn = Some(parse_field(&idx_path, key, value)?),
                "recordCount" => index.record_count = parse_field(&idx_path, key, value)?,
                "sealed" => index.sealed = parse_field(&idx_path, key, value)?,
                "updatedAtMillis" => index.updated_at_millis = parse_field(&idx_path, key, value)?,
                _ => {}
            }
        }
        Ok(index)
    }

    /// Atomically replace the sidecar of `segment`, stamping `updated_at_millis`
    pub fn store(&mut self, segment: &Path) -> Result<()> {
        self.updated_at_millis = now_millis();

        let idx_path = Self::index_path_for(segment);
        let mut tmp_name = idx_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(TMP_SUFFIX);
        let tmp_path = idx_path.with_file_name(tmp_name);

        fs::write(&tmp_path, self.render())?;
        fs::rename(&tmp_path, &idx_path)?;
        Ok(())
    }

    /// Widen the LSN range to include `lsn` and count one more record
    pub fn observe(&mut self, lsn: u64) {
        self.min_lsn = Some(self.min_lsn.map_or(lsn, |min| min.min(lsn)));
        self.max_lsn = Some(self.max_lsn.map_or(lsn, |max| max.max(lsn)));
        self.record_count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    fn render(&self) -> String {
        let mut out = String::from("# WAL segment index\n");
        out.push_str(&format!("epoch={}\n", self.epoch));
        if let Some(min) = self.min_lsn {
            out.push_str(&format!("minLsn={min}\n"));
        }
        if let Some(max) = self.max_lsn {
            out.push_str(&format!("maxLsn={max}\n"));
        }
        out.push_str(&format!("recordCount={}\n", self.record_count));
        out.push_str(&format!("sealed={}\n", self.sealed));
        out.push_str(&format!("updatedAtMillis={}\n", self.updated_at_millis));
        out
    }
}

fn parse_field<T: std::str::FromStr>(path: &Path, key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(path, format!("bad value {value:?} for {key}")))
}

fn invalid(path: &Path, reason: String) -> WalError {
    WalError::InvalidSidecar {
        path: path.to_path_buf(),
        reason,
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
