//! WAL Reader
//!
//! Reads frames sequentially from one segment file, never past a byte
//! limit. The limit is the file size for recovery, or the size captured at
//! fence time for streaming.
//!
//! The reader reports what it found and leaves policy to its callers:
//! - `Frame`: all three fields parsed (CRC not yet checked)
//! - `Torn`: a declared length runs past the limit (crash mid-append)
//! - `Malformed`: a container failed to decode (corruption)

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::Result;

use super::frame::{self, LEN_PREFIX_SIZE};

/// A fully parsed frame
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Offset of the frame's first byte
    pub start: u64,
    /// Offset just past the frame's last byte
    pub end: u64,
    pub lsn: u64,
    /// Checksum as stored in the frame
    pub crc32c: u32,
    pub payload: Bytes,
}

impl RawFrame {
    /// CRC-32C recomputed over the payload
    pub fn computed_crc(&self) -> u32 {
        frame::checksum(&self.payload)
    }

    pub fn checksum_ok(&self) -> bool {
        self.computed_crc() == self.crc32c
    }

    /// Total bytes occupied on disk
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One step of a segment scan
#[derive(Debug)]
pub enum FrameRead {
    Frame(RawFrame),
    Torn { offset: u64 },
    Malformed { offset: u64, reason: String },
}

/// Sequential frame reader over one segment
pub struct SegmentReader {
    path: PathBuf,
    reader: BufReader<File>,
    pos: u64,
    limit: u64,
}

impl SegmentReader {
    /// Open a segment, reading up to its current size
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let limit = file.metadata()?.len();
        Ok(Self::from_file(path, file, limit))
    }

    /// Open a segment, reading at most `fence` bytes
    pub fn open_fenced(path: &Path, fence: u64) -> Result<Self> {
        let file = File::open(path)?;
        let limit = fence.min(file.metadata()?.len());
        Ok(Self::from_file(path, file, limit))
    }

    fn from_file(path: &Path, file: File, limit: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            pos: 0,
            limit,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next unread byte
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Read the next frame; `None` once the limit is reached cleanly.
    ///
    /// After a `Torn` or `Malformed` result the reader is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<FrameRead>> {
        if self.pos >= self.limit {
            return Ok(None);
        }
        let start = self.pos;

        let lsn_bytes = match self.read_field()? {
            Some(bytes) => bytes,
            None => return Ok(Some(self.torn(start))),
        };
        let lsn = match frame::decode_lsn(&lsn_bytes) {
            Ok(lsn) => lsn,
            Err(e) => return Ok(Some(self.malformed(start, format!("bad LSN container: {e}")))),
        };

        let crc_bytes = match self.read_field()? {
            Some(bytes) => bytes,
            None => return Ok(Some(self.torn(start))),
        };
        let crc32c = match frame::decode_crc(&crc_bytes) {
            Ok(crc) => crc,
            Err(e) => return Ok(Some(self.malformed(start, format!("bad CRC container: {e}")))),
        };

        let payload = match self.read_field()? {
            Some(bytes) => bytes,
            None => return Ok(Some(self.torn(start))),
        };

        Ok(Some(FrameRead::Frame(RawFrame {
            start,
            end: self.pos,
            lsn,
            crc32c,
            payload: Bytes::from(payload),
        })))
    }

    /// Read one `[len][bytes]` field, or `None` if it runs past the limit
    fn read_field(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pos + LEN_PREFIX_SIZE > self.limit {
            return Ok(None);
        }
        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf)?;
        self.pos += LEN_PREFIX_SIZE;

        let len = u32::from_be_bytes(len_buf) as u64;
        if self.pos + len > self.limit {
            return Ok(None);
        }
        let mut bytes = vec![0u8; len as usize];
        self.reader.read_exact(&mut bytes)?;
        self.pos += len;
        Ok(Some(bytes))
    }

    fn torn(&mut self, offset: u64) -> FrameRead {
        self.pos = self.limit;
        FrameRead::Torn { offset }
    }

    fn malformed(&mut self, offset: u64, reason: String) -> FrameRead {
        self.pos = self.limit;
        FrameRead::Malformed { offset, reason }
    }
}

impl Iterator for SegmentReader {
    type Item = Result<FrameRead>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
