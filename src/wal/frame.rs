//! WAL Frame codec
//!
//! Encodes one record payload as a physical frame of three length-prefixed
//! fields:
//!
//! ```text
//! ┌─────────┬──────────────┬─────────┬──────────────┬─────────┬───────────┐
//! │ Len (4) │ LSN cont.    │ Len (4) │ CRC cont.    │ Len (4) │ Payload   │
//! └─────────┴──────────────┴─────────┴──────────────┴─────────┴───────────┘
//! ```
//!
//! Lengths are big-endian `u32`. The LSN container holds the `u64` sequence
//! number; the CRC container holds the CRC-32C of the payload widened to
//! `u64`. The checksum never covers the containers themselves.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalError};

/// Size of one length prefix
pub const LEN_PREFIX_SIZE: u64 = 4;

/// Encoded size of the LSN and CRC containers
pub const CONTAINER_SIZE: u64 = 8;

/// Bytes a frame spends before the payload's own length prefix
pub const PER_RECORD_OVERHEAD: u64 = 2 * (LEN_PREFIX_SIZE + CONTAINER_SIZE);

/// Total framing bytes around a payload
pub const FRAME_OVERHEAD: u64 = PER_RECORD_OVERHEAD + LEN_PREFIX_SIZE;

#[derive(Serialize, Deserialize)]
struct LsnContainer {
    n: u64,
}

#[derive(Serialize, Deserialize)]
struct CrcContainer {
    crc: u64,
}

/// Framed size of a payload of `payload_len` bytes
pub fn framed_len(payload_len: u64) -> u64 {
    FRAME_OVERHEAD + payload_len
}

/// CRC-32C of a payload
pub fn checksum(payload: &[u8]) -> u32 {
    crc32c::crc32c(payload)
}

/// Outcome of writing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameWritten {
    pub lsn: u64,
    pub crc32c: u32,
    pub bytes_written: u64,
}

/// Encode a frame into a single contiguous buffer
pub fn encode_frame(lsn: u64, payload: &[u8]) -> Result<(Bytes, u32)> {
    let crc = checksum(payload);
    let lsn_bytes = bincode::serialize(&LsnContainer { n: lsn })?;
    let crc_bytes = bincode::serialize(&CrcContainer { crc: crc as u64 })?;

    let payload_len = u32::try_from(payload.len()).map_err(|_| WalError::OversizedRecord {
        size: framed_len(payload.len() as u64),
        max: framed_len(u32::MAX as u64),
    })?;

    let mut buf = BytesMut::with_capacity(framed_len(payload.len() as u64) as usize);
    buf.put_u32(lsn_bytes.len() as u32);
    buf.put_slice(&lsn_bytes);
    buf.put_u32(crc_bytes.len() as u32);
    buf.put_slice(&crc_bytes);
    buf.put_u32(payload_len);
    buf.put_slice(payload);

    Ok((buf.freeze(), crc))
}

/// Decode an LSN container
pub fn decode_lsn(bytes: &[u8]) -> Result<u64> {
    let container: LsnContainer = bincode::deserialize(bytes)?;
    Ok(container.n)
}

/// Decode a CRC container, rejecting values that do not fit in 32 bits
pub fn decode_crc(bytes: &[u8]) -> Result<u32> {
    let container: CrcContainer = bincode::deserialize(bytes)?;
    u32::try_from(container.crc).map_err(|_| {
        WalError::Serialization(Box::new(bincode::ErrorKind::Custom(format!(
            "CRC container out of range: {}",
            container.crc
        ))))
    })
}

// =============================================================================
// Framer strategies
// =============================================================================

/// Assigns LSNs and writes frames.
///
/// One implementation is chosen when the writer is built and kept for its
/// whole lifetime.
pub trait Framer: Send + Sync {
    /// Conservative framing bytes excluding the payload length prefix
    fn per_record_overhead(&self) -> u64 {
        PER_RECORD_OVERHEAD
    }

    /// Produce the LSN for the next frame
    fn next_lsn(&self) -> Result<u64>;

    /// Hand back an LSN from `next_lsn` whose frame was never written
    fn release_lsn(&self, _lsn: u64) {}

    /// Write one frame to `sink`: all three fields, or an error.
    ///
    /// On error the LSN is released, so the next frame reuses it.
    fn write_framed(&self, sink: &mut dyn Write, payload: &[u8]) -> Result<FrameWritten> {
        let lsn = self.next_lsn()?;
        let written = encode_frame(lsn, payload).and_then(|(frame, crc32c)| {
            sink.write_all(&frame)?;
            Ok(FrameWritten {
                lsn,
                crc32c,
                bytes_written: frame.len() as u64,
            })
        });
        if written.is_err() {
            self.release_lsn(lsn);
        }
        written
    }
}

/// Internal sequential LSN supplier: 1, 2, 3, ...
#[derive(Debug, Clone, Default)]
pub struct SequentialFramer {
    last: Arc<AtomicU64>,
}

impl SequentialFramer {
    /// Start a fresh sequence whose first LSN is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a sequence whose highest used LSN is `lsn`
    pub fn resume_after(lsn: u64) -> Self {
        Self {
            last: Arc::new(AtomicU64::new(lsn)),
        }
    }

    /// Highest LSN handed out so far (0 if none)
    pub fn last_assigned(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Framer for SequentialFramer {
    fn next_lsn(&self) -> Result<u64> {
        Ok(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Steps back only if `lsn` is still the latest one handed out
    fn release_lsn(&self, lsn: u64) {
        let _ = self
            .last
            .compare_exchange(lsn, lsn.wrapping_sub(1), Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// LSN supplier for externally assigned sequence numbers.
///
/// The caller stages exactly one LSN before each write. Clones share the
/// staging slot. Staged values are trusted to be increasing; the coordinator
/// that assigns them owns that guarantee.
#[derive(Debug, Clone, Default)]
pub struct ManualLsnFramer {
    staged: Arc<Mutex<Option<u64>>>,
}

impl ManualLsnFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the LSN for the next write, replacing any unused value
    pub fn set_next_lsn(&self, lsn: u64) {
        *self.staged.lock() = Some(lsn);
    }

    /// Currently staged LSN, if any
    pub fn staged(&self) -> Option<u64> {
        *self.staged.lock()
    }
}

impl Framer for ManualLsnFramer {
    fn next_lsn(&self) -> Result<u64> {
        self.staged.lock().take().ok_or(WalError::NoStagedLsn)
    }

    /// Re-stage the LSN unless the caller already staged a new one
    fn release_lsn(&self, lsn: u64) {
        let mut staged = self.staged.lock();
        if staged.is_none() {
            *staged = Some(lsn);
        }
    }
}
