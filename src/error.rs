//! Error types for spillwal
//!
//! Provides a unified error type for all WAL operations.
//!
//! Errors fall into a few families that callers are expected to treat
//! differently:
//! - **Precondition** violations are caller bugs (no staged LSN, oversized
//!   event, write after close). They are never retried or split.
//! - **Corruption** is recoverable during startup recovery (by policy) but
//!   always fatal while streaming.
//! - **Lock** contention must stop process initialization.
//! - **I/O** failures are propagated as-is, with no internal retries.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using WalError
pub type Result<T> = std::result::Result<T, WalError>;

/// Boxed error returned by user callbacks (commit listeners, stream consumers)
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for spillwal operations
#[derive(Debug, Error)]
pub enum WalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Precondition Errors
    // -------------------------------------------------------------------------
    #[error("no LSN staged for the next manual write")]
    NoStagedLsn,

    #[error("record too large: {size} bytes framed (max {max})")]
    OversizedRecord { size: u64, max: u64 },

    #[error("WAL writer is closed")]
    WriterClosed,

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption in {path:?} at offset {offset}: {reason}")]
    Corruption {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("CRC mismatch in {path:?} at offset {offset}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        path: PathBuf,
        offset: u64,
        stored: u32,
        computed: u32,
    },

    #[error("invalid segment index {path:?}: {reason}")]
    InvalidSidecar { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // Lock Errors
    // -------------------------------------------------------------------------
    #[error("{role} lock already held at {path:?}")]
    LockHeld { role: String, path: PathBuf },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // -------------------------------------------------------------------------
    // Callback Errors
    // -------------------------------------------------------------------------
    #[error("commit listener failed at LSN {lsn}: {source}")]
    CommitListener {
        lsn: u64,
        #[source]
        source: CallbackError,
    },

    #[error("stream consumer failed (last LSN {lsn:?}): {source}")]
    Consumer {
        lsn: Option<u64>,
        #[source]
        source: CallbackError,
    },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WalError {
    /// True for CRC mismatches and structurally invalid frames or sidecars.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            WalError::Corruption { .. }
                | WalError::ChecksumMismatch { .. }
                | WalError::InvalidSidecar { .. }
        )
    }

    /// True for caller-fixable misuse that must not be retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            WalError::NoStagedLsn
                | WalError::OversizedRecord { .. }
                | WalError::WriterClosed
                | WalError::InvalidEvent(_)
        )
    }
}
