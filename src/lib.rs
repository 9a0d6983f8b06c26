//! # spillwal
//!
//! A durable, segmented write-ahead log for observability ingestion:
//! metric, trace and log events are appended here before downstream stores
//! absorb them, so a crash between "accepted" and "indexed" loses nothing.
//!
//! - Length-prefixed frames with CRC-32C checksums
//! - Size-bounded segments with sidecar indexes (spillover)
//! - Configurable fsync policy (every record, bytes, interval, manual)
//! - Size/count/time bounded event batching
//! - Crash recovery with torn-tail truncation
//! - LSN-ordered replay to idempotent consumers
//! - Watermark-driven, two-phase segment cleanup
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Producers (events)                       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Batch Writer                              │
//! │           (size / count / time triggers)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ WalRecord
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Spillover Writer ──▶ Commit Listener         │
//! │        (Framer · Allocator · Sidecar · fsync)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Segments   │◀─────────│  Sidecars   │
//!   │ wal_N.seg   │          │  wal_N.idx  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!   ┌──────▼──────┐   ┌─────────────▼──┐   ┌────────────────┐
//!   │  Recovery   │   │    Streamer    │   │    Cleaner     │
//!   │  (startup)  │   │ (replay > LSN) │   │ (persisted.lsn)│
//!   └─────────────┘   └────────────────┘   └────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod segment;
pub mod batch;
pub mod stream;
pub mod cleaner;
pub mod lock;
pub mod persisted;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CallbackError, Result, WalError};
pub use config::{Config, FsyncPolicy, TailPolicy};
pub use wal::{
    CommitContext, CommitListener, EventFamily, ManualLsnFramer, RecoveryReport,
    RecoveryScanner, SequentialFramer, SpilloverWriter, WalRecord, WalWriter,
};
pub use batch::{BatchWriter, OpaqueEventAdapter, RecordAdapter};
pub use stream::{StreamConsumer, StreamOptions, StreamReport, Streamer};
pub use cleaner::{CleanReport, Clock, SystemClock, WalCleaner};
pub use lock::ProcessLock;
pub use persisted::PersistedLsnStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of spillwal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
