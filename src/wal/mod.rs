//! Write-Ahead Log (WAL) Module
//!
//! Provides durability for ingested events through append-only logging.
//!
//! ## Responsibilities
//! - Frame records with an LSN and a CRC-32C checksum
//! - Append frames across size-bounded segments (spillover)
//! - Crash recovery: torn-tail detection and truncation
//! - Bounded sequential reads for recovery and replay
//!
//! ## File Format
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ Frame 1                                                   │
//! │ ┌─────────┬───────┬─────────┬───────┬─────────┬─────────┐ │
//! │ │ Len (4) │ LSN   │ Len (4) │ CRC   │ Len (4) │ Payload │ │
//! │ └─────────┴───────┴─────────┴───────┴─────────┴─────────┘ │
//! ├───────────────────────────────────────────────────────────┤
//! │ Frame 2                                                   │
//! │ ...                                                       │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod frame;
mod reader;
mod record;
mod recovery;
mod writer;

pub use frame::{FrameWritten, Framer, ManualLsnFramer, SequentialFramer};
pub use reader::{FrameRead, RawFrame, SegmentReader};
pub use record::{EventFamily, WalRecord};
pub use recovery::{RecoveryReport, RecoveryScanner, ScanStop, SegmentScan, StopKind};
pub use writer::{CommitContext, CommitListener, SpilloverWriter, WalWriter, WRITER_ROLE};
