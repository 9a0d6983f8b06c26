//! WAL Record definitions
//!
//! A record is the logical unit committed at one LSN: a batch of already
//! serialized application events that all belong to one event family. The
//! WAL treats every event as opaque bytes.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The family of events carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFamily {
    Metrics,
    Traces,
    Logs,
}

/// A single WAL record (the frame payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Family shared by every event in this record
    family: EventFamily,

    /// Serialized events, in arrival order
    events: Vec<Vec<u8>>,
}

impl WalRecord {
    /// Create a record from already-serialized events
    pub fn new(family: EventFamily, events: Vec<Vec<u8>>) -> Self {
        Self { family, events }
    }

    /// Create a record holding one event
    pub fn single(family: EventFamily, event: impl Into<Vec<u8>>) -> Self {
        Self::new(family, vec![event.into()])
    }

    pub fn family(&self) -> EventFamily {
        self.family
    }

    pub fn events(&self) -> &[Vec<u8>] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Consume the record, returning its events
    pub fn into_events(self) -> Vec<Vec<u8>> {
        self.events
    }

    /// Encoded payload length, computed without encoding
    pub fn serialized_size(&self) -> Result<u64> {
        Ok(bincode::serialized_size(self)?)
    }

    /// Encode into frame payload bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode frame payload bytes.
    ///
    /// Fails if the payload is not a structurally valid record, which
    /// recovery and streaming treat as corruption even when the CRC matched.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(payload)?)
    }
}
