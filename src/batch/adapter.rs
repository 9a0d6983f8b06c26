//! Record adapters
//!
//! Turn a run of typed application events into one WAL record.

use crate::error::{Result, WalError};
use crate::wal::{EventFamily, WalRecord};

/// Builds WAL records from events of type `E`
pub trait RecordAdapter<E>: Send + Sync {
    /// Reject an event before it is buffered
    fn validate(&self, _event: &E) -> Result<()> {
        Ok(())
    }

    /// Build one record holding `events`, in order
    fn build_record(&self, events: &[E]) -> Result<WalRecord>;
}

/// Adapter for events that arrive already serialized
#[derive(Debug, Clone, Copy)]
pub struct OpaqueEventAdapter {
    family: EventFamily,
}

impl OpaqueEventAdapter {
    pub fn new(family: EventFamily) -> Self {
        Self { family }
    }

    pub fn family(&self) -> EventFamily {
        self.family
    }
}

impl<E: AsRef<[u8]>> RecordAdapter<E> for OpaqueEventAdapter {
    fn validate(&self, event: &E) -> Result<()> {
        if event.as_ref().is_empty() {
            return Err(WalError::InvalidEvent("empty event".to_string()));
        }
        Ok(())
    }

    fn build_record(&self, events: &[E]) -> Result<WalRecord> {
        let events = events.iter().map(|e| e.as_ref().to_vec()).collect();
        Ok(WalRecord::new(self.family, events))
    }
}
