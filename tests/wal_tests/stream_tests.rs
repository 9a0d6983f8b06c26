//! Tests for LSN-ordered replay
//!
//! These tests verify:
//! - Replay order across segments
//! - Resuming after the consumer's last applied LSN
//! - Upper bounds (explicit and persisted watermark)
//! - CRC handling and consumer failures
//! - The read fence taken at stream start

use std::fs;
use std::sync::Arc;

use spillwal::{
    CallbackError, PersistedLsnStore, SequentialFramer, SpilloverWriter, StreamConsumer,
    StreamOptions, Streamer, TailPolicy, WalError, WalRecord,
};

use crate::common::{config, event, file_len, record, segment_files, setup_root, single_frame_len, write_records};

// =============================================================================
// Helper Types
// =============================================================================

#[derive(Default)]
struct CollectingConsumer {
    applied: Option<u64>,
    seen: Vec<(u64, WalRecord)>,
    flushes: usize,
    fail_at: Option<u64>,
}

impl CollectingConsumer {
    fn after(lsn: u64) -> Self {
        Self {
            applied: Some(lsn),
            ..Self::default()
        }
    }

    fn lsns(&self) -> Vec<u64> {
        self.seen.iter().map(|(lsn, _)| *lsn).collect()
    }
}

impl StreamConsumer for CollectingConsumer {
    fn last_applied_lsn(&self) -> Option<u64> {
        self.applied
    }

    fn consume(&mut self, lsn: u64, record: WalRecord) -> Result<(), CallbackError> {
        if self.fail_at == Some(lsn) {
            return Err(format!("cannot apply {lsn}").into());
        }
        self.seen.push((lsn, record));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CallbackError> {
        self.flushes += 1;
        Ok(())
    }
}

/// Appends to a live writer every time it consumes
struct AppendingConsumer {
    writer: Arc<SpilloverWriter<SequentialFramer>>,
    seen: Vec<u64>,
}

impl StreamConsumer for AppendingConsumer {
    fn last_applied_lsn(&self) -> Option<u64> {
        None
    }

    fn consume(&mut self, lsn: u64, _record: WalRecord) -> Result<(), CallbackError> {
        self.seen.push(lsn);
        self.writer.append(&record(1000 + lsn, 16))?;
        Ok(())
    }
}

// =============================================================================
// Replay Tests
// =============================================================================

#[test]
fn test_stream_empty_root() {
    let (_temp, root) = setup_root();
    let mut consumer = CollectingConsumer::default();

    let report = Streamer::stream(&root, &mut consumer, &StreamOptions::default()).unwrap();

    assert_eq!(report.records_delivered, 0);
    assert_eq!(report.last_delivered_lsn, None);
    assert_eq!(consumer.flushes, 1);
}

#[test]
fn test_stream_round_trip_across_segments() {
    let (_temp, root) = setup_root();
    write_records(&root, 2 * single_frame_len(20), 7, 20);
    let mut consumer = CollectingConsumer::default();

    let report = Streamer::stream(&root, &mut consumer, &StreamOptions::default()).unwrap();

    assert_eq!(consumer.lsns(), (1..=7).collect::<Vec<_>>());
    assert_eq!(consumer.seen[3].1, record(4, 20));
    assert_eq!(report.records_delivered, 7);
    assert_eq!(report.last_delivered_lsn, Some(7));
    assert_eq!(report.segments_visited, 4);
    assert_eq!(consumer.flushes, 1);
}

#[test]
fn test_stream_resumes_after_last_applied() {
    let (_temp, root) = setup_root();
    write_records(&root, 2 * single_frame_len(20), 7, 20);
    let mut consumer = CollectingConsumer::after(4);

    let report = Streamer::stream(&root, &mut consumer, &StreamOptions::default()).unwrap();

    assert_eq!(consumer.lsns(), vec![5, 6, 7]);
    // Segments [1,2] and [3,4] are skipped via their sidecars
    assert_eq!(report.segments_visited, 2);
}

#[test]
fn test_stream_twice_is_idempotent() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 5, 20);

    let mut first = CollectingConsumer::default();
    Streamer::stream(&root, &mut first, &StreamOptions::default()).unwrap();

    let mut second = CollectingConsumer::after(first.lsns().last().copied().unwrap());
    let report = Streamer::stream(&root, &mut second, &StreamOptions::default()).unwrap();

    assert_eq!(report.records_delivered, 0);
    assert!(second.seen.is_empty());
}

#[test]
fn test_stream_from_explicit_start() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 5, 20);
    let mut consumer = CollectingConsumer::default();

    let report =
        Streamer::stream_from(&root, Some(3), &mut consumer, &StreamOptions::default()).unwrap();

    assert_eq!(consumer.lsns(), vec![4, 5]);
    assert_eq!(report.last_delivered_lsn, Some(5));
    // stream_from leaves flushing to the caller
    assert_eq!(consumer.flushes, 0);
}

// =============================================================================
// Upper Bound Tests
// =============================================================================

#[test]
fn test_stream_up_to_lsn() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 8, 20);
    let mut consumer = CollectingConsumer::default();
    let options = StreamOptions {
        up_to_lsn: Some(5),
        ..StreamOptions::default()
    };

    let report = Streamer::stream(&root, &mut consumer, &options).unwrap();

    assert_eq!(consumer.lsns(), vec![1, 2, 3, 4, 5]);
    assert_eq!(report.last_delivered_lsn, Some(5));
    assert_eq!(consumer.flushes, 1);
}

#[test]
fn test_stream_fenced_to_persisted_lsn() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 8, 20);
    PersistedLsnStore::open(&root).write(3).unwrap();
    let mut consumer = CollectingConsumer::default();
    let options = StreamOptions {
        fence_to_persisted_lsn: true,
        ..StreamOptions::default()
    };

    Streamer::stream(&root, &mut consumer, &options).unwrap();

    assert_eq!(consumer.lsns(), vec![1, 2, 3]);
}

#[test]
fn test_stream_fence_without_persisted_lsn_is_unbounded() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 4, 20);
    let mut consumer = CollectingConsumer::default();
    let options = StreamOptions {
        fence_to_persisted_lsn: true,
        ..StreamOptions::default()
    };

    Streamer::stream(&root, &mut consumer, &options).unwrap();

    assert_eq!(consumer.lsns(), vec![1, 2, 3, 4]);
}

#[test]
fn test_stream_fence_over_missing_root_creates_nothing() {
    let (_temp, root) = setup_root();
    let mut consumer = CollectingConsumer::default();
    let options = StreamOptions {
        fence_to_persisted_lsn: true,
        ..StreamOptions::default()
    };

    let report = Streamer::stream(&root, &mut consumer, &options).unwrap();

    assert_eq!(report.records_delivered, 0);
    assert!(!root.exists());
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_stream_reports_checksum_mismatch() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 3, 20);
    let segment = segment_files(&root).remove(0);
    let mut bytes = fs::read(&segment).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&segment, &bytes).unwrap();

    let mut consumer = CollectingConsumer::default();
    let err = Streamer::stream(&root, &mut consumer, &StreamOptions::default()).unwrap_err();

    assert!(matches!(err, WalError::ChecksumMismatch { offset, .. } if offset == 2 * single_frame_len(20)));
    assert!(err.is_corruption());
    assert_eq!(consumer.lsns(), vec![1, 2]);
    assert_eq!(consumer.flushes, 0);
}

#[test]
fn test_stream_without_crc_verification() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 3, 20);
    let segment = segment_files(&root).remove(0);
    let mut bytes = fs::read(&segment).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&segment, &bytes).unwrap();

    let mut consumer = CollectingConsumer::default();
    let options = StreamOptions {
        verify_crc: false,
        ..StreamOptions::default()
    };
    Streamer::stream(&root, &mut consumer, &options).unwrap();

    assert_eq!(consumer.lsns(), vec![1, 2, 3]);
    assert_ne!(consumer.seen[2].1.events()[0], event(3, 20));
}

#[test]
fn test_stream_consumer_failure_names_lsn() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 5, 20);
    let mut consumer = CollectingConsumer {
        fail_at: Some(3),
        ..CollectingConsumer::default()
    };

    let err = Streamer::stream(&root, &mut consumer, &StreamOptions::default()).unwrap_err();

    assert!(matches!(err, WalError::Consumer { lsn: Some(3), .. }));
    assert_eq!(consumer.lsns(), vec![1, 2]);
}

#[test]
fn test_stream_stops_at_torn_tail() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 3, 20);
    let segment = segment_files(&root).remove(0);
    let len = file_len(&segment);
    fs::OpenOptions::new()
        .write(true)
        .open(&segment)
        .unwrap()
        .set_len(len - 5)
        .unwrap();

    let mut consumer = CollectingConsumer::default();
    let report = Streamer::stream(&root, &mut consumer, &StreamOptions::default()).unwrap();

    assert_eq!(consumer.lsns(), vec![1, 2]);
    assert_eq!(report.last_delivered_lsn, Some(2));
}

#[test]
fn test_stream_runs_recovery_first() {
    let (_temp, root) = setup_root();
    write_records(&root, 1 << 20, 3, 20);
    let segment = segment_files(&root).remove(0);
    let len = file_len(&segment);
    fs::OpenOptions::new()
        .write(true)
        .open(&segment)
        .unwrap()
        .set_len(len - 5)
        .unwrap();

    let mut consumer = CollectingConsumer::default();
    let options = StreamOptions {
        run_recovery: true,
        tail_policy: TailPolicy::StrictTruncate,
        ..StreamOptions::default()
    };
    Streamer::stream(&root, &mut consumer, &options).unwrap();

    assert_eq!(consumer.lsns(), vec![1, 2]);
    assert_eq!(file_len(&segment), 2 * single_frame_len(20));
}

// =============================================================================
// Read Fence Tests
// =============================================================================

#[test]
fn test_stream_ignores_frames_appended_during_run() {
    let (_temp, root) = setup_root();
    let writer = Arc::new(
        SpilloverWriter::open(&config(&root, 1 << 20), SequentialFramer::new(), None).unwrap(),
    );
    for i in 1..=3 {
        writer.append(&record(i, 16)).unwrap();
    }

    let mut consumer = AppendingConsumer {
        writer: Arc::clone(&writer),
        seen: Vec::new(),
    };
    Streamer::stream(&root, &mut consumer, &StreamOptions::default()).unwrap();

    assert_eq!(consumer.seen, vec![1, 2, 3]);
    assert_eq!(writer.framer().last_assigned(), 6);
}
