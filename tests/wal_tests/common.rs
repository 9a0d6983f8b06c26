//! Shared helpers for WAL tests

use std::fs;
use std::path::{Path, PathBuf};

use spillwal::{Config, EventFamily, FsyncPolicy, SequentialFramer, SpilloverWriter, WalRecord};
use tempfile::TempDir;

/// Encoded size of `WalRecord::single` with an `n`-byte event:
/// family tag (4) + event vec length (8) + event length (8) + n
pub fn single_payload_len(n: usize) -> u64 {
    20 + n as u64
}

/// Full frame size of `WalRecord::single` with an `n`-byte event
pub fn single_frame_len(n: usize) -> u64 {
    spillwal::wal::frame::framed_len(single_payload_len(n))
}

pub fn setup_root() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("wal");
    (temp_dir, root)
}

pub fn config(root: &Path, max_segment_size: u64) -> Config {
    Config::builder()
        .root_dir(root)
        .max_segment_size(max_segment_size)
        .fsync_policy(FsyncPolicy::EveryRecord)
        .build()
}

pub fn event(i: u64, len: usize) -> Vec<u8> {
    let mut bytes = format!("event-{i:06}").into_bytes();
    bytes.resize(len, b'.');
    bytes
}

pub fn record(i: u64, len: usize) -> WalRecord {
    WalRecord::single(EventFamily::Metrics, event(i, len))
}

/// Write `count` single-event records of `event_len` bytes and close
pub fn write_records(root: &Path, max_segment_size: u64, count: u64, event_len: usize) {
    let writer =
        SpilloverWriter::open(&config(root, max_segment_size), SequentialFramer::new(), None)
            .unwrap();
    for i in 1..=count {
        writer.append(&record(i, event_len)).unwrap();
    }
    writer.close().unwrap();
}

/// Segment files under `root`, in epoch order
pub fn segment_files(root: &Path) -> Vec<PathBuf> {
    spillwal::segment::list_segments(root)
        .unwrap()
        .into_iter()
        .map(|(_, path)| path)
        .collect()
}

pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}
