// SPDX-License-Identifier: PMPL-1.0-or-later
//
// SegLog commit log crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// An embeddable, segmented, append-only commit log. Records are opaque
// byte payloads; the log assigns each one a monotonically increasing
// offset and serves it back by that offset.
//
// # Architecture
//
// The log is a sequence of **segments** in one directory. Each segment
// covers a contiguous offset range and owns two files named after its base
// offset:
//
// ```text
// {base_offset}.store   [8 bytes: length (u64 BE)][length bytes: record]...
// {base_offset}.index   [4 bytes: relative offset (u32 BE)][8 bytes: position (u64 BE)]...
// ```
//
// The index is memory-mapped and padded to its configured capacity while
// open; closing cuts it back to the bytes in use. A segment is rotated out
// once its store or index reaches its configured bound. Restart rebuilds
// every segment from the index files alone.
//
// ## Usage
//
// ```no_run
// use seglog_engine::{Config, Log, Record};
//
// let log = Log::open("/tmp/seglog", Config::default()).unwrap();
//
// let offset = log.append(Record::new(b"hello".to_vec())).unwrap();
// let record = log.read(offset).unwrap();
// assert_eq!(record.value, b"hello");
//
// // Drop every segment that only holds offsets below 1000.
// log.truncate(1000).unwrap();
// log.close().unwrap();
// ```

pub mod config;
pub mod error;
pub mod index;
pub mod log;
pub mod record;
pub mod segment;
pub mod store;

// Re-export the primary public API for ergonomic imports.
pub use config::{Config, SegmentConfig, SyncMode};
pub use error::{LogError, LogResult};
pub use index::Index;
pub use log::{Log, LogReader};
pub use record::Record;
pub use segment::Segment;
pub use store::Store;

/// The two operations a service layer needs from a log.
pub trait CommitLog: Send + Sync {
    /// Assign the next offset to `record`, persist it and return the offset.
    fn append(&self, record: Record) -> LogResult<u64>;

    /// Fetch the record stored at `offset`.
    fn read(&self, offset: u64) -> LogResult<Record>;
}

impl CommitLog for Log {
    fn append(&self, record: Record) -> LogResult<u64> {
        Log::append(self, record)
    }

    fn read(&self, offset: u64) -> LogResult<Record> {
        Log::read(self, offset)
    }
}
