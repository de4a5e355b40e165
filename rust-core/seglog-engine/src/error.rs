// SPDX-License-Identifier: PMPL-1.0-or-later
//
// SegLog commit log - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Defines every error condition the log engine can report: I/O failures,
// reads past the logical end of a store or index, capacity exhaustion,
// missing offsets and corrupted records.

use thiserror::Error;

/// Errors that can occur during commit log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// An I/O error occurred while reading or writing a store or index file.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read addressed bytes beyond the logical size of a store or index.
    /// An empty index reports this for the "last entry" probe.
    #[error("end of data: position {position} is beyond logical size {size}")]
    EndOfData {
        /// The byte position that was requested.
        position: u64,
        /// The logical size of the file at the time of the read.
        size: u64,
    },

    /// A store entry declares more payload bytes than the file holds.
    /// This happens when a crash interrupts a buffered write.
    #[error("truncated store entry at position {position}: declared {declared} bytes, {available} available")]
    TruncatedEntry {
        /// Position of the entry's length prefix.
        position: u64,
        /// Payload length declared by the prefix.
        declared: u64,
        /// Payload bytes actually present after the prefix.
        available: u64,
    },

    /// The index of the segment cannot take another entry.
    #[error("index of segment {base_offset} is full (capacity {capacity} bytes)")]
    IndexFull {
        /// Base offset of the segment owning the index.
        base_offset: u64,
        /// Pre-allocated capacity of the index file in bytes.
        capacity: u64,
    },

    /// The segment was left with a store entry its index could not record
    /// and no longer accepts appends.
    #[error("segment {base_offset} is sealed after a partial append")]
    SegmentSealed {
        /// Base offset of the sealed segment.
        base_offset: u64,
    },

    /// The requested offset has never been assigned or has been truncated.
    #[error("offset {offset} not found (log holds [{lowest}, {next}))")]
    OffsetNotFound {
        /// The requested absolute offset.
        offset: u64,
        /// Lowest offset still held by the log.
        lowest: u64,
        /// Offset that the next append will receive.
        next: u64,
    },

    /// A stored record failed to decode or its checksum did not match.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord {
        /// The offset that was being read.
        offset: u64,
        /// What the decoder rejected.
        reason: String,
    },

    /// The store, segment or log has already been closed.
    #[error("log is closed")]
    Closed,

    /// The supplied configuration cannot be used.
    #[error("invalid log configuration: {0}")]
    InvalidConfig(String),

    /// The storage path exists but is not a directory.
    #[error("log directory not found or inaccessible: {0}")]
    DirectoryNotFound(String),
}

impl LogError {
    /// Returns `true` for errors that mean "this segment cannot take more
    /// appends" and should trigger a rotation rather than fail the caller.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::IndexFull { .. } | Self::SegmentSealed { .. })
    }
}

/// Convenience type alias for log results.
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_offset_not_found() {
        let error = LogError::OffsetNotFound {
            offset: 42,
            lowest: 10,
            next: 20,
        };
        let message = format!("{error}");
        assert!(message.contains("42"));
        assert!(message.contains("[10, 20)"));
    }

    #[test]
    fn test_error_display_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file gone");
        let error = LogError::Io(io_error);
        let message = format!("{error}");
        assert!(message.contains("file gone"));
    }

    #[test]
    fn test_error_display_truncated_entry() {
        let error = LogError::TruncatedEntry {
            position: 128,
            declared: 999_999,
            available: 3,
        };
        let message = format!("{error}");
        assert!(message.contains("128"));
        assert!(message.contains("999999"));
    }

    #[test]
    fn test_capacity_classification() {
        assert!(LogError::IndexFull {
            base_offset: 0,
            capacity: 36
        }
        .is_capacity());
        assert!(LogError::SegmentSealed { base_offset: 3 }.is_capacity());
        assert!(!LogError::Closed.is_capacity());
    }
}
