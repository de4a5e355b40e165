// SPDX-License-Identifier: PMPL-1.0-or-later
//
// SegLog commit log - Record type and codec
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A record is an opaque payload plus the offset the log assigned to it.
// Segments store records in the following binary form (big-endian), which
// the store then frames with its own length prefix:
//
//   [8 bytes: offset (u64)]
//   [4 bytes: crc32 of value]
//   [N bytes: value]

use crc32fast::Hasher as Crc32Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};

/// Size of the fixed record header (offset + crc32).
pub const RECORD_HEADER_SIZE: usize = 8 + 4;

/// A single record held by the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque payload bytes.
    pub value: Vec<u8>,

    /// Offset assigned by the log at append time. Any value supplied by the
    /// caller is overwritten.
    pub offset: u64,
}

impl Record {
    /// Create a record carrying `value`. The offset is filled in on append.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            offset: 0,
        }
    }

    /// Serialize this record to its segment binary form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(RECORD_HEADER_SIZE + self.value.len());
        buffer.extend_from_slice(&self.offset.to_be_bytes());
        buffer.extend_from_slice(&compute_crc32(&self.value).to_be_bytes());
        buffer.extend_from_slice(&self.value);
        buffer
    }

    /// Deserialize a record that was stored for `expected_offset`.
    ///
    /// Fails with [`LogError::CorruptRecord`] if the buffer is too short, the
    /// embedded offset differs or the checksum does not match.
    pub fn decode(bytes: &[u8], expected_offset: u64) -> LogResult<Self> {
        let corrupt = |reason: String| LogError::CorruptRecord {
            offset: expected_offset,
            reason,
        };

        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(corrupt(format!(
                "record is {} bytes, header needs {RECORD_HEADER_SIZE}",
                bytes.len()
            )));
        }

        let (offset_bytes, rest) = bytes.split_at(8);
        let (crc_bytes, value) = rest.split_at(4);
        let offset = u64::from_be_bytes(
            offset_bytes
                .try_into()
                .map_err(|_| corrupt("malformed offset field".to_string()))?,
        );
        let stored_crc = u32::from_be_bytes(
            crc_bytes
                .try_into()
                .map_err(|_| corrupt("malformed checksum field".to_string()))?,
        );

        if offset != expected_offset {
            return Err(corrupt(format!("record carries offset {offset}")));
        }

        let actual_crc = compute_crc32(value);
        if actual_crc != stored_crc {
            return Err(corrupt(format!(
                "checksum mismatch: expected {stored_crc:#010x}, got {actual_crc:#010x}"
            )));
        }

        Ok(Self {
            value: value.to_vec(),
            offset,
        })
    }
}

/// Compute a CRC32 checksum over the given data.
fn compute_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
