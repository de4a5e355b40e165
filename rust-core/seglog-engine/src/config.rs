// SPDX-License-Identifier: PMPL-1.0-or-later
//! Log configuration.
//!
//! Size bounds are checked after every append, so a segment may overshoot
//! `max_store_bytes` by at most one record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};
use crate::index::ENTRY_WIDTH;

/// Default maximum store size per segment (64 MiB).
pub const DEFAULT_MAX_STORE_BYTES: u64 = 64 * 1024 * 1024;

/// Default maximum index size per segment (1 MiB, 87 381 entries).
pub const DEFAULT_MAX_INDEX_BYTES: u64 = 1024 * 1024;

/// Controls how aggressively appends are pushed to stable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Flush and fsync the store and msync the index after every append.
    Always,
    /// Sync at most once per interval. Appends in between may be lost on
    /// crash.
    Interval(Duration),
    /// Never sync on append; data reaches disk on rotation, `sync()` and
    /// `close()`.
    #[default]
    Never,
}

/// Per-segment size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// A segment is maxed once its store reaches this many bytes.
    pub max_store_bytes: u64,
    /// Pre-allocated index capacity. A segment is maxed once its index
    /// reaches this many bytes.
    pub max_index_bytes: u64,
    /// Base offset of the first segment of a fresh log.
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: DEFAULT_MAX_STORE_BYTES,
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
            initial_offset: 0,
        }
    }
}

/// Configuration for a [`Log`](crate::Log).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Segment size bounds.
    pub segment: SegmentConfig,
    /// Durability policy for appends.
    pub sync_mode: SyncMode,
}

impl Config {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> LogResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LogError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bounds that would make every segment unusable.
    pub fn validate(&self) -> LogResult<()> {
        if self.segment.max_store_bytes == 0 {
            return Err(LogError::InvalidConfig(
                "max_store_bytes must be greater than zero".to_string(),
            ));
        }
        if self.segment.max_index_bytes < ENTRY_WIDTH {
            return Err(LogError::InvalidConfig(format!(
                "max_index_bytes must hold at least one {ENTRY_WIDTH}-byte entry, got {}",
                self.segment.max_index_bytes
            )));
        }
        if let SyncMode::Interval(interval) = self.sync_mode {
            if interval.is_zero() {
                return Err(LogError::InvalidConfig(
                    "sync interval must be non-zero; use `always` instead".to_string(),
                ));
            }
        }
        Ok(())
    }
}
