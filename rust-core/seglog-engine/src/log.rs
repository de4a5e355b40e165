// SPDX-License-Identifier: PMPL-1.0-or-later
//
// SegLog commit log - Segment manager
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `Log` presents one gap-free offset space over an ordered set of
// segments. Appends go to the active (newest) segment, which is rotated out
// once it reports itself maxed. Reads are routed to the segment whose range
// owns the offset. Retention removes whole segments from the old end.
//
// The segment set sits behind a single `RwLock`. Appends, rotation and
// truncation take it exclusively, so "select active segment, append,
// conditionally rotate" is one critical section and exactly one rotation
// happens per boundary. Reads share it.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{Config, SyncMode};
use crate::error::{LogError, LogResult};
use crate::record::Record;
use crate::segment::{list_base_offsets, Segment};
use crate::store::Store;

/// Segmented, append-only commit log.
#[derive(Debug)]
pub struct Log {
    dir: PathBuf,
    config: Config,
    state: RwLock<LogState>,
}

#[derive(Debug)]
struct LogState {
    /// Ordered by base offset; the last one is active. Empty only once the
    /// log is closed.
    segments: Vec<Segment>,
    closed: bool,
    last_sync: Instant,
}

impl LogState {
    fn active(&self) -> LogResult<&Segment> {
        match self.segments.last() {
            Some(segment) if !self.closed => Ok(segment),
            _ => Err(LogError::Closed),
        }
    }

    fn active_mut(&mut self) -> LogResult<&mut Segment> {
        if self.closed {
            return Err(LogError::Closed);
        }
        self.segments.last_mut().ok_or(LogError::Closed)
    }

    fn lowest_offset(&self) -> LogResult<u64> {
        self.active()?;
        self.segments
            .first()
            .map(Segment::base_offset)
            .ok_or(LogError::Closed)
    }

    fn not_found(&self, offset: u64) -> LogError {
        LogError::OffsetNotFound {
            offset,
            lowest: self.segments.first().map_or(0, Segment::base_offset),
            next: self.segments.last().map_or(0, Segment::next_offset),
        }
    }
}

impl Log {
    /// Open the log stored in `dir`, creating the directory if needed.
    ///
    /// Existing segments are rebuilt from their files in ascending base
    /// offset order and the newest becomes active. A fresh directory gets
    /// one empty segment at `config.segment.initial_offset`.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> LogResult<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();

        let segments = Self::load_segments(&dir, &config)?;
        let log = Self {
            dir,
            config,
            state: RwLock::new(LogState {
                segments,
                closed: false,
                last_sync: Instant::now(),
            }),
        };

        {
            let state = log.state.read();
            info!(
                dir = %log.dir.display(),
                segments = state.segments.len(),
                lowest_offset = ?state.segments.first().map(Segment::base_offset),
                next_offset = ?state.segments.last().map(Segment::next_offset),
                "Opened log"
            );
        }

        Ok(log)
    }

    /// Append `record` and return the offset assigned to it.
    ///
    /// If the active segment is out of index capacity, a new segment is
    /// started and the record lands there. Rotation is also checked after
    /// every append, so a segment may exceed its store bound by at most the
    /// last record written to it. A segment that is already maxed (left
    /// active by a crash or a failed rotation) is rotated out first.
    pub fn append(&self, mut record: Record) -> LogResult<u64> {
        let mut state = self.state.write();

        let active = state.active()?;
        if active.is_maxed() && !active.is_empty() {
            debug!(
                base_offset = active.base_offset(),
                "Active segment is already maxed; rotating before append"
            );
            self.rotate(&mut state)?;
        }

        let active = state.active_mut()?;
        let offset = match active.append(&mut record) {
            Ok(offset) => offset,
            Err(error) if error.is_capacity() && !active.is_empty() => {
                debug!(%error, "Active segment cannot take the record; rotating");
                self.rotate(&mut state)?;
                state.active_mut()?.append(&mut record)?
            }
            Err(error) => return Err(error),
        };

        if state.active()?.is_maxed() {
            self.rotate(&mut state)?;
        }
        self.maybe_sync(&mut state)?;

        Ok(offset)
    }

    /// Read the record at `offset`.
    pub fn read(&self, offset: u64) -> LogResult<Record> {
        let state = self.state.read();
        state.active()?;

        // Last segment whose base offset is <= offset.
        let owners = state
            .segments
            .partition_point(|segment| segment.base_offset() <= offset);
        let Some(segment) = owners.checked_sub(1).map(|i| &state.segments[i]) else {
            return Err(state.not_found(offset));
        };
        if !segment.contains(offset) {
            return Err(state.not_found(offset));
        }
        segment.read(offset)
    }

    /// Base offset of the oldest segment still held.
    pub fn lowest_offset(&self) -> LogResult<u64> {
        self.state.read().lowest_offset()
    }

    /// Offset of the newest record, or `None` if the log holds no records.
    pub fn highest_offset(&self) -> LogResult<Option<u64>> {
        let state = self.state.read();
        let lowest = state.lowest_offset()?;
        let next = state.active()?.next_offset();
        Ok((next > lowest).then(|| next - 1))
    }

    /// Offset the next appended record will receive.
    pub fn next_offset(&self) -> LogResult<u64> {
        Ok(self.state.read().active()?.next_offset())
    }

    /// Remove every segment whose records all lie below `lowest_to_keep`.
    /// The active segment is never removed. Returns the number of segments
    /// deleted.
    pub fn truncate(&self, lowest_to_keep: u64) -> LogResult<usize> {
        let mut state = self.state.write();
        state.active()?;

        let candidates = state.segments.len() - 1;
        let removable = state.segments[..candidates]
            .iter()
            .take_while(|segment| segment.next_offset() <= lowest_to_keep)
            .count();

        // Oldest first; a segment leaves the set only once its files are gone.
        for _ in 0..removable {
            state.segments[0].remove()?;
            state.segments.remove(0);
        }

        if removable > 0 {
            info!(
                lowest_to_keep,
                removed = removable,
                lowest_offset = state.lowest_offset()?,
                "Truncated log"
            );
        }
        Ok(removable)
    }

    /// Flush and sync the active segment to stable storage.
    pub fn sync(&self) -> LogResult<()> {
        let mut state = self.state.write();
        state.active()?.sync()?;
        state.last_sync = Instant::now();
        Ok(())
    }

    /// A reader over the raw store bytes of every segment, oldest first.
    ///
    /// The reader covers the bytes present when it was created. It fails
    /// if a segment it still has to read is removed or the log is closed.
    pub fn reader(&self) -> LogResult<LogReader> {
        let state = self.state.read();
        state.active()?;
        let stores = state
            .segments
            .iter()
            .map(|segment| (segment.store(), segment.store_size()))
            .collect();
        Ok(LogReader {
            stores,
            current: 0,
            position: 0,
        })
    }

    /// Close every segment, keeping the files. Closing twice is a no-op.
    pub fn close(&self) -> LogResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        for mut segment in state.segments.drain(..) {
            segment.close()?;
        }
        info!(dir = %self.dir.display(), "Closed log");
        Ok(())
    }

    /// Close the log and delete its directory.
    pub fn remove(&self) -> LogResult<()> {
        self.close()?;
        fs::remove_dir_all(&self.dir)?;
        info!(dir = %self.dir.display(), "Removed log");
        Ok(())
    }

    /// Delete every record and start over with one empty segment at the
    /// configured initial offset.
    pub fn reset(&self) -> LogResult<()> {
        self.remove()?;
        let segments = Self::load_segments(&self.dir, &self.config)?;

        let mut state = self.state.write();
        state.segments = segments;
        state.closed = false;
        state.last_sync = Instant::now();
        Ok(())
    }

    /// Number of segments currently held.
    pub fn segment_count(&self) -> usize {
        self.state.read().segments.len()
    }

    /// Directory holding the segment files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration the log was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Rebuild the segment set from `dir`, bootstrapping an empty segment if
    /// there is none.
    fn load_segments(dir: &Path, config: &Config) -> LogResult<Vec<Segment>> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            info!(dir = %dir.display(), "Created log directory");
        }

        let mut segments: Vec<Segment> = Vec::new();
        for base_offset in list_base_offsets(dir)? {
            let segment = Segment::open(dir, base_offset, config.segment)?;
            if let Some(previous) = segments.last() {
                if previous.next_offset() != base_offset {
                    warn!(
                        previous_base = previous.base_offset(),
                        previous_next = previous.next_offset(),
                        base_offset,
                        "Gap between recovered segments"
                    );
                }
            }
            segments.push(segment);
        }

        if segments.is_empty() {
            let initial_offset = config.segment.initial_offset;
            segments.push(Segment::open(dir, initial_offset, config.segment)?);
            info!(initial_offset, "Initialized fresh log");
        }

        Ok(segments)
    }

    /// Sync the active segment and start a new one at its next offset.
    fn rotate(&self, state: &mut LogState) -> LogResult<()> {
        let active = state.active()?;
        active.sync()?;

        let base_offset = active.next_offset();
        let previous_base = active.base_offset();
        let segment = Segment::open(&self.dir, base_offset, self.config.segment)?;
        state.segments.push(segment);
        state.last_sync = Instant::now();

        info!(
            previous_base,
            base_offset,
            segments = state.segments.len(),
            "Rotated log segment"
        );
        Ok(())
    }

    /// Sync the active segment if the configured mode asks for it.
    fn maybe_sync(&self, state: &mut LogState) -> LogResult<()> {
        let due = match self.config.sync_mode {
            SyncMode::Always => true,
            SyncMode::Interval(interval) => state.last_sync.elapsed() >= interval,
            SyncMode::Never => false,
        };
        if due {
            state.active()?.sync()?;
            state.last_sync = Instant::now();
        }
        Ok(())
    }
}

/// Sequential reader over the raw store bytes of a log, oldest segment
/// first. Created by [`Log::reader`].
#[derive(Debug)]
pub struct LogReader {
    /// Each store with the number of bytes to read from it.
    stores: Vec<(Arc<Store>, u64)>,
    current: usize,
    position: u64,
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some((store, size)) = self.stores.get(self.current) {
            let remaining = size - self.position;
            if remaining == 0 {
                self.current += 1;
                self.position = 0;
                continue;
            }
            if buf.is_empty() {
                return Ok(0);
            }

            let len = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            let read = store
                .read_at(&mut buf[..len], self.position)
                .map_err(io::Error::other)?;
            self.position += read as u64;
            return Ok(read);
        }
        Ok(0)
    }
}
