// SPDX-License-Identifier: PMPL-1.0-or-later
//
// SegLog commit log - Offset index
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The index maps a segment-relative offset to the position of its entry in
// the store. It is a dense array of fixed-width entries (big-endian):
//
//   [4 bytes: relative offset (u32)]
//   [8 bytes: store position (u64)]
//
// Entry k lives at byte k * ENTRY_WIDTH. Memory maps cannot grow, so the
// file is extended to its full capacity before mapping and cut back to the
// logical size on close.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::error::{LogError, LogResult};

/// Width of the relative offset field.
pub const OFFSET_WIDTH: u64 = 4;

/// Width of the store position field.
pub const POSITION_WIDTH: u64 = 8;

/// Width of one index entry.
pub const ENTRY_WIDTH: u64 = OFFSET_WIDTH + POSITION_WIDTH;

/// Memory-mapped offset index of one segment.
///
/// The mapping is owned exclusively by this value and never handed out.
/// Callers serialize access; the index does no locking of its own.
#[derive(Debug)]
pub struct Index {
    path: PathBuf,
    file: File,
    /// `None` once the index has been closed.
    mmap: Option<MmapMut>,
    /// Bytes holding real entries.
    size: u64,
    /// Length of the padded file and of the mapping.
    capacity: u64,
}

impl Index {
    /// Open (or create) the index at `path`, padding it to
    /// `max_index_bytes` before mapping.
    ///
    /// The logical size comes from the file length before padding. If the
    /// file was left padded by a crash, trailing entries whose relative
    /// offset does not match their entry number are discarded.
    pub fn open(path: impl AsRef<Path>, max_index_bytes: u64) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let whole_entries = file_len - file_len % ENTRY_WIDTH;
        let capacity = max_index_bytes.max(whole_entries);
        file.set_len(capacity)?;

        // SAFETY: the file is owned by this index for its whole lifetime and
        // is never resized while mapped.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut index = Self {
            path,
            file,
            mmap: Some(mmap),
            size: whole_entries,
            capacity,
        };
        index.trim_invalid_tail()?;

        debug!(
            path = %index.path.display(),
            entries = index.entries(),
            capacity,
            "Opened index"
        );

        Ok(index)
    }

    /// Read entry `entry`, or the last entry when `entry` is `-1`.
    ///
    /// Returns `(relative_offset, position)`. Fails with
    /// [`LogError::EndOfData`] on an empty index or past the logical end.
    pub fn read(&self, entry: i64) -> LogResult<(u32, u64)> {
        let mmap = self.mmap.as_ref().ok_or(LogError::Closed)?;
        if self.size == 0 {
            return Err(LogError::EndOfData {
                position: 0,
                size: 0,
            });
        }

        let entry = match entry {
            -1 => self.entries() - 1,
            n if n < 0 => {
                return Err(LogError::EndOfData {
                    position: 0,
                    size: self.size,
                })
            }
            n => n as u64,
        };

        let start = entry.saturating_mul(ENTRY_WIDTH);
        if start.saturating_add(ENTRY_WIDTH) > self.size {
            return Err(LogError::EndOfData {
                position: start,
                size: self.size,
            });
        }
        Ok(decode_entry(mmap, start as usize))
    }

    /// Append one entry after the last real one.
    ///
    /// Fails with [`LogError::EndOfData`] when the padded file has no room
    /// left; the owning segment treats that as capacity exhaustion.
    pub fn write(&mut self, relative_offset: u32, position: u64) -> LogResult<()> {
        let mmap = self.mmap.as_mut().ok_or(LogError::Closed)?;
        if self.size + ENTRY_WIDTH > self.capacity {
            return Err(LogError::EndOfData {
                position: self.size + ENTRY_WIDTH,
                size: self.capacity,
            });
        }

        let start = self.size as usize;
        let offset_end = start + OFFSET_WIDTH as usize;
        let entry_end = start + ENTRY_WIDTH as usize;
        mmap[start..offset_end].copy_from_slice(&relative_offset.to_be_bytes());
        mmap[offset_end..entry_end].copy_from_slice(&position.to_be_bytes());

        self.size += ENTRY_WIDTH;
        Ok(())
    }

    /// Returns `true` if the index can take at least one more entry.
    pub fn has_room(&self) -> bool {
        self.size + ENTRY_WIDTH <= self.capacity
    }

    /// Drop every entry from `entries` onwards.
    pub fn truncate(&mut self, entries: u64) -> LogResult<()> {
        let mmap = self.mmap.as_mut().ok_or(LogError::Closed)?;
        let new_size = entries.saturating_mul(ENTRY_WIDTH).min(self.size);
        mmap[new_size as usize..self.size as usize].fill(0);
        self.size = new_size;
        Ok(())
    }

    /// Push mapped entries to the file and the file to stable storage.
    pub fn sync(&self) -> LogResult<()> {
        let mmap = self.mmap.as_ref().ok_or(LogError::Closed)?;
        mmap.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Sync the map, sync the file, then cut the file back to its logical
    /// size. Closing twice is a no-op.
    pub fn close(&mut self) -> LogResult<()> {
        let Some(mmap) = self.mmap.take() else {
            return Ok(());
        };
        mmap.flush()?;
        self.file.sync_all()?;
        drop(mmap);

        self.file.set_len(self.size)?;
        self.file.sync_all()?;

        debug!(path = %self.path.display(), size = self.size, "Closed index");
        Ok(())
    }

    /// Bytes occupied by real entries.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Padded capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of real entries.
    pub fn entries(&self) -> u64 {
        self.size / ENTRY_WIDTH
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry k must carry relative offset k. Anything after the first entry
    /// that breaks this is padding from an unclean shutdown.
    fn trim_invalid_tail(&mut self) -> LogResult<()> {
        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(());
        };

        let recorded = self.entries();
        let mut valid = 0u64;
        let mut last_position = None;
        while valid < recorded {
            let (relative_offset, position) =
                decode_entry(mmap, (valid * ENTRY_WIDTH) as usize);
            let in_order = last_position.map_or(true, |last| position > last);
            if u64::from(relative_offset) != valid || !in_order {
                break;
            }
            last_position = Some(position);
            valid += 1;
        }

        if valid < recorded {
            warn!(
                path = %self.path.display(),
                recorded,
                valid,
                "Discarding index entries left by an unclean shutdown"
            );
            self.truncate(valid)?;
        }
        Ok(())
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(path = %self.path.display(), %error, "Failed to close index on drop");
        }
    }
}

fn decode_entry(mmap: &[u8], start: usize) -> (u32, u64) {
    let offset_end = start + OFFSET_WIDTH as usize;
    let entry_end = start + ENTRY_WIDTH as usize;
    let mut offset_bytes = [0u8; OFFSET_WIDTH as usize];
    let mut position_bytes = [0u8; POSITION_WIDTH as usize];
    offset_bytes.copy_from_slice(&mmap[start..offset_end]);
    position_bytes.copy_from_slice(&mmap[offset_end..entry_end]);
    (
        u32::from_be_bytes(offset_bytes),
        u64::from_be_bytes(position_bytes),
    )
}
