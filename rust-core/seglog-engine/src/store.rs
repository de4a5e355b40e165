// SPDX-License-Identifier: PMPL-1.0-or-later
//
// SegLog commit log - Record store
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The store is the append-only byte file of a segment. Every entry is an
// 8-byte big-endian length followed by that many payload bytes; a
// "position" is the byte offset of an entry's length field.
//
// Writes go through a `BufWriter` to amortize syscalls. The writer and the
// logical size share one mutex with the read path, so a read flushes and
// then reads as a single critical section and always observes every append
// that completed before it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{LogError, LogResult};

/// Width of the length prefix written before every payload.
pub const LEN_WIDTH: u64 = 8;

/// Append-only, length-prefixed record file.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    inner: Mutex<Option<StoreInner>>,
}

#[derive(Debug)]
struct StoreInner {
    writer: BufWriter<File>,
    /// Logical size, including bytes still sitting in the buffer.
    size: u64,
}

impl StoreInner {
    /// Flush buffered bytes and read exactly `buf.len()` bytes at `position`.
    fn read_exact_at(&mut self, buf: &mut [u8], position: u64) -> LogResult<()> {
        let end = position.saturating_add(buf.len() as u64);
        if end > self.size {
            return Err(LogError::EndOfData {
                position: end,
                size: self.size,
            });
        }
        self.writer.flush()?;
        let mut file = self.writer.get_ref();
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

impl Store {
    /// Open (or create) the store file at `path`. Existing content is kept
    /// and new entries are appended after it.
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let size = file.metadata()?.len();

        debug!(path = %path.display(), size, "Opened store");

        Ok(Self {
            path,
            inner: Mutex::new(Some(StoreInner {
                writer: BufWriter::new(file),
                size,
            })),
        })
    }

    /// Append one framed entry. Returns `(bytes_written, position)` where
    /// `position` is where the entry's length prefix begins.
    pub fn append(&self, payload: &[u8]) -> LogResult<(u64, u64)> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(LogError::Closed)?;

        let position = inner.size;
        inner
            .writer
            .write_all(&(payload.len() as u64).to_be_bytes())?;
        inner.writer.write_all(payload)?;

        let written = LEN_WIDTH + payload.len() as u64;
        inner.size += written;
        Ok((written, position))
    }

    /// Read the payload of the entry whose length prefix starts at
    /// `position`.
    pub fn read(&self, position: u64) -> LogResult<Vec<u8>> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(LogError::Closed)?;

        let mut len_bytes = [0u8; LEN_WIDTH as usize];
        inner.read_exact_at(&mut len_bytes, position)?;
        let declared = u64::from_be_bytes(len_bytes);

        let payload_start = position + LEN_WIDTH;
        let available = inner.size - payload_start;
        if declared > available {
            return Err(LogError::TruncatedEntry {
                position,
                declared,
                available,
            });
        }

        let mut payload = vec![0u8; declared as usize];
        inner.read_exact_at(&mut payload, payload_start)?;
        Ok(payload)
    }

    /// Raw positional read of exactly `buf.len()` bytes starting at
    /// `offset`. Returns the number of bytes read.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> LogResult<usize> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(LogError::Closed)?;
        inner.read_exact_at(buf, offset)?;
        Ok(buf.len())
    }

    /// Flush buffered bytes and fsync the file.
    pub fn flush(&self) -> LogResult<()> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(LogError::Closed)?;
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Flush, fsync and release the file. Closing twice is a no-op.
    pub fn close(&self) -> LogResult<()> {
        let Some(mut inner) = self.inner.lock().take() else {
            return Ok(());
        };
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        debug!(path = %self.path.display(), size = inner.size, "Closed store");
        Ok(())
    }

    /// Logical size in bytes, including buffered but unflushed entries.
    /// A closed store reports zero.
    pub fn size(&self) -> u64 {
        self.inner.lock().as_ref().map_or(0, |inner| inner.size)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
