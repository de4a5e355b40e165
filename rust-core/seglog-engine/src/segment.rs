// SPDX-License-Identifier: PMPL-1.0-or-later
//
// SegLog commit log - Segments
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A segment pairs one store with one index and covers the contiguous offset
// range [base_offset, next_offset). Its files are named after the base
// offset (`{base_offset}.store`, `{base_offset}.index`) so the log can be
// rebuilt from a directory listing alone.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SegmentConfig;
use crate::error::{LogError, LogResult};
use crate::index::Index;
use crate::record::Record;
use crate::store::Store;

/// File extension of segment store files.
pub const STORE_EXTENSION: &str = "store";

/// File extension of segment index files.
pub const INDEX_EXTENSION: &str = "index";

/// Build the path of the store file for the segment at `base_offset`.
pub fn store_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{base_offset}.{STORE_EXTENSION}"))
}

/// Build the path of the index file for the segment at `base_offset`.
pub fn index_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{base_offset}.{INDEX_EXTENSION}"))
}

/// Parse the base offset from a store or index file name.
///
/// Returns `None` if the name does not match either pattern.
pub fn parse_segment_filename(name: &str) -> Option<u64> {
    let (stem, extension) = name.rsplit_once('.')?;
    if extension != STORE_EXTENSION && extension != INDEX_EXTENSION {
        return None;
    }
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse::<u64>().ok()
}

/// Scan a log directory and return the base offsets of every segment found,
/// ascending. A segment counts if either of its files exists.
///
/// Non-segment files in the directory are silently ignored.
pub fn list_base_offsets(dir: &Path) -> LogResult<Vec<u64>> {
    if !dir.is_dir() {
        return Err(LogError::DirectoryNotFound(dir.display().to_string()));
    }

    let mut base_offsets = BTreeSet::new();
    for dir_entry in fs::read_dir(dir)? {
        let dir_entry = dir_entry?;
        let file_name = dir_entry.file_name();
        if let Some(base_offset) = parse_segment_filename(&file_name.to_string_lossy()) {
            base_offsets.insert(base_offset);
        }
    }

    debug!(
        count = base_offsets.len(),
        dir = %dir.display(),
        "Discovered log segments"
    );

    Ok(base_offsets.into_iter().collect())
}

/// One store plus one index covering a contiguous offset range.
#[derive(Debug)]
pub struct Segment {
    base_offset: u64,
    next_offset: u64,
    store: Arc<Store>,
    index: Index,
    config: SegmentConfig,
    /// Set when a store append succeeded but the index write did not.
    sealed: bool,
}

impl Segment {
    /// Open the segment at `base_offset` in `dir`, creating its files if
    /// they do not exist.
    ///
    /// `next_offset` is recovered strictly from the index. Trailing index
    /// entries whose store bytes never reached the disk are dropped; store
    /// bytes that no index entry points at are ignored.
    ///
    /// Known limitation: index padding is zeroed, and a zeroed first entry
    /// reads as a valid `(0, 0)`. If a crash leaves a padded index with no
    /// real entries over a store that already holds its first record, that
    /// record is recovered as indexed.
    pub fn open(dir: &Path, base_offset: u64, config: SegmentConfig) -> LogResult<Self> {
        let store = Store::open(store_path(dir, base_offset))?;
        let mut index = Index::open(index_path(dir, base_offset), config.max_index_bytes)?;

        let indexed = index.entries();
        while index.entries() > 0 {
            let (_, position) = index.read(-1)?;
            match store.read(position) {
                Ok(_) => break,
                Err(LogError::EndOfData { .. } | LogError::TruncatedEntry { .. }) => {
                    index.truncate(index.entries() - 1)?;
                }
                Err(error) => return Err(error),
            }
        }
        if index.entries() < indexed {
            warn!(
                base_offset,
                indexed,
                recovered = index.entries(),
                "Dropped index entries pointing past the end of the store"
            );
        }

        let next_offset = base_offset + index.entries();

        debug!(
            base_offset,
            next_offset,
            store_size = store.size(),
            "Opened segment"
        );

        Ok(Self {
            base_offset,
            next_offset,
            store: Arc::new(store),
            index,
            config,
            sealed: false,
        })
    }

    /// Assign the next offset to `record`, persist it and return the
    /// assigned offset.
    ///
    /// Index capacity is checked before the store is touched, so a full
    /// segment rejects the record with [`LogError::IndexFull`] and stays
    /// clean. If the index write fails after the store append succeeded,
    /// the segment is sealed and refuses further appends.
    pub fn append(&mut self, record: &mut Record) -> LogResult<u64> {
        if self.sealed {
            return Err(LogError::SegmentSealed {
                base_offset: self.base_offset,
            });
        }

        let relative = self.next_offset - self.base_offset;
        let Ok(relative) = u32::try_from(relative) else {
            return Err(self.index_full());
        };
        if !self.index.has_room() {
            return Err(self.index_full());
        }

        let offset = self.next_offset;
        record.offset = offset;
        let (_, position) = self.store.append(&record.encode())?;

        if let Err(error) = self.index.write(relative, position) {
            self.sealed = true;
            warn!(
                base_offset = self.base_offset,
                offset,
                position,
                %error,
                "Index write failed after store append; sealing segment"
            );
            return Err(match error {
                LogError::EndOfData { .. } => self.index_full(),
                other => other,
            });
        }

        self.next_offset += 1;
        Ok(offset)
    }

    /// Read the record at absolute `offset`.
    pub fn read(&self, offset: u64) -> LogResult<Record> {
        if !self.contains(offset) {
            return Err(LogError::OffsetNotFound {
                offset,
                lowest: self.base_offset,
                next: self.next_offset,
            });
        }

        let relative = (offset - self.base_offset) as i64;
        let (_, position) = self.index.read(relative)?;
        let bytes = self.store.read(position)?;
        Record::decode(&bytes, offset)
    }

    /// Returns `true` once the store or the index has reached its configured
    /// bound, or the segment was sealed.
    pub fn is_maxed(&self) -> bool {
        self.sealed
            || self.store.size() >= self.config.max_store_bytes
            || self.index.size() >= self.config.max_index_bytes
    }

    /// Returns `true` if `offset` lies in `[base_offset, next_offset)`.
    pub fn contains(&self, offset: u64) -> bool {
        self.base_offset <= offset && offset < self.next_offset
    }

    /// Flush the store and sync both files to stable storage.
    pub fn sync(&self) -> LogResult<()> {
        self.store.flush()?;
        self.index.sync()
    }

    /// Close the store and the index, keeping the files.
    pub fn close(&mut self) -> LogResult<()> {
        self.store.close()?;
        self.index.close()
    }

    /// Close the segment and delete both of its files. The segment is
    /// unusable afterwards.
    pub fn remove(&mut self) -> LogResult<()> {
        self.close()?;
        fs::remove_file(self.store.path())?;
        fs::remove_file(self.index.path())?;
        debug!(base_offset = self.base_offset, "Removed segment");
        Ok(())
    }

    /// Absolute offset of the first record this segment holds.
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Absolute offset the next appended record will receive.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Returns `true` if no record has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.next_offset == self.base_offset
    }

    /// Logical store size in bytes.
    pub fn store_size(&self) -> u64 {
        self.store.size()
    }

    /// Logical index size in bytes.
    pub fn index_size(&self) -> u64 {
        self.index.size()
    }

    /// Shared handle to the store, for raw sequential reads.
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    fn index_full(&self) -> LogError {
        LogError::IndexFull {
            base_offset: self.base_offset,
            capacity: self.index.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ENTRY_WIDTH;
    use crate::record::RECORD_HEADER_SIZE;
    use crate::store::LEN_WIDTH;
    use std::fs::File;
    use tempfile::TempDir;

    fn config(max_store_bytes: u64, max_index_bytes: u64) -> SegmentConfig {
        SegmentConfig {
            max_store_bytes,
            max_index_bytes,
            initial_offset: 0,
        }
    }

    #[test]
    fn test_segment_filenames() {
        let dir = Path::new("/var/log/seglog");
        assert_eq!(store_path(dir, 16), dir.join("16.store"));
        assert_eq!(index_path(dir, 0), dir.join("0.index"));
    }

    #[test]
    fn test_parse_segment_filename() {
        assert_eq!(parse_segment_filename("42.store"), Some(42));
        assert_eq!(parse_segment_filename("0.index"), Some(0));
        assert_eq!(parse_segment_filename("42.log"), None);
        assert_eq!(parse_segment_filename(".store"), None);
        assert_eq!(parse_segment_filename("-1.index"), None);
        assert_eq!(parse_segment_filename("abc.store"), None);
        assert_eq!(parse_segment_filename(""), None);
    }

    #[test]
    fn test_list_base_offsets_sorted_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        for name in ["100.store", "100.index", "3.store", "3.index", "50.index"] {
            File::create(dir.path().join(name)).unwrap();
        }
        File::create(dir.path().join("readme.txt")).unwrap();

        assert_eq!(list_base_offsets(dir.path()).unwrap(), vec![3, 50, 100]);
    }

    #[test]
    fn test_list_base_offsets_nonexistent_dir() {
        assert!(matches!(
            list_base_offsets(Path::new("/nonexistent/seglog/dir")),
            Err(LogError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 3 * ENTRY_WIDTH)).unwrap();
        assert_eq!(segment.next_offset(), 16);
        assert!(segment.is_empty());

        for i in 0..3u64 {
            let mut record = Record::new(b"hello world".to_vec());
            let offset = segment.append(&mut record).unwrap();
            assert_eq!(offset, 16 + i);
            assert_eq!(record.offset, offset);

            let read = segment.read(offset).unwrap();
            assert_eq!(read.value, b"hello world");
            assert_eq!(read.offset, offset);
        }

        assert!(segment.is_maxed());
        assert!(matches!(
            segment.append(&mut Record::new(b"x".to_vec())),
            Err(LogError::IndexFull { base_offset: 16, .. })
        ));
        // The rejected record left no bytes behind.
        let width = LEN_WIDTH + (RECORD_HEADER_SIZE + 11) as u64;
        assert_eq!(segment.store_size(), 3 * width);
    }

    #[test]
    fn test_read_outside_range_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 10, config(1024, 1024)).unwrap();
        segment.append(&mut Record::new(b"a".to_vec())).unwrap();

        assert!(matches!(
            segment.read(9),
            Err(LogError::OffsetNotFound { offset: 9, .. })
        ));
        assert!(matches!(
            segment.read(11),
            Err(LogError::OffsetNotFound { offset: 11, .. })
        ));
    }

    #[test]
    fn test_maxed_by_store_size() {
        let dir = TempDir::new().unwrap();
        let value = vec![7u8; 100];
        let width = LEN_WIDTH + (RECORD_HEADER_SIZE + value.len()) as u64;
        let mut segment = Segment::open(dir.path(), 0, config(width * 2, 1024)).unwrap();

        segment.append(&mut Record::new(value.clone())).unwrap();
        assert!(!segment.is_maxed());
        segment.append(&mut Record::new(value)).unwrap();
        assert!(segment.is_maxed());
    }

    #[test]
    fn test_reopen_recovers_next_offset() {
        let dir = TempDir::new().unwrap();
        let cfg = config(1024, 1024);
        {
            let mut segment = Segment::open(dir.path(), 5, cfg).unwrap();
            for _ in 0..4 {
                segment.append(&mut Record::new(b"abc".to_vec())).unwrap();
            }
            segment.close().unwrap();
        }

        let segment = Segment::open(dir.path(), 5, cfg).unwrap();
        assert_eq!(segment.next_offset(), 9);
        assert_eq!(segment.read(8).unwrap().value, b"abc");
    }

    #[test]
    fn test_reopen_ignores_unindexed_store_tail() {
        let dir = TempDir::new().unwrap();
        let cfg = config(1024, 1024);
        {
            let mut segment = Segment::open(dir.path(), 0, cfg).unwrap();
            segment.append(&mut Record::new(b"indexed".to_vec())).unwrap();
            segment.close().unwrap();
        }
        {
            // A store append whose index entry never made it to disk.
            let store = Store::open(store_path(dir.path(), 0)).unwrap();
            store.append(b"garbage").unwrap();
            store.close().unwrap();
        }

        let mut segment = Segment::open(dir.path(), 0, cfg).unwrap();
        assert_eq!(segment.next_offset(), 1);
        let offset = segment.append(&mut Record::new(b"next".to_vec())).unwrap();
        assert_eq!(offset, 1);
        assert_eq!(segment.read(1).unwrap().value, b"next");
        assert_eq!(segment.read(0).unwrap().value, b"indexed");
    }

    #[test]
    fn test_reopen_drops_index_entries_without_store_bytes() {
        let dir = TempDir::new().unwrap();
        let cfg = config(1024, 1024);
        {
            let mut segment = Segment::open(dir.path(), 0, cfg).unwrap();
            segment.append(&mut Record::new(b"one".to_vec())).unwrap();
            segment.append(&mut Record::new(b"two".to_vec())).unwrap();
            segment.close().unwrap();
        }
        {
            // Lose the last store entry, as a crash before the buffered
            // writer flushed would.
            let path = store_path(dir.path(), 0);
            let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
            let len = file.metadata().unwrap().len();
            file.set_len(len - 2).unwrap();
        }

        let segment = Segment::open(dir.path(), 0, cfg).unwrap();
        assert_eq!(segment.next_offset(), 1);
        assert_eq!(segment.read(0).unwrap().value, b"one");
    }

    #[test]
    fn test_zeroed_first_index_entry_recovers_first_record() {
        let dir = TempDir::new().unwrap();
        let cfg = config(1024 * 1024, 1024);
        {
            // A store write that bypassed the buffer, then a crash before
            // the index entry was written into the padded index file.
            let store = Store::open(store_path(dir.path(), 0)).unwrap();
            let record = Record {
                value: vec![9u8; 10_000],
                offset: 0,
            };
            store.append(&record.encode()).unwrap();
            store.close().unwrap();
            fs::write(index_path(dir.path(), 0), vec![0u8; 10 * ENTRY_WIDTH as usize]).unwrap();
        }

        let segment = Segment::open(dir.path(), 0, cfg).unwrap();
        assert_eq!(segment.next_offset(), 1);
        assert_eq!(segment.read(0).unwrap().value.len(), 10_000);
    }

    #[test]
    fn test_remove_deletes_files() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 0, config(1024, 1024)).unwrap();
        segment.append(&mut Record::new(b"bye".to_vec())).unwrap();

        segment.remove().unwrap();
        assert!(!store_path(dir.path(), 0).exists());
        assert!(!index_path(dir.path(), 0).exists());
    }

    #[test]
    fn test_close_truncates_index_file() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 0, config(1024, 1024)).unwrap();
        segment.append(&mut Record::new(b"a".to_vec())).unwrap();
        segment.append(&mut Record::new(b"b".to_vec())).unwrap();
        segment.close().unwrap();

        let len = fs::metadata(index_path(dir.path(), 0)).unwrap().len();
        assert_eq!(len, 2 * ENTRY_WIDTH);
    }
}
