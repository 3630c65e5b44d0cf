mod btree;
mod lsm;
mod memory;

pub use {btree::BTreeNeedleMap, lsm::LsmNeedleMap, memory::MemoryNeedleMap};

use crate::{compact_map::NeedleValue, file_id::NeedleKey, Result};
use byteorder::{BigEndian, ByteOrder};
use std::{
    fs::File,
    io::{Seek, SeekFrom, Write},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

/// Size of one index file entry: key, offset/8 and size
pub const NEEDLE_INDEX_SIZE: u32 = 16;

/// Which needle index back-end a volume uses
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum NeedleMapKind {
    /// Compact in-memory map, rebuilt from the index file on every load
    #[default]
    Memory,

    /// Single-file B+tree store (`<name>.bdb`)
    BTree,

    /// LSM store directory (`<name>.ldb`)
    Lsm,
}

/// Contract shared by all needle index back-ends
///
/// The index file is the source of truth: every mutation appends its
/// 16-byte entry there *before* the back-end is touched, so a crash
/// mid-operation leaves the back-end stale but recoverable by replay.
pub trait NeedleMapper: Send + Sync {
    /// Records a needle location.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the index file append or the back-end
    /// update fails.
    fn put(&self, key: NeedleKey, offset: u32, size: u32) -> Result<()>;

    /// Looks up a live needle location. Tombstoned keys are absent.
    fn get(&self, key: NeedleKey) -> Option<NeedleValue>;

    /// Tombstones a key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the index file append or the back-end
    /// update fails.
    fn delete(&self, key: NeedleKey) -> Result<()>;

    /// Flushes and releases what can be released without consuming the
    /// map.
    fn close(&self);

    /// Removes the index file and any back-end files.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn destroy(&self) -> Result<()>;

    /// Total bytes of live content ever put.
    fn content_size(&self) -> u64;

    /// Total bytes freed by deletes and overwrites.
    fn deleted_size(&self) -> u64;

    /// Number of puts recorded.
    fn file_count(&self) -> u64;

    /// Number of deletes and overwrites recorded.
    fn deleted_count(&self) -> u64;

    /// Largest key ever put.
    fn max_file_key(&self) -> u64;

    /// Current size of the index file in bytes.
    fn index_file_size(&self) -> u64;

    /// Path of the index file.
    fn index_file_path(&self) -> &Path;
}

/// Put/delete counters every back-end maintains
#[derive(Default)]
pub(crate) struct MapMetric {
    file_counter: AtomicU64,
    deletion_counter: AtomicU64,
    file_byte_counter: AtomicU64,
    deletion_byte_counter: AtomicU64,
    maximum_file_key: AtomicU64,
}

impl MapMetric {
    pub fn log_put(&self, key: NeedleKey, old_size: u32, new_size: u32) {
        self.maximum_file_key.fetch_max(key, Ordering::Relaxed);
        self.file_counter.fetch_add(1, Ordering::Relaxed);
        self.file_byte_counter
            .fetch_add(u64::from(new_size), Ordering::Relaxed);
        if old_size > 0 {
            self.deletion_counter.fetch_add(1, Ordering::Relaxed);
            self.deletion_byte_counter
                .fetch_add(u64::from(old_size), Ordering::Relaxed);
        }
    }

    pub fn log_delete(&self, deleted_bytes: u32) {
        self.deletion_counter.fetch_add(1, Ordering::Relaxed);
        self.deletion_byte_counter
            .fetch_add(u64::from(deleted_bytes), Ordering::Relaxed);
    }

    pub fn content_size(&self) -> u64 {
        self.file_byte_counter.load(Ordering::Relaxed)
    }

    pub fn deleted_size(&self) -> u64 {
        self.deletion_byte_counter.load(Ordering::Relaxed)
    }

    pub fn file_count(&self) -> u64 {
        self.file_counter.load(Ordering::Relaxed)
    }

    pub fn deleted_count(&self) -> u64 {
        self.deletion_counter.load(Ordering::Relaxed)
    }

    pub fn max_file_key(&self) -> u64 {
        self.maximum_file_key.load(Ordering::Relaxed)
    }
}

/// Append-only handle on a volume's `.idx` file
///
/// Appends are serialized through a mutex so concurrent entries cannot
/// interleave.
pub(crate) struct IndexFile {
    file: Mutex<File>,
    path: PathBuf,
}

impl IndexFile {
    pub fn new(file: File, path: PathBuf) -> Self {
        Self {
            file: Mutex::new(file),
            path,
        }
    }

    pub fn append_entry(&self, key: NeedleKey, offset: u32, size: u32) -> Result<()> {
        let mut bytes = [0u8; NEEDLE_INDEX_SIZE as usize];
        BigEndian::write_u64(&mut bytes[0..8], key);
        BigEndian::write_u32(&mut bytes[8..12], offset);
        BigEndian::write_u32(&mut bytes[12..16], size);

        let mut file = self.file.lock().expect("lock is poisoned");
        file.seek(SeekFrom::End(0))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        let file = self.file.lock().expect("lock is poisoned");
        file.metadata().map_or(0, |m| m.len())
    }

    pub fn sync(&self) {
        let file = self.file.lock().expect("lock is poisoned");
        if let Err(e) = file.sync_all() {
            log::warn!("cannot sync index file {}: {e}", self.path.display());
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decodes one 16-byte index entry.
pub(crate) fn index_entry(bytes: &[u8]) -> (NeedleKey, u32, u32) {
    let key = BigEndian::read_u64(&bytes[0..8]);
    let offset = BigEndian::read_u32(&bytes[8..12]);
    let size = BigEndian::read_u32(&bytes[12..16]);
    (key, offset, size)
}

const ROWS_TO_READ: usize = 1024;

/// Walks an index file sequentially, calling `f` with each
/// `(key, offset, size)` entry. Stops with the first error from `f`.
///
/// A torn trailing entry (fewer than 16 bytes) is ignored; the
/// integrity check flags it separately.
///
/// # Errors
///
/// Will return `Err` if an IO error occurs or `f` fails.
pub fn walk_index_file<F>(file: &File, mut f: F) -> Result<()>
where
    F: FnMut(NeedleKey, u32, u32) -> Result<()>,
{
    let mut reader_offset = 0u64;
    let mut bytes = vec![0u8; NEEDLE_INDEX_SIZE as usize * ROWS_TO_READ];

    loop {
        let count = file.read_at(&mut bytes, reader_offset)?;
        let mut i = 0;
        while i + NEEDLE_INDEX_SIZE as usize <= count {
            let (key, offset, size) = index_entry(&bytes[i..i + NEEDLE_INDEX_SIZE as usize]);
            f(key, offset, size)?;
            i += NEEDLE_INDEX_SIZE as usize;
        }
        if i == 0 {
            return Ok(());
        }
        reader_offset += i as u64;
    }
}

/// Replays an index file into `put` and `delete` callbacks, the way
/// every back-end rebuilds itself.
pub(crate) fn replay_index_file<P, D>(file: &File, mut put: P, mut delete: D) -> Result<()>
where
    P: FnMut(NeedleKey, u32, u32) -> Result<()>,
    D: FnMut(NeedleKey) -> Result<()>,
{
    walk_index_file(file, |key, offset, size| {
        if offset > 0 {
            put(key, offset, size)
        } else {
            delete(key)
        }
    })
}

/// Replays the index file into a throwaway compact map to recover the
/// put/delete counters for a durable back-end.
pub(crate) fn load_metric(index_file: &File) -> Result<MapMetric> {
    let metric = MapMetric::default();
    let map = crate::compact_map::CompactMap::new();
    replay_index_file(
        index_file,
        |key, offset, size| {
            metric.log_put(key, map.set(key, offset, size), size);
            Ok(())
        },
        |key| {
            metric.log_delete(map.delete(key));
            Ok(())
        },
    )?;
    Ok(metric)
}

/// Returns whether the back-end file at `db_path` is newer than the
/// index file, i.e. does not need to be rebuilt by replay.
pub(crate) fn is_back_end_fresh(db_path: &Path, index_path: &Path) -> bool {
    let db_modified = std::fs::metadata(db_path).and_then(|m| m.modified());
    let index_modified = std::fs::metadata(index_path).and_then(|m| m.modified());
    match (db_modified, index_modified) {
        (Ok(db), Ok(index)) => db > index,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use test_log::test;

    #[test]
    fn index_entries_walk_in_order() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("1.idx");
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let index = IndexFile::new(file.try_clone()?, path);
        index.append_entry(1, 1, 10)?;
        index.append_entry(2, 5, 20)?;
        index.append_entry(1, 0, 0)?;
        assert_eq!(48, index.size());

        let mut seen = Vec::new();
        walk_index_file(&file, |key, offset, size| {
            seen.push((key, offset, size));
            Ok(())
        })?;
        assert_eq!(vec![(1, 1, 10), (2, 5, 20), (1, 0, 0)], seen);
        Ok(())
    }

    #[test]
    fn walk_ignores_torn_tail() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("1.idx");
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let index = IndexFile::new(file.try_clone()?, path);
        index.append_entry(1, 1, 10)?;
        file.set_len(20).unwrap();

        let mut seen = 0;
        walk_index_file(&file, |_, _, _| {
            seen += 1;
            Ok(())
        })?;
        assert_eq!(1, seen);
        Ok(())
    }
}
