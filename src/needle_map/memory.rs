use super::{replay_index_file, IndexFile, MapMetric, NeedleMapper};
use crate::{
    compact_map::{CompactMap, NeedleValue},
    file_id::NeedleKey,
    Result,
};
use std::{fs::File, path::Path, path::PathBuf};

/// In-memory needle index backed by a [`CompactMap`]
///
/// The whole index file is replayed on load; nothing but the index file
/// itself is persisted.
pub struct MemoryNeedleMap {
    map: CompactMap,
    index_file: IndexFile,
    metric: MapMetric,
}

impl MemoryNeedleMap {
    /// Wraps an empty index file.
    #[must_use]
    pub fn new(index_file: File, index_path: PathBuf) -> Self {
        Self {
            map: CompactMap::new(),
            index_file: IndexFile::new(index_file, index_path),
            metric: MapMetric::default(),
        }
    }

    /// Rebuilds the map by replaying the index file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the index file cannot be read.
    pub fn load(index_file: File, index_path: PathBuf) -> Result<Self> {
        let nm = Self::new(index_file, index_path);
        {
            let file = nm.index_file.file.lock().expect("lock is poisoned");
            replay_index_file(
                &file,
                |key, offset, size| {
                    nm.metric.log_put(key, nm.map.set(key, offset, size), size);
                    Ok(())
                },
                |key| {
                    nm.metric.log_delete(nm.map.delete(key));
                    Ok(())
                },
            )?;
        }
        log::debug!(
            "loaded index {}: max file key {}",
            nm.index_file.path().display(),
            nm.metric.max_file_key()
        );
        Ok(nm)
    }
}

impl NeedleMapper for MemoryNeedleMap {
    fn put(&self, key: NeedleKey, offset: u32, size: u32) -> Result<()> {
        self.index_file.append_entry(key, offset, size)?;
        let old_size = self.map.set(key, offset, size);
        self.metric.log_put(key, old_size, size);
        Ok(())
    }

    fn get(&self, key: NeedleKey) -> Option<NeedleValue> {
        self.map.get(key).filter(|v| v.size > 0)
    }

    fn delete(&self, key: NeedleKey) -> Result<()> {
        self.index_file.append_entry(key, 0, 0)?;
        self.metric.log_delete(self.map.delete(key));
        Ok(())
    }

    fn close(&self) {
        self.index_file.sync();
    }

    fn destroy(&self) -> Result<()> {
        std::fs::remove_file(self.index_file.path())?;
        Ok(())
    }

    fn content_size(&self) -> u64 {
        self.metric.content_size()
    }

    fn deleted_size(&self) -> u64 {
        self.metric.deleted_size()
    }

    fn file_count(&self) -> u64 {
        self.metric.file_count()
    }

    fn deleted_count(&self) -> u64 {
        self.metric.deleted_count()
    }

    fn max_file_key(&self) -> u64 {
        self.metric.max_file_key()
    }

    fn index_file_size(&self) -> u64 {
        self.index_file.size()
    }

    fn index_file_path(&self) -> &Path {
        self.index_file.path()
    }
}
