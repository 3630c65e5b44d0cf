use super::{is_back_end_fresh, replay_index_file, IndexFile, MapMetric, NeedleMapper};
use crate::{compact_map::NeedleValue, file_id::NeedleKey, Result};
use byteorder::{BigEndian, ByteOrder};
use std::{
    fs::File,
    path::{Path, PathBuf},
};

/// Needle index persisted in a log-structured store directory (`.ldb`)
///
/// Same logical layout as the B+tree back-end: 8-byte big-endian key,
/// `offset (4) || size (4)` value.
pub struct LsmNeedleMap {
    db: sled::Db,
    db_path: PathBuf,
    index_file: IndexFile,
    metric: MapMetric,
}

impl LsmNeedleMap {
    /// Opens the store, rebuilding it from the index file first if the
    /// index file is newer.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store cannot be opened or the replay
    /// fails.
    pub fn new(db_path: PathBuf, index_file: File, index_path: PathBuf) -> Result<Self> {
        let rebuild = !is_back_end_fresh(&db_path, &index_path);

        let db = sled::open(&db_path)?;

        if rebuild {
            log::info!(
                "generating {} from {}",
                db_path.display(),
                index_path.display()
            );
            Self::generate(&db, &index_file)?;
        }

        let metric = super::load_metric(&index_file)?;

        Ok(Self {
            db,
            db_path,
            index_file: IndexFile::new(index_file, index_path),
            metric,
        })
    }

    fn generate(db: &sled::Db, index_file: &File) -> Result<()> {
        replay_index_file(
            index_file,
            |key, offset, size| {
                let mut value = [0u8; 8];
                BigEndian::write_u32(&mut value[0..4], offset);
                BigEndian::write_u32(&mut value[4..8], size);
                db.insert(key.to_be_bytes(), value.as_slice())?;
                Ok(())
            },
            |key| {
                db.remove(key.to_be_bytes())?;
                Ok(())
            },
        )?;
        db.flush()?;
        Ok(())
    }
}

impl NeedleMapper for LsmNeedleMap {
    fn put(&self, key: NeedleKey, offset: u32, size: u32) -> Result<()> {
        let old_size = self.get(key).map_or(0, |v| v.size);
        self.metric.log_put(key, old_size, size);
        self.index_file.append_entry(key, offset, size)?;

        let mut value = [0u8; 8];
        BigEndian::write_u32(&mut value[0..4], offset);
        BigEndian::write_u32(&mut value[4..8], size);
        self.db.insert(key.to_be_bytes(), value.as_slice())?;
        Ok(())
    }

    fn get(&self, key: NeedleKey) -> Option<NeedleValue> {
        let value = match self.db.get(key.to_be_bytes()) {
            Ok(value) => value?,
            Err(e) => {
                log::warn!("cannot read {}: {e}", self.db_path.display());
                return None;
            }
        };
        if value.len() != 8 {
            return None;
        }
        Some(NeedleValue {
            key,
            offset: BigEndian::read_u32(&value[0..4]),
            size: BigEndian::read_u32(&value[4..8]),
        })
    }

    fn delete(&self, key: NeedleKey) -> Result<()> {
        if let Some(old) = self.get(key) {
            self.metric.log_delete(old.size);
        }
        self.index_file.append_entry(key, 0, 0)?;
        self.db.remove(key.to_be_bytes())?;
        Ok(())
    }

    fn close(&self) {
        self.index_file.sync();
        if let Err(e) = self.db.flush() {
            log::warn!("cannot flush {}: {e}", self.db_path.display());
        }
    }

    fn destroy(&self) -> Result<()> {
        self.close();
        std::fs::remove_file(self.index_file.path())?;
        std::fs::remove_dir_all(&self.db_path)?;
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
