use super::{is_back_end_fresh, IndexFile, MapMetric, NeedleMapper};
use crate::{compact_map::NeedleValue, file_id::NeedleKey, Result};
use byteorder::{BigEndian, ByteOrder};
use redb::{Database, ReadableTable, TableDefinition};
use std::{
    fs::File,
    path::{Path, PathBuf},
};

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("weed");

/// Needle index persisted in a single-file B+tree store (`.bdb`)
///
/// Keys are the 8-byte big-endian needle key, values are
/// `offset (4) || size (4)`, all in one `"weed"` table.
pub struct BTreeNeedleMap {
    db: Database,
    db_path: PathBuf,
    index_file: IndexFile,
    metric: MapMetric,
}

impl BTreeNeedleMap {
    /// Opens the store, rebuilding it from the index file first if the
    /// index file is newer.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store cannot be opened or the replay
    /// fails.
    pub fn new(db_path: PathBuf, index_file: File, index_path: PathBuf) -> Result<Self> {
        let rebuild = !is_back_end_fresh(&db_path, &index_path);

        let db = Database::create(&db_path)?;

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

    fn generate(db: &Database, index_file: &File) -> Result<()> {
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE)?;
            super::walk_index_file(index_file, |key, offset, size| {
                if offset > 0 {
                    let mut value = [0u8; 8];
                    BigEndian::write_u32(&mut value[0..4], offset);
                    BigEndian::write_u32(&mut value[4..8], size);
                    table.insert(key.to_be_bytes().as_slice(), value.as_slice())?;
                } else {
                    table.remove(key.to_be_bytes().as_slice())?;
                }
                Ok(())
            })?;
        }
        txn.commit()?;
        Ok(())
    }

    fn write_entry(&self, key: NeedleKey, offset: u32, size: u32) -> Result<()> {
        let mut value = [0u8; 8];
        BigEndian::write_u32(&mut value[0..4], offset);
        BigEndian::write_u32(&mut value[4..8], size);

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE)?;
            table.insert(key.to_be_bytes().as_slice(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete_entry(&self, key: NeedleKey) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE)?;
            table.remove(key.to_be_bytes().as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl NeedleMapper for BTreeNeedleMap {
    fn put(&self, key: NeedleKey, offset: u32, size: u32) -> Result<()> {
        let old_size = self.get(key).map_or(0, |v| v.size);
        self.metric.log_put(key, old_size, size);
        self.index_file.append_entry(key, offset, size)?;
        self.write_entry(key, offset, size)
    }

    fn get(&self, key: NeedleKey) -> Option<NeedleValue> {
        let txn = match self.db.begin_read() {
            Ok(txn) => txn,
            Err(e) => {
                log::warn!(
                    "cannot open read transaction on {}: {e}",
                    self.db_path.display()
                );
                return None;
            }
        };
        let table = txn.open_table(TABLE).ok()?;
        let guard = table.get(key.to_be_bytes().as_slice()).ok()??;
        let value = guard.value();
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
        self.delete_entry(key)
    }

    fn close(&self) {
        self.index_file.sync();
    }

    fn destroy(&self) -> Result<()> {
        std::fs::remove_file(self.index_file.path())?;
        std::fs::remove_file(&self.db_path)?;
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
