mod checking;
mod info;
mod read_write;
mod scan;

pub use {
    info::{sort_volume_infos, VolumeInfo},
    scan::scan_volume_file,
};

use crate::{
    clock,
    file_id::VolumeId,
    needle_map::{
        BTreeNeedleMap, LsmNeedleMap, MemoryNeedleMap, NeedleMapKind, NeedleMapper,
    },
    replica_placement::ReplicaPlacement,
    super_block::{SuperBlock, SUPER_BLOCK_SIZE},
    ttl::Ttl,
    version::Version,
    Error, Result,
};
use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

/// Append-only container of needles, backed by a data file, an index
/// file and a pluggable index back-end
///
/// A volume serializes its mutations under one write lock; readers
/// never take it. Concurrent reads are safe because records are only
/// ever appended and the index publishes `(offset, size)` after the
/// data bytes are in place.
pub struct Volume {
    id: VolumeId,
    dir: PathBuf,
    collection: String,

    data_file: File,
    nm: Option<Box<dyn NeedleMapper>>,

    super_block: SuperBlock,
    read_only: bool,

    /// Unix seconds of the freshest needle, advanced by writes
    last_modified: AtomicU64,

    write_lock: Mutex<()>,
}

impl Volume {
    /// Opens a volume, creating the data file if it is missing, and
    /// writes `super_block` into fresh data files.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the files cannot be opened or created.
    pub fn new(
        dir: &Path,
        collection: &str,
        id: VolumeId,
        kind: NeedleMapKind,
        super_block: SuperBlock,
    ) -> Result<Self> {
        Self::load(dir, collection, id, kind, Some(super_block), true, true)
    }

    /// Opens an existing volume, reading the superblock from disk.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the data file does not exist or cannot be
    /// opened.
    pub fn open(dir: &Path, collection: &str, id: VolumeId, kind: NeedleMapKind) -> Result<Self> {
        Self::load(dir, collection, id, kind, None, true, false)
    }

    /// Opens just the data file and superblock, without any index.
    /// Used by scans.
    pub(crate) fn load_without_index(dir: &Path, collection: &str, id: VolumeId) -> Result<Self> {
        Self::load(dir, collection, id, NeedleMapKind::Memory, None, false, false)
    }

    #[allow(clippy::too_many_lines)]
    fn load(
        dir: &Path,
        collection: &str,
        id: VolumeId,
        kind: NeedleMapKind,
        super_block: Option<SuperBlock>,
        also_load_index: bool,
        create_if_missing: bool,
    ) -> Result<Self> {
        let file_name = file_name_in(dir, collection, id);
        let data_path = path_with_ext(&file_name, "dat");

        let mut read_only = false;
        let mut last_modified = 0;

        let data_file = match std::fs::metadata(&data_path) {
            Ok(meta) => {
                last_modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs());
                if meta.permissions().readonly() {
                    log::info!("opening {} in read-only mode", data_path.display());
                    read_only = true;
                    File::open(&data_path)?
                } else {
                    OpenOptions::new().read(true).write(true).open(&data_path)?
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create_if_missing => {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&data_path)?
            }
            Err(e) => {
                return Err(Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("cannot load volume data {}: {e}", data_path.display()),
                )))
            }
        };

        let super_block = match super_block {
            Some(sb) => maybe_write_super_block(&data_file, sb)?,
            None => read_super_block(&data_file, id)?,
        };

        let mut volume = Self {
            id,
            dir: dir.to_path_buf(),
            collection: collection.to_string(),
            data_file,
            nm: None,
            super_block,
            read_only,
            last_modified: AtomicU64::new(last_modified),
            write_lock: Mutex::new(()),
        };

        if also_load_index {
            volume.load_index(&file_name, kind)?;
        }
        Ok(volume)
    }

    fn load_index(&mut self, file_name: &Path, kind: NeedleMapKind) -> Result<()> {
        let index_path = path_with_ext(file_name, "idx");
        let index_file = if self.read_only {
            log::debug!("open to read index file {}", index_path.display());
            OpenOptions::new().read(true).open(&index_path)?
        } else {
            log::debug!("open to write index file {}", index_path.display());
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&index_path)?
        };

        if let Err(e) =
            checking::check_volume_data_integrity(&self.data_file, self.version(), &index_file)
        {
            log::warn!("volume {} data integrity checking failed: {e}", self.id);
            self.read_only = true;
        }

        let built = match kind {
            NeedleMapKind::Memory => {
                MemoryNeedleMap::load(index_file, index_path.clone())
                    .map(|nm| Box::new(nm) as Box<dyn NeedleMapper>)
            }
            NeedleMapKind::BTree => {
                let db_path = path_with_ext(file_name, "bdb");
                BTreeNeedleMap::new(db_path, index_file, index_path.clone())
                    .map(|nm| Box::new(nm) as Box<dyn NeedleMapper>)
            }
            NeedleMapKind::Lsm => {
                let db_path = path_with_ext(file_name, "ldb");
                LsmNeedleMap::new(db_path, index_file, index_path.clone())
                    .map(|nm| Box::new(nm) as Box<dyn NeedleMapper>)
            }
        };

        self.nm = Some(match built {
            Ok(nm) => nm,
            Err(e) => {
                // The index file itself is intact, so serve what it
                // holds from memory and refuse further writes
                log::error!(
                    "cannot open index back-end for volume {}, falling back to memory: {e}",
                    self.id
                );
                self.read_only = true;
                let index_file = OpenOptions::new().read(true).open(&index_path)?;
                Box::new(MemoryNeedleMap::load(index_file, index_path)?)
            }
        });
        Ok(())
    }

    pub(crate) fn mapper(&self) -> Result<&dyn NeedleMapper> {
        self.nm.as_deref().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "volume was loaded without an index",
            ))
        })
    }

    /// Volume id.
    #[must_use]
    pub fn id(&self) -> VolumeId {
        self.id
    }

    /// Collection the volume belongs to; empty for the default
    /// collection.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Record format version from the superblock.
    #[must_use]
    pub fn version(&self) -> Version {
        self.super_block.version
    }

    /// Superblock of the volume.
    #[must_use]
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// TTL shared by all needles in the volume.
    #[must_use]
    pub fn ttl(&self) -> Ttl {
        self.super_block.ttl
    }

    /// Replication strategy the volume was created with.
    #[must_use]
    pub fn replica_placement(&self) -> ReplicaPlacement {
        self.super_block.replica_placement
    }

    /// Whether mutations are refused.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the replication strategy asks for more than one copy.
    #[must_use]
    pub fn need_to_replicate(&self) -> bool {
        self.replica_placement().copy_count() > 1
    }

    /// Current size of the data file in bytes, or -1 if it cannot be
    /// determined.
    #[must_use]
    pub fn size(&self) -> i64 {
        match self.data_file.metadata() {
            Ok(meta) => i64::try_from(meta.len()).unwrap_or(i64::MAX),
            Err(e) => {
                log::warn!("failed to read size of volume {}: {e}", self.id);
                -1
            }
        }
    }

    /// Total bytes of live content, from the index counters.
    #[must_use]
    pub fn content_size(&self) -> u64 {
        self.nm.as_ref().map_or(0, |nm| nm.content_size())
    }

    /// Number of stored needles, from the index counters.
    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.nm.as_ref().map_or(0, |nm| nm.file_count())
    }

    /// Number of deletes recorded, from the index counters.
    #[must_use]
    pub fn deleted_count(&self) -> u64 {
        self.nm.as_ref().map_or(0, |nm| nm.deleted_count())
    }

    /// Bytes freed by deletes, from the index counters.
    #[must_use]
    pub fn deleted_size(&self) -> u64 {
        self.nm.as_ref().map_or(0, |nm| nm.deleted_size())
    }

    /// Largest needle key the volume has seen.
    #[must_use]
    pub fn max_file_key(&self) -> u64 {
        self.nm.as_ref().map_or(0, |nm| nm.max_file_key())
    }

    /// Unix seconds of the freshest needle.
    #[must_use]
    pub fn last_modified(&self) -> u64 {
        self.last_modified.load(Ordering::Acquire)
    }

    /// Path of the volume's files without extension:
    /// `<dir>/<collection>_<vid>` or `<dir>/<vid>`.
    #[must_use]
    pub fn file_name(&self) -> PathBuf {
        file_name_in(&self.dir, &self.collection, self.id)
    }

    /// Flushes the index back-end and the data file.
    pub fn close(&self) {
        if let Some(nm) = &self.nm {
            nm.close();
        }
        if let Err(e) = self.data_file.sync_all() {
            log::warn!("cannot sync volume {}: {e}", self.id);
        }
    }

    /// Removes the data file, the index file and any back-end files.
    ///
    /// # Errors
    ///
    /// Will return [`Error::ReadOnly`] on a read-only volume, or the
    /// first IO error.
    pub fn destroy(self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(self.file_name().display().to_string()));
        }
        self.close();
        std::fs::remove_file(path_with_ext(&self.file_name(), "dat"))?;
        if let Some(nm) = &self.nm {
            nm.destroy()?;
        }
        Ok(())
    }

    /// Whether the volume's TTL has fully elapsed since the last write.
    ///
    /// Always false for empty volumes, TTL-less volumes, and while the
    /// size limit is still unknown (`volume_size_limit == 0`).
    #[must_use]
    pub fn is_expired(&self, volume_size_limit: u64) -> bool {
        if volume_size_limit == 0 {
            return false;
        }
        if self.content_size() == 0 {
            return false;
        }
        let ttl = self.ttl();
        if ttl.minutes() == 0 {
            return false;
        }
        let lived_minutes = (clock::unix_seconds_i64()
            - i64::try_from(self.last_modified()).unwrap_or(i64::MAX))
            / 60;
        i64::from(ttl.minutes()) < lived_minutes
    }

    /// Whether the volume has been expired for a grace window of
    /// `ttl / 10` minutes, capped at `max_delay_minutes`.
    #[must_use]
    pub fn is_expired_long_enough(&self, max_delay_minutes: u32) -> bool {
        let ttl = self.ttl();
        if ttl.minutes() == 0 {
            return false;
        }
        let removal_delay = (ttl.minutes() / 10).min(max_delay_minutes);
        let deadline = u64::from(ttl.minutes() + removal_delay) * 60 + self.last_modified();
        deadline < clock::unix_seconds()
    }

    pub(crate) fn data_file(&self) -> &File {
        &self.data_file
    }
}

/// Appends a file extension without treating dots in the collection
/// name as extension separators.
fn path_with_ext(file_name: &Path, ext: &str) -> PathBuf {
    let mut name = file_name.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Builds `<dir>/<collection>_<vid>` or `<dir>/<vid>` when the
/// collection is empty.
fn file_name_in(dir: &Path, collection: &str, id: VolumeId) -> PathBuf {
    if collection.is_empty() {
        dir.join(id.to_string())
    } else {
        dir.join(format!("{collection}_{id}"))
    }
}

/// Writes the superblock into an empty data file; an already populated
/// file keeps what it has.
fn maybe_write_super_block(data_file: &File, super_block: SuperBlock) -> Result<SuperBlock> {
    let meta = data_file.metadata()?;
    if meta.len() == 0 {
        data_file.write_all_at(&super_block.as_bytes(), 0)?;
        Ok(super_block)
    } else {
        let mut header = [0u8; SUPER_BLOCK_SIZE];
        data_file.read_exact_at(&mut header, 0)?;
        SuperBlock::parse(header)
    }
}

fn read_super_block(data_file: &File, id: VolumeId) -> Result<SuperBlock> {
    let mut header = [0u8; SUPER_BLOCK_SIZE];
    data_file.read_exact_at(&mut header, 0).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("cannot read volume {id} super block: {e}"),
        ))
    })?;
    SuperBlock::parse(header)
}

/// Seeks to the end of the data file and on to the next aligned
/// position if something left it unaligned.
pub(crate) fn seek_to_aligned_end(mut file: &File) -> Result<u64> {
    use crate::needle::NEEDLE_PADDING_SIZE;

    let mut offset = file.seek(SeekFrom::End(0))?;
    let rem = offset % u64::from(NEEDLE_PADDING_SIZE);
    if rem != 0 {
        offset += u64::from(NEEDLE_PADDING_SIZE) - rem;
        offset = file.seek(SeekFrom::Start(offset))?;
    }
    Ok(offset)
}
