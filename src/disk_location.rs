use crate::{
    file_id::VolumeId,
    needle_map::NeedleMapKind,
    volume::Volume,
    Result,
};
use std::{collections::HashMap, path::Path, path::PathBuf};

/// One directory holding many volumes
pub struct DiskLocation {
    /// Directory the volume files live in
    pub directory: PathBuf,

    /// How many volumes this disk is allowed to host
    pub max_volume_count: usize,

    volumes: HashMap<VolumeId, Volume>,
}

impl DiskLocation {
    /// Creates a disk location over `directory`.
    #[must_use]
    pub fn new(directory: &Path, max_volume_count: usize) -> Self {
        Self {
            directory: directory.to_path_buf(),
            max_volume_count,
            volumes: HashMap::new(),
        }
    }

    /// Discovers and opens every `*.dat` volume in the directory.
    ///
    /// File names are `<collection>_<vid>.dat` or `<vid>.dat`. Files
    /// that fail to open are logged and skipped.
    pub fn load_existing_volumes(&mut self, kind: NeedleMapKind) {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("cannot read dir {}: {e}", self.directory.display());
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "dat") {
                continue;
            }
            let Some(base) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let (collection, vid_str) = match base.rfind('_') {
                Some(at) if at > 0 => (&base[..at], &base[at + 1..]),
                _ => ("", base),
            };
            let Ok(vid) = vid_str.parse::<VolumeId>() else {
                continue;
            };
            if self.volumes.contains_key(&vid) {
                continue;
            }

            match Volume::open(&self.directory, collection, vid, kind) {
                Ok(v) => {
                    log::info!(
                        "data file {}, replicaPlacement={} version={} size={} ttl={}",
                        path.display(),
                        v.replica_placement(),
                        v.version(),
                        v.size(),
                        v.ttl()
                    );
                    self.volumes.insert(vid, v);
                }
                Err(e) => log::error!("new volume {} error: {e}", path.display()),
            }
        }

        log::info!(
            "disk location {} loaded {} volumes, max {}",
            self.directory.display(),
            self.volumes.len(),
            self.max_volume_count
        );
    }

    /// Destroys every volume belonging to `collection`.
    ///
    /// # Errors
    ///
    /// Will return the first destroy error; volumes processed before it
    /// stay deleted.
    pub fn delete_collection(&mut self, collection: &str) -> Result<()> {
        let ids: Vec<VolumeId> = self
            .volumes
            .iter()
            .filter(|(_, v)| v.collection() == collection)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.delete_volume(id)?;
        }
        Ok(())
    }

    /// Destroys one volume and forgets it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the volume's files cannot be removed; the
    /// volume is unregistered either way.
    pub fn delete_volume(&mut self, id: VolumeId) -> Result<()> {
        let Some(volume) = self.volumes.remove(&id) else {
            return Ok(());
        };
        if let Err(e) = volume.destroy() {
            log::error!("cannot destroy volume {id}: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// Registers an already opened volume.
    pub fn add_volume(&mut self, volume: Volume) {
        self.volumes.insert(volume.id(), volume);
    }

    /// Looks up a volume by id.
    #[must_use]
    pub fn find_volume(&self, id: VolumeId) -> Option<&Volume> {
        self.volumes.get(&id)
    }

    /// Whether a volume is registered under `id`.
    #[must_use]
    pub fn has_volume(&self, id: VolumeId) -> bool {
        self.volumes.contains_key(&id)
    }

    /// Number of registered volumes.
    #[must_use]
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Iterates over the registered volumes.
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }
}
