use super::Volume;
use crate::{
    file_id::VolumeId, replica_placement::ReplicaPlacement, ttl::Ttl, version::Version,
};

/// Snapshot of one volume's state, as exchanged between data nodes and
/// the topology
#[derive(Clone, Debug)]
pub struct VolumeInfo {
    /// Volume id
    pub id: VolumeId,

    /// Data file size in bytes
    pub size: u64,

    /// Replication strategy
    pub replica_placement: ReplicaPlacement,

    /// Volume TTL
    pub ttl: Ttl,

    /// Collection name; empty for the default collection
    pub collection: String,

    /// Record format version
    pub version: Version,

    /// Number of stored needles
    pub file_count: u64,

    /// Number of recorded deletes
    pub delete_count: u64,

    /// Bytes freed by deletes
    pub deleted_byte_count: u64,

    /// Whether the volume refuses writes
    pub read_only: bool,
}

impl VolumeInfo {
    /// Takes a snapshot of a loaded volume.
    #[must_use]
    pub fn from_volume(volume: &Volume) -> Self {
        Self {
            id: volume.id(),
            size: u64::try_from(volume.size()).unwrap_or(0),
            replica_placement: volume.replica_placement(),
            ttl: volume.ttl(),
            collection: volume.collection().to_string(),
            version: volume.version(),
            file_count: volume.file_count(),
            delete_count: volume.deleted_count(),
            deleted_byte_count: volume.deleted_size(),
            read_only: volume.is_read_only(),
        }
    }
}

impl std::fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Id:{}, Size:{}, ReplicaPlacement:{}, Collection:{}, Version:{}, \
             FileCount:{}, DeleteCount:{}, DeletedByteCount:{}, ReadOnly:{}",
            self.id,
            self.size,
            self.replica_placement,
            self.collection,
            self.version,
            self.file_count,
            self.delete_count,
            self.deleted_byte_count,
            self.read_only
        )
    }
}

/// Sorts volume snapshots by id.
pub fn sort_volume_infos(infos: &mut [VolumeInfo]) {
    infos.sort_by_key(|vi| vi.id);
}
