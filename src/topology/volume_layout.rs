use super::node::Node;
use crate::{
    file_id::VolumeId, replica_placement::ReplicaPlacement, ttl::Ttl, volume::VolumeInfo, Error,
    Result,
};
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Constraints a caller puts on a write placement
#[derive(Clone, Debug, Default)]
pub struct PlacementOption {
    /// Collection the write goes to; empty for the default collection
    pub collection: String,

    /// Required replication strategy
    pub replica_placement: ReplicaPlacement,

    /// Required TTL
    pub ttl: Ttl,

    /// Restrict the primary copy to this data center
    pub data_center: Option<String>,
}

/// Which data nodes host each volume of one `(replica placement, ttl)`
/// class, and which of those volumes accept writes
pub struct VolumeLayout {
    replica_placement: ReplicaPlacement,
    ttl: Ttl,
    volume_size_limit: u64,

    vid_to_locations: RwLock<HashMap<VolumeId, Vec<Arc<Node>>>>,
    writables: RwLock<Vec<VolumeId>>,
}

impl VolumeLayout {
    pub(crate) fn new(
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
        volume_size_limit: u64,
    ) -> Self {
        Self {
            replica_placement,
            ttl,
            volume_size_limit,
            vid_to_locations: RwLock::new(HashMap::new()),
            writables: RwLock::new(Vec::new()),
        }
    }

    /// Replication strategy of this layout class.
    #[must_use]
    pub fn replica_placement(&self) -> ReplicaPlacement {
        self.replica_placement
    }

    /// TTL of this layout class.
    #[must_use]
    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    /// Records that `dn` hosts volume `v`. The volume becomes writable
    /// once all required copies are present, it is below the size limit
    /// and not read-only.
    pub fn register_volume(&self, v: &VolumeInfo, dn: &Arc<Node>) {
        let mut locations = self.vid_to_locations.write().expect("lock is poisoned");
        let list = locations.entry(v.id).or_default();
        if !list.iter().any(|n| n.id() == dn.id()) {
            list.push(dn.clone());
        }

        let complete = list.len() == self.replica_placement.copy_count();
        drop(locations);

        if complete && v.size < self.volume_size_limit && !v.read_only {
            self.add_to_writables(v.id);
        } else {
            self.remove_from_writables(v.id);
        }
    }

    /// Records that `dn` no longer hosts volume `vid`.
    pub fn unregister_volume(&self, vid: VolumeId, dn: &Node) {
        let mut locations = self.vid_to_locations.write().expect("lock is poisoned");
        let emptied = locations.get_mut(&vid).is_some_and(|list| {
            list.retain(|n| n.id() != dn.id());
            list.is_empty()
        });
        if emptied {
            locations.remove(&vid);
        }
        drop(locations);
        self.remove_from_writables(vid);
    }

    /// Data nodes hosting `vid`.
    #[must_use]
    pub fn lookup(&self, vid: VolumeId) -> Option<Vec<Arc<Node>>> {
        self.vid_to_locations
            .read()
            .expect("lock is poisoned")
            .get(&vid)
            .cloned()
    }

    /// Number of volumes currently accepting writes, optionally scoped
    /// to one data center.
    #[must_use]
    pub fn active_volume_count(&self, option: &PlacementOption) -> usize {
        let writables = self.writables.read().expect("lock is poisoned");
        match &option.data_center {
            None => writables.len(),
            Some(dc) => {
                let locations = self.vid_to_locations.read().expect("lock is poisoned");
                writables
                    .iter()
                    .filter(|vid| {
                        locations.get(vid).is_some_and(|list| {
                            list.iter()
                                .any(|n| n.data_center_id().as_deref() == Some(dc.as_str()))
                        })
                    })
                    .count()
            }
        }
    }

    /// Picks one writable volume uniformly at random and returns it
    /// with its hosting nodes.
    ///
    /// # Errors
    ///
    /// Will return [`Error::CapacityExhausted`] when no volume in this
    /// class accepts writes (in the requested data center, if one was
    /// given).
    pub fn pick_for_write(&self, option: &PlacementOption) -> Result<(VolumeId, Vec<Arc<Node>>)> {
        let writables = self.writables.read().expect("lock is poisoned");
        let locations = self.vid_to_locations.read().expect("lock is poisoned");

        let eligible: Vec<VolumeId> = match &option.data_center {
            None => writables.clone(),
            Some(dc) => writables
                .iter()
                .copied()
                .filter(|vid| {
                    locations.get(vid).is_some_and(|list| {
                        list.iter()
                            .any(|n| n.data_center_id().as_deref() == Some(dc.as_str()))
                    })
                })
                .collect(),
        };

        if eligible.is_empty() {
            return Err(Error::CapacityExhausted(
                "no writable volumes available".to_string(),
            ));
        }

        let vid = eligible[rand::thread_rng().gen_range(0..eligible.len())];
        let list = locations.get(&vid).cloned().ok_or_else(|| {
            Error::Consistency(format!("writable volume {vid} has no known locations"))
        })?;
        Ok((vid, list))
    }

    /// Takes `vid` out of write rotation.
    pub fn set_volume_unavailable(&self, vid: VolumeId, dn: &Node) {
        self.unregister_volume(vid, dn);
    }

    fn add_to_writables(&self, vid: VolumeId) {
        let mut writables = self.writables.write().expect("lock is poisoned");
        if !writables.contains(&vid) {
            log::debug!("volume {vid} becomes writable");
            writables.push(vid);
        }
    }

    fn remove_from_writables(&self, vid: VolumeId) {
        let mut writables = self.writables.write().expect("lock is poisoned");
        if let Some(at) = writables.iter().position(|w| *w == vid) {
            log::debug!("volume {vid} leaves write rotation");
            writables.remove(at);
        }
    }
}

/// Per-collection registry of volume layouts, keyed by
/// `(replica placement, ttl)`
pub struct Collection {
    name: String,
    volume_size_limit: u64,
    layouts: RwLock<HashMap<(u8, Ttl), Arc<VolumeLayout>>>,
}

impl Collection {
    pub(crate) fn new(name: &str, volume_size_limit: u64) -> Self {
        Self {
            name: name.to_string(),
            volume_size_limit,
            layouts: RwLock::new(HashMap::new()),
        }
    }

    /// Collection name; empty for the default collection.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the layout for one `(replica placement, ttl)` class,
    /// creating it lazily.
    pub fn get_or_create_volume_layout(
        &self,
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
    ) -> Arc<VolumeLayout> {
        let key = (replica_placement.byte(), ttl);
        if let Some(layout) = self.layouts.read().expect("lock is poisoned").get(&key) {
            return layout.clone();
        }
        self.layouts
            .write()
            .expect("lock is poisoned")
            .entry(key)
            .or_insert_with(|| {
                Arc::new(VolumeLayout::new(
                    replica_placement,
                    ttl,
                    self.volume_size_limit,
                ))
            })
            .clone()
    }

    /// Searches every layout class for the nodes hosting `vid`.
    #[must_use]
    pub fn lookup(&self, vid: VolumeId) -> Option<Vec<Arc<Node>>> {
        self.layouts
            .read()
            .expect("lock is poisoned")
            .values()
            .find_map(|layout| layout.lookup(vid))
    }
}
