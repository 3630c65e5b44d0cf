use super::node::{Kind, Node};
use crate::{file_id::VolumeId, volume::VolumeInfo};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, RwLock,
    },
};

/// Leaf payload: everything only a storage machine has
pub(crate) struct DataNodeState {
    pub ip: String,
    pub port: u16,
    pub public_url: String,
    last_seen: AtomicI64,
    dead: AtomicBool,
    volumes: RwLock<HashMap<VolumeId, VolumeInfo>>,
}

impl DataNodeState {
    pub fn new(ip: String, port: u16, public_url: String) -> Self {
        Self {
            ip,
            port,
            public_url,
            last_seen: AtomicI64::new(0),
            dead: AtomicBool::new(false),
            volumes: RwLock::new(HashMap::new()),
        }
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::Acquire)
    }

    pub fn set_last_seen(&self, unix_seconds: i64) {
        self.last_seen.store(unix_seconds, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn set_dead(&self, dead: bool) {
        self.dead.store(dead, Ordering::Release);
    }
}

/// Data-node-only accessors and operations
///
/// These methods panic when called on an inner node; the tree only
/// ever hangs data nodes under racks, so the kind is known at every
/// call site.
impl Node {
    fn data_node_state(&self) -> &DataNodeState {
        match &self.kind {
            Kind::DataNode(state) => state,
            _ => unreachable!("node is not a data node"),
        }
    }

    /// `ip:port` of the data node.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    #[must_use]
    pub fn url(&self) -> String {
        let state = self.data_node_state();
        format!("{}:{}", state.ip, state.port)
    }

    /// Address clients reach the data node under.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.data_node_state().public_url
    }

    /// Unix seconds of the last join heartbeat.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    #[must_use]
    pub fn last_seen(&self) -> i64 {
        self.data_node_state().last_seen()
    }

    /// Whether the node missed enough heartbeats to be declared dead.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.data_node_state().is_dead()
    }

    /// Whether the node answers under the given location.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    #[must_use]
    pub fn match_location(&self, ip: &str, port: u16) -> bool {
        let state = self.data_node_state();
        state.ip == ip && state.port == port
    }

    /// Registers or refreshes one hosted volume, keeping the counter
    /// aggregates in step.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    pub fn add_or_update_volume(self: &Arc<Self>, v: VolumeInfo) {
        let state = self.data_node_state();
        let mut volumes = state.volumes.write().expect("lock is poisoned");
        if let Some(slot) = volumes.get_mut(&v.id) {
            *slot = v;
            return;
        }

        self.adjust_volume_count(1);
        if !v.read_only {
            self.adjust_active_volume_count(1);
        }
        self.adjust_max_volume_id(v.id);
        volumes.insert(v.id, v);
    }

    /// Replaces the hosted volume set with `actual_volumes` and returns
    /// the volumes that disappeared.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    pub fn update_volumes(self: &Arc<Self>, actual_volumes: Vec<VolumeInfo>) -> Vec<VolumeInfo> {
        let actual_ids: std::collections::HashSet<VolumeId> =
            actual_volumes.iter().map(|v| v.id).collect();

        let mut deleted = Vec::new();
        {
            let state = self.data_node_state();
            let mut volumes = state.volumes.write().expect("lock is poisoned");
            volumes.retain(|vid, v| {
                if actual_ids.contains(vid) {
                    return true;
                }
                log::info!("deleting volume id {vid} from {}", self.id());
                deleted.push(v.clone());
                false
            });
        }
        for v in &deleted {
            self.adjust_volume_count(-1);
            if !v.read_only {
                self.adjust_active_volume_count(-1);
            }
        }

        for v in actual_volumes {
            self.add_or_update_volume(v);
        }
        deleted
    }

    /// Snapshot of the hosted volumes.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    #[must_use]
    pub fn get_volumes(&self) -> Vec<VolumeInfo> {
        self.data_node_state()
            .volumes
            .read()
            .expect("lock is poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Looks up one hosted volume.
    ///
    /// # Panics
    ///
    /// Panics if the node is not a data node.
    #[must_use]
    pub fn get_volume(&self, id: VolumeId) -> Option<VolumeInfo> {
        self.data_node_state()
            .volumes
            .read()
            .expect("lock is poisoned")
            .get(&id)
            .cloned()
    }

    /// Data center the node hangs under, if fully linked.
    #[must_use]
    pub fn data_center_id(&self) -> Option<super::node::NodeId> {
        let rack = self.parent()?;
        let dc = rack.parent()?;
        Some(dc.id().to_string())
    }
}
