use super::data_node::DataNodeState;
use crate::{file_id::VolumeId, volume::VolumeInfo, Error, Result};
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU32, Ordering},
        mpsc::SyncSender,
        Arc, RwLock, Weak,
    },
};

/// Identifier of one topology node, unique among its siblings
pub type NodeId = String;

/// Which of the four tree levels a node sits on
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeType {
    /// Root of the tree
    Topology,

    /// Second level: one data center
    DataCenter,

    /// Third level: one rack inside a data center
    Rack,

    /// Leaf: one storage machine
    DataNode,
}

/// Event channels hung off the root node so any descendant can reach
/// them by walking its parent links
pub(crate) struct EventSenders {
    pub dead_nodes: SyncSender<Arc<Node>>,
    pub recovered_nodes: SyncSender<Arc<Node>>,
    pub full_volumes: SyncSender<VolumeInfo>,
}

pub(crate) enum Kind {
    Topology(EventSenders),
    DataCenter,
    Rack,
    DataNode(DataNodeState),
}

/// One node of the placement tree
///
/// All four levels share the same record: aggregate counters, a parent
/// link and a children map. The level-specific payload (the data node
/// state) lives in the kind tag. Counter mutations add the delta to the
/// node itself and recurse into the parent, so every internal node
/// always holds the sum over its descendants.
pub struct Node {
    id: NodeId,
    pub(crate) kind: Kind,

    volume_count: AtomicI64,
    active_volume_count: AtomicI64,
    max_volume_count: AtomicI64,
    max_volume_id: AtomicU32,

    parent: RwLock<Weak<Node>>,
    children: RwLock<HashMap<NodeId, Arc<Node>>>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: Kind) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            volume_count: AtomicI64::new(0),
            active_volume_count: AtomicI64::new(0),
            max_volume_count: AtomicI64::new(0),
            max_volume_id: AtomicU32::new(0),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(HashMap::new()),
        })
    }

    /// Node id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tree level of the node.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self.kind {
            Kind::Topology(_) => NodeType::Topology,
            Kind::DataCenter => NodeType::DataCenter,
            Kind::Rack => NodeType::Rack,
            Kind::DataNode(_) => NodeType::DataNode,
        }
    }

    /// Whether this is a leaf data node.
    #[must_use]
    pub fn is_data_node(&self) -> bool {
        matches!(self.kind, Kind::DataNode(_))
    }

    /// Volume slots not yet taken.
    #[must_use]
    pub fn free_space(&self) -> i64 {
        self.max_volume_count() - self.volume_count()
    }

    /// Volumes hosted under this node.
    #[must_use]
    pub fn volume_count(&self) -> i64 {
        self.volume_count.load(Ordering::Acquire)
    }

    /// Writable volumes hosted under this node.
    #[must_use]
    pub fn active_volume_count(&self) -> i64 {
        self.active_volume_count.load(Ordering::Acquire)
    }

    /// Volume slots under this node.
    #[must_use]
    pub fn max_volume_count(&self) -> i64 {
        self.max_volume_count.load(Ordering::Acquire)
    }

    /// Largest volume id seen under this node.
    #[must_use]
    pub fn max_volume_id(&self) -> VolumeId {
        VolumeId(self.max_volume_id.load(Ordering::Acquire))
    }

    /// Parent node, if linked.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.read().expect("lock is poisoned").upgrade()
    }

    /// Snapshot of the children.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Node>> {
        self.children
            .read()
            .expect("lock is poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Looks up a direct child by id.
    #[must_use]
    pub fn child(&self, id: &str) -> Option<Arc<Node>> {
        self.children.read().expect("lock is poisoned").get(id).cloned()
    }

    /// Root of the tree this node hangs in.
    #[must_use]
    pub fn get_root(self: &Arc<Self>) -> Arc<Node> {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    pub(crate) fn event_senders(&self) -> Option<&EventSenders> {
        match &self.kind {
            Kind::Topology(senders) => Some(senders),
            _ => None,
        }
    }

    /// Adds `delta` volume slots to this node and every ancestor.
    pub fn adjust_max_volume_count(&self, delta: i64) {
        self.max_volume_count.fetch_add(delta, Ordering::AcqRel);
        if let Some(parent) = self.parent() {
            parent.adjust_max_volume_count(delta);
        }
    }

    /// Adds `delta` volumes to this node and every ancestor.
    pub fn adjust_volume_count(&self, delta: i64) {
        self.volume_count.fetch_add(delta, Ordering::AcqRel);
        if let Some(parent) = self.parent() {
            parent.adjust_volume_count(delta);
        }
    }

    /// Adds `delta` writable volumes to this node and every ancestor.
    pub fn adjust_active_volume_count(&self, delta: i64) {
        self.active_volume_count.fetch_add(delta, Ordering::AcqRel);
        if let Some(parent) = self.parent() {
            parent.adjust_active_volume_count(delta);
        }
    }

    /// Raises the maximum seen volume id here and on every ancestor.
    pub fn adjust_max_volume_id(&self, vid: VolumeId) {
        let prev = self.max_volume_id.fetch_max(vid.0, Ordering::AcqRel);
        if prev < vid.0 {
            if let Some(parent) = self.parent() {
                parent.adjust_max_volume_id(vid);
            }
        }
    }

    /// Links a child and folds its aggregates into the ancestor chain.
    pub fn link_child_node(self: &Arc<Self>, child: Arc<Node>) {
        let mut children = self.children.write().expect("lock is poisoned");
        if children.contains_key(child.id()) {
            return;
        }
        children.insert(child.id.clone(), child.clone());

        self.adjust_max_volume_count(child.max_volume_count());
        self.adjust_max_volume_id(child.max_volume_id());
        self.adjust_volume_count(child.volume_count());
        self.adjust_active_volume_count(child.active_volume_count());
        *child.parent.write().expect("lock is poisoned") = Arc::downgrade(self);
        log::info!("topology node {} adds child {}", self.id, child.id);
    }

    /// Unlinks a child and subtracts its aggregates from the ancestor
    /// chain.
    pub fn unlink_child_node(&self, id: &str) {
        let mut children = self.children.write().expect("lock is poisoned");
        let Some(child) = children.remove(id) else {
            return;
        };

        *child.parent.write().expect("lock is poisoned") = Weak::new();
        self.adjust_volume_count(-child.volume_count());
        self.adjust_active_volume_count(-child.active_volume_count());
        self.adjust_max_volume_count(-child.max_volume_count());
        log::info!("topology node {} removes child {}", self.id, id);
    }

    /// Picks `count` distinct children for a placement.
    ///
    /// The first pick is uniform over the children accepted by
    /// `filter`; the remaining `count - 1` are reservoir-sampled from
    /// the other children that still have free space.
    ///
    /// # Errors
    ///
    /// Will return [`Error::CapacityExhausted`] with the per-candidate
    /// reasons when no child passes the filter, or when fewer than
    /// `count - 1` others have free space.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn randomly_pick_nodes<F>(
        &self,
        count: usize,
        filter: F,
    ) -> Result<(Arc<Node>, Vec<Arc<Node>>)>
    where
        F: Fn(&Node) -> std::result::Result<(), String>,
    {
        assert!(count > 0);
        let children = self.children();

        let mut candidates = Vec::with_capacity(children.len());
        let mut reasons = Vec::new();
        for node in &children {
            match filter(node) {
                Ok(()) => candidates.push(node.clone()),
                Err(reason) => reasons.push(format!("{}:{reason}", node.id())),
            }
        }
        if candidates.is_empty() {
            return Err(Error::CapacityExhausted(format!(
                "no matching data node found:\n{}",
                reasons.join("\n")
            )));
        }

        let mut rng = rand::thread_rng();
        let first = candidates[rng.gen_range(0..candidates.len())].clone();
        log::debug!("{} picked main node {}", self.id, first.id());

        let rest_count = count - 1;
        let mut rest: Vec<Arc<Node>> = Vec::with_capacity(rest_count);
        let mut seen = 0usize;
        for node in &children {
            if node.id() == first.id() || node.free_space() <= 0 {
                continue;
            }
            if seen < rest_count {
                rest.push(node.clone());
            } else {
                let r = rng.gen_range(0..=seen);
                if r < rest_count {
                    rest[r] = node.clone();
                }
            }
            seen += 1;
        }
        if rest.len() < rest_count {
            return Err(Error::CapacityExhausted(format!(
                "found {} of the {rest_count} additional nodes needed under {}",
                rest.len(),
                self.id
            )));
        }
        Ok((first, rest))
    }

    /// Walks down to the data node holding the `r`-th free volume slot
    /// under this node.
    ///
    /// # Errors
    ///
    /// Will return [`Error::CapacityExhausted`] when fewer than `r + 1`
    /// free slots exist below this node.
    pub fn reserve_one_volume(&self, mut r: i64) -> Result<Arc<Node>> {
        for node in self.children() {
            let free_space = node.free_space();
            if free_space <= 0 {
                continue;
            }
            if r >= free_space {
                r -= free_space;
            } else if node.is_data_node() {
                return Ok(node);
            } else {
                return node.reserve_one_volume(r);
            }
        }
        Err(Error::CapacityExhausted(format!(
            "no free volume slot found under {}",
            self.id
        )))
    }

    /// Walks the racks below this node, marking stale data nodes dead
    /// and reporting them and any full volumes on the root's channels.
    pub fn collect_dead_nodes_and_full_volumes(
        self: &Arc<Self>,
        fresh_threshold: i64,
        volume_size_limit: u64,
    ) {
        if self.node_type() == NodeType::Rack {
            let root = self.get_root();
            let Some(senders) = root.event_senders() else {
                return;
            };
            for child in self.children() {
                let Kind::DataNode(state) = &child.kind else {
                    continue;
                };
                if state.last_seen() < fresh_threshold && !state.is_dead() {
                    state.set_dead(true);
                    let _ = senders.dead_nodes.send(child.clone());
                }
                for info in child.get_volumes() {
                    if info.size >= volume_size_limit {
                        let _ = senders.full_volumes.send(info);
                    }
                }
            }
        } else {
            for child in self.children() {
                child.collect_dead_nodes_and_full_volumes(fresh_threshold, volume_size_limit);
            }
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(parent) = self.parent.read().expect("lock is poisoned").upgrade() {
            write!(f, "{parent}:{}", self.id)
        } else {
            write!(f, "{}", self.id)
        }
    }
}
