use super::{
    configuration::{self, Configuration},
    node::{EventSenders, Kind, Node},
    volume_layout::{Collection, PlacementOption, VolumeLayout},
};
use crate::{
    clock,
    file_id::{FileId, VolumeId},
    sequence::Sequencer,
    volume::VolumeInfo,
    Error, Result,
};
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{
        mpsc::{sync_channel, Receiver},
        Arc, RwLock,
    },
};

/// Everything one data node reports when it joins or heartbeats
#[derive(Clone, Debug, Default)]
pub struct JoinMessage {
    /// Whether this is the node's first heartbeat after a restart
    pub is_init: bool,

    /// Node IP address
    pub ip: String,

    /// Node port
    pub port: u16,

    /// Address clients reach the node under
    pub public_url: String,

    /// Volume slots the node offers
    pub max_volume_count: i64,

    /// Largest needle key the node has stored
    pub max_file_key: u64,

    /// Data center the node believes it is in
    pub data_center: String,

    /// Rack the node believes it is in
    pub rack: String,

    /// Volumes the node currently hosts
    pub volumes: Vec<VolumeInfo>,
}

/// Consumer ends of the topology's event channels
///
/// The channels are unbuffered: the collector blocks until the consumer
/// takes each event.
pub struct TopologyEvents {
    /// Data nodes that missed enough heartbeats
    pub dead_nodes: Receiver<Arc<Node>>,

    /// Data nodes that came back after being declared dead
    pub recovered_nodes: Receiver<Arc<Node>>,

    /// Volumes that reached the size limit
    pub full_volumes: Receiver<VolumeInfo>,
}

/// Root of the placement tree plus the cluster-wide registries: the
/// per-collection volume layouts, the key sequencer and the event
/// channels
pub struct Topology {
    root: Arc<Node>,

    collections: RwLock<HashMap<String, Arc<Collection>>>,

    /// Seconds between expected heartbeats
    pulse: i64,

    volume_size_limit: u64,

    sequence: Arc<dyn Sequencer>,

    configuration: Option<Configuration>,
}

impl Topology {
    /// Creates a topology root.
    ///
    /// Returns the topology and the consumer ends of its event
    /// channels.
    #[must_use]
    pub fn new(
        id: &str,
        configuration: Option<Configuration>,
        sequence: Arc<dyn Sequencer>,
        volume_size_limit: u64,
        pulse: i64,
    ) -> (Self, TopologyEvents) {
        let (dead_tx, dead_rx) = sync_channel(0);
        let (recovered_tx, recovered_rx) = sync_channel(0);
        let (full_tx, full_rx) = sync_channel(0);

        let root = Node::new(
            id.to_string(),
            Kind::Topology(EventSenders {
                dead_nodes: dead_tx,
                recovered_nodes: recovered_tx,
                full_volumes: full_tx,
            }),
        );

        (
            Self {
                root,
                collections: RwLock::new(HashMap::new()),
                pulse,
                volume_size_limit,
                sequence,
                configuration,
            },
            TopologyEvents {
                dead_nodes: dead_rx,
                recovered_nodes: recovered_rx,
                full_volumes: full_rx,
            },
        )
    }

    /// Root node of the tree.
    #[must_use]
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// Key sequencer shared by the cluster.
    #[must_use]
    pub fn sequence(&self) -> &Arc<dyn Sequencer> {
        &self.sequence
    }

    /// Returns the data center named `name`, creating and linking it
    /// if it is new.
    pub fn get_or_create_data_center(&self, name: &str) -> Arc<Node> {
        if let Some(dc) = self.root.child(name) {
            return dc;
        }
        let dc = Node::new_data_center(name);
        self.root.link_child_node(dc.clone());
        dc
    }

    /// Finds the data nodes hosting `vid`. An empty collection name
    /// searches every collection.
    #[must_use]
    pub fn lookup(&self, collection: &str, vid: VolumeId) -> Option<Vec<Arc<Node>>> {
        let collections = self.collections.read().expect("lock is poisoned");
        if collection.is_empty() {
            collections.values().find_map(|c| c.lookup(vid))
        } else {
            collections.get(collection)?.lookup(vid)
        }
    }

    /// Forgets a collection and all its layouts.
    pub fn delete_collection(&self, name: &str) {
        self.collections
            .write()
            .expect("lock is poisoned")
            .remove(name);
    }

    /// Returns the layout registry entry for the given class, creating
    /// collection and layout lazily.
    pub fn get_volume_layout(&self, option_key: &PlacementOption) -> Arc<VolumeLayout> {
        let collection = {
            let collections = self.collections.read().expect("lock is poisoned");
            collections.get(&option_key.collection).cloned()
        };
        let collection = collection.unwrap_or_else(|| {
            self.collections
                .write()
                .expect("lock is poisoned")
                .entry(option_key.collection.clone())
                .or_insert_with(|| {
                    Arc::new(Collection::new(&option_key.collection, self.volume_size_limit))
                })
                .clone()
        });
        collection.get_or_create_volume_layout(option_key.replica_placement, option_key.ttl)
    }

    /// Whether any volume of the given class currently accepts writes.
    #[must_use]
    pub fn has_writable_volume(&self, option: &PlacementOption) -> bool {
        self.get_volume_layout(option).active_volume_count(option) > 0
    }

    /// Reserves `count` needle keys on a writable volume of the given
    /// class.
    ///
    /// Returns the file id of the first key, the number of keys
    /// granted, and the data node heading the volume's location list.
    ///
    /// # Errors
    ///
    /// Will return [`Error::CapacityExhausted`] when no writable volume
    /// matches.
    pub fn pick_for_write(
        &self,
        count: u64,
        option: &PlacementOption,
    ) -> Result<(FileId, u64, Arc<Node>)> {
        let layout = self.get_volume_layout(option);
        let (vid, locations) = layout.pick_for_write(option)?;
        let head = locations
            .first()
            .cloned()
            .ok_or_else(|| Error::CapacityExhausted("no writable volumes available".to_string()))?;

        let (key, count) = self.sequence.next_file_id(count);
        let file_id = FileId::new(vid, key, rand::thread_rng().gen());
        Ok((file_id, count, head))
    }

    /// Registers volume `v` as hosted by `dn` in the layout registry.
    pub fn register_volume_layout(&self, v: &VolumeInfo, dn: &Arc<Node>) {
        self.get_volume_layout(&PlacementOption {
            collection: v.collection.clone(),
            replica_placement: v.replica_placement,
            ttl: v.ttl,
            data_center: None,
        })
        .register_volume(v, dn);
    }

    /// Removes volume `v` hosted by `dn` from the layout registry.
    pub fn unregister_volume_layout(&self, v: &VolumeInfo, dn: &Node) {
        log::info!("removing volume info: {v}");
        self.get_volume_layout(&PlacementOption {
            collection: v.collection.clone(),
            replica_placement: v.replica_placement,
            ttl: v.ttl,
            data_center: None,
        })
        .unregister_volume(v.id, dn);
    }

    /// Folds one join heartbeat into the tree: resolves the node's
    /// actual location, refreshes its volume set, updates the layout
    /// registry and advances the sequencer past the node's largest key.
    pub fn process_join(&self, join: &JoinMessage) {
        self.sequence.set_max(join.max_file_key);

        let (dc_name, rack_name) = configuration::locate(
            self.configuration.as_ref(),
            &join.ip,
            &join.data_center,
            &join.rack,
        );
        let dc = self.get_or_create_data_center(&dc_name);
        let rack = dc.get_or_create_rack(&rack_name);

        if join.is_init {
            if let Some(dn) = rack.find_data_node(&join.ip, join.port) {
                self.unregister_data_node(&dn);
            }
        }

        let dn = rack.get_or_create_data_node(
            &join.ip,
            join.port,
            &join.public_url,
            join.max_volume_count,
        );

        let deleted = dn.update_volumes(join.volumes.clone());
        for v in &join.volumes {
            self.register_volume_layout(v, &dn);
        }
        for v in &deleted {
            self.unregister_volume_layout(v, &dn);
        }
    }

    /// Drops a data node from the tree and takes its volumes out of
    /// the layout registry.
    pub fn unregister_data_node(&self, dn: &Arc<Node>) {
        for v in dn.get_volumes() {
            let layout = self.get_volume_layout(&PlacementOption {
                collection: v.collection.clone(),
                replica_placement: v.replica_placement,
                ttl: v.ttl,
                data_center: None,
            });
            layout.set_volume_unavailable(v.id, dn);
        }
        dn.adjust_volume_count(-dn.volume_count());
        dn.adjust_active_volume_count(-dn.active_volume_count());
        dn.adjust_max_volume_count(-dn.max_volume_count());
        if let Some(rack) = dn.parent() {
            rack.unlink_child_node(dn.id());
        }
    }

    /// Next unused volume id, judged from the tree's aggregate.
    #[must_use]
    pub fn next_volume_id(&self) -> VolumeId {
        self.root.max_volume_id().next()
    }

    /// One sweep of dead-node detection and full-volume reporting.
    ///
    /// Data nodes whose last heartbeat is older than two pulses are
    /// declared dead. Events go to the channels handed out at
    /// construction; the sweep blocks until they are consumed.
    pub fn collect_dead_nodes_and_full_volumes(&self) {
        let fresh_threshold = clock::unix_seconds_i64() - 2 * self.pulse;
        self.root
            .collect_dead_nodes_and_full_volumes(fresh_threshold, self.volume_size_limit);
    }
}
