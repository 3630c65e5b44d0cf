//! The placement tree: topology root, data centers, racks and data
//! nodes, plus the per-collection volume layout registry.

mod configuration;
mod data_center;
mod data_node;
mod node;
mod rack;
#[allow(clippy::module_inception)]
mod topology;
mod volume_layout;

pub use {
    configuration::{Configuration, DEFAULT_DATA_CENTER, DEFAULT_RACK},
    node::{Node, NodeId, NodeType},
    topology::{JoinMessage, Topology, TopologyEvents},
    volume_layout::{Collection, PlacementOption, VolumeLayout},
};
