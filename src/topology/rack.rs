use super::{
    data_node::DataNodeState,
    node::{Kind, Node, NodeType},
};
use crate::clock;
use std::sync::Arc;

/// Rack-level operations: managing the data nodes hanging below one
/// rack
impl Node {
    /// Creates an unlinked rack node.
    #[must_use]
    pub fn new_rack(id: &str) -> Arc<Self> {
        Self::new(id.to_string(), Kind::Rack)
    }

    /// Finds the data node answering under `ip:port`.
    ///
    /// # Panics
    ///
    /// Panics if called on a node whose children are not data nodes.
    #[must_use]
    pub fn find_data_node(&self, ip: &str, port: u16) -> Option<Arc<Node>> {
        self.children()
            .into_iter()
            .find(|dn| dn.match_location(ip, port))
    }

    /// Returns the data node for `ip:port`, creating and linking it if
    /// it is new.
    ///
    /// A known node gets its heartbeat refreshed; if it had been
    /// declared dead it is revived, its slot count is brought up to
    /// date, and it is announced on the root's `recovered_nodes`
    /// channel.
    ///
    /// # Panics
    ///
    /// Panics if called on a node that is not a rack.
    pub fn get_or_create_data_node(
        self: &Arc<Self>,
        ip: &str,
        port: u16,
        public_url: &str,
        max_volume_count: i64,
    ) -> Arc<Node> {
        assert_eq!(NodeType::Rack, self.node_type());

        if let Some(dn) = self.find_data_node(ip, port) {
            dn.set_last_seen(clock::unix_seconds_i64());
            if dn.is_dead() {
                dn.set_dead(false);
                let root = self.get_root();
                if let Some(senders) = root.event_senders() {
                    let _ = senders.recovered_nodes.send(dn.clone());
                }
                dn.adjust_max_volume_count(max_volume_count - dn.max_volume_count());
            }
            return dn;
        }

        let dn = Node::new(
            format!("{ip}:{port}"),
            Kind::DataNode(DataNodeState::new(
                ip.to_string(),
                port,
                public_url.to_string(),
            )),
        );
        dn.set_last_seen(clock::unix_seconds_i64());
        dn.adjust_max_volume_count(max_volume_count);
        self.link_child_node(dn.clone());
        dn
    }
}

impl Node {
    /// Refreshes a data node's heartbeat timestamp. Ignored on inner
    /// nodes.
    pub fn set_last_seen(&self, unix_seconds: i64) {
        if let Kind::DataNode(state) = &self.kind {
            state.set_last_seen(unix_seconds);
        }
    }

    pub(crate) fn set_dead(&self, dead: bool) {
        if let Kind::DataNode(state) = &self.kind {
            state.set_dead(dead);
        }
    }
}
