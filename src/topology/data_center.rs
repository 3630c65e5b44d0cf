use super::node::{Kind, Node, NodeType};
use std::sync::Arc;

/// Data-center-level operations: managing the racks below one data
/// center
impl Node {
    /// Creates an unlinked data center node.
    #[must_use]
    pub fn new_data_center(id: &str) -> Arc<Self> {
        Self::new(id.to_string(), Kind::DataCenter)
    }

    /// Returns the rack named `rack_name`, creating and linking it if
    /// it is new.
    ///
    /// # Panics
    ///
    /// Panics if called on a node that is not a data center.
    pub fn get_or_create_rack(self: &Arc<Self>, rack_name: &str) -> Arc<Node> {
        assert_eq!(NodeType::DataCenter, self.node_type());

        if let Some(rack) = self.child(rack_name) {
            return rack;
        }
        let rack = Node::new_rack(rack_name);
        self.link_child_node(rack.clone());
        rack
    }
}
