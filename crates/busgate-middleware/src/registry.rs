//! [`DataTree`] – the `node/property` registry.
//!
//! Maps every registered [`Node`] id to its definition and to the subscribe
//! queue of the interface module that owns it. The loader builds the tree
//! once; after that it is wrapped in an `Arc` and only read, so the router
//! needs no locking to resolve destinations.

use std::collections::HashMap;

use busgate_types::{GatewayError, Node, Property, split_path};

use crate::queue::BusSender;

struct NodeEntry {
    node: Node,
    subscribe_queue: BusSender,
}

/// Read-mostly registry of every addressable node.
#[derive(Default)]
pub struct DataTree {
    nodes: HashMap<String, NodeEntry>,
}

impl DataTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` under `node_id`, owned by the module behind
    /// `subscribe_queue`.
    ///
    /// The first registrant wins; a later node with the same id is rejected
    /// and the existing entry is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateNode`] when `node_id` is taken.
    pub fn register(
        &mut self,
        node_id: &str,
        node: Node,
        subscribe_queue: BusSender,
    ) -> Result<(), GatewayError> {
        if self.nodes.contains_key(node_id) {
            return Err(GatewayError::DuplicateNode(node_id.to_string()));
        }
        self.nodes.insert(
            node_id.to_string(),
            NodeEntry {
                node,
                subscribe_queue,
            },
        );
        Ok(())
    }

    /// Resolve `path` to its node and property.
    ///
    /// * `(None, None)` – fewer than two segments, or the node is unknown.
    /// * `(Some(node), None)` – the node exists but the property does not.
    /// * `(Some(node), Some(property))` – full match.
    ///
    /// Segments after the property id (e.g. a `/set` verb) are ignored.
    pub fn resolve(&self, path: &str) -> (Option<&Node>, Option<&Property>) {
        let Some((node_id, property_id)) = split_path(path) else {
            return (None, None);
        };
        match self.nodes.get(node_id) {
            Some(entry) => (Some(&entry.node), entry.node.property(property_id)),
            None => (None, None),
        }
    }

    /// The subscribe queue of the module owning `node_id`.
    pub fn subscribe_queue(&self, node_id: &str) -> Option<&BusSender> {
        self.nodes.get(node_id).map(|entry| &entry.subscribe_queue)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every registered node, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().map(|entry| &entry.node)
    }
}
