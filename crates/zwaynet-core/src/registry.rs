// ── Node registry ──
//
// Bidirectional binding between physical nodes and logical drivers.
// A driver has at most one NodeInfo; a NodeInfo has at most one driver.
// Both directional maps live behind ONE lock so no observer can see
// one direction updated and the other stale — per-shard locking
// (dashmap) cannot give that guarantee across two maps.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::driver::NodeDriver;
use crate::model::{NodeId, NodeIdentity, NodeInfo};

/// One live node ↔ driver association.
#[derive(Clone)]
pub struct NodeBinding {
    pub info: NodeInfo,
    pub driver: Arc<dyn NodeDriver>,
}

#[derive(Default)]
struct Inner {
    by_node: HashMap<NodeIdentity, NodeBinding>,
    uri_to_node: HashMap<String, NodeIdentity>,
}

/// Source of truth for "is this node already configured".
///
/// Safe for concurrent reads from the dispatch path while attach /
/// detach mutates from driver threads.
#[derive(Default)]
pub struct NodeRegistry {
    inner: RwLock<Inner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a node to a driver. Displaces any existing binding for the
    /// same node or the same driver URI, keeping the bijection intact.
    pub fn bind(&self, info: NodeInfo, driver: Arc<dyn NodeDriver>) {
        let uri = driver.device_uri().to_owned();
        debug!(node = %info.node_id(), %uri, "binding node to driver");

        let mut inner = self.write();

        if let Some(previous) = inner.uri_to_node.remove(&uri) {
            inner.by_node.remove(&previous);
        }
        if let Some(displaced) = inner.by_node.remove(&info.identity) {
            inner.uri_to_node.remove(displaced.driver.device_uri());
        }

        inner.uri_to_node.insert(uri, info.identity.clone());
        inner.by_node.insert(info.identity.clone(), NodeBinding { info, driver });
    }

    /// Remove the binding for a node identity. Returns the detached
    /// driver, if one was bound.
    pub fn unbind(&self, identity: &NodeIdentity) -> Option<Arc<dyn NodeDriver>> {
        let mut inner = self.write();
        let binding = inner.by_node.remove(identity)?;
        inner.uri_to_node.remove(binding.driver.device_uri());
        Some(binding.driver)
    }

    /// Remove a binding by driver. Returns the node info it was bound to.
    pub fn unbind_driver(&self, driver: &dyn NodeDriver) -> Option<NodeInfo> {
        let mut inner = self.write();
        let identity = inner.uri_to_node.remove(driver.device_uri())?;
        inner.by_node.remove(&identity).map(|b| b.info)
    }

    /// Remove any binding matching the raw node id, ignoring the
    /// endpoint — used when a bare numeric id is all discovery knows.
    pub fn unbind_node(&self, node_id: NodeId) -> Option<NodeInfo> {
        let mut inner = self.write();
        let identity = inner
            .by_node
            .keys()
            .find(|identity| identity.node_id == node_id)
            .cloned()?;
        let binding = inner.by_node.remove(&identity)?;
        inner.uri_to_node.remove(binding.driver.device_uri());
        Some(binding.info)
    }

    /// The driver bound to a node identity.
    pub fn driver_for(&self, identity: &NodeIdentity) -> Option<Arc<dyn NodeDriver>> {
        self.read().by_node.get(identity).map(|b| Arc::clone(&b.driver))
    }

    /// The node info a driver is bound to.
    pub fn node_info_for(&self, driver: &dyn NodeDriver) -> Option<NodeInfo> {
        let inner = self.read();
        let identity = inner.uri_to_node.get(driver.device_uri())?;
        inner.by_node.get(identity).map(|b| b.info.clone())
    }

    /// External identifier of the first bound driver matching the raw
    /// node id, if any.
    pub fn device_uri_for(&self, node_id: NodeId) -> Option<String> {
        let inner = self.read();
        inner
            .by_node
            .iter()
            .find(|(identity, _)| identity.node_id == node_id)
            .map(|(_, binding)| binding.driver.device_uri().to_owned())
    }

    pub fn is_bound(&self, node_id: NodeId) -> bool {
        self.read()
            .by_node
            .keys()
            .any(|identity| identity.node_id == node_id)
    }

    /// Node ids of every bound node.
    pub fn bound_node_ids(&self) -> HashSet<NodeId> {
        self.read()
            .by_node
            .keys()
            .map(|identity| identity.node_id)
            .collect()
    }

    /// Snapshot of all bindings, for dispatch.
    pub fn bindings(&self) -> Vec<NodeBinding> {
        self.read().by_node.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_node.is_empty()
    }

    // Lock poisoning only happens if a panic escapes a critical
    // section; recover the data rather than cascading the panic.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
