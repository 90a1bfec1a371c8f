// ── Node identity and registration info ──

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use super::NodeId;

/// Identity of a physical node: gateway endpoint plus numeric node id.
///
/// Two identities with equal endpoint and id refer to the same node,
/// regardless of what instances or command classes a driver cares
/// about. Never mutated once created, only replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub endpoint: String,
    pub node_id: NodeId,
}

impl NodeIdentity {
    pub fn new(endpoint: impl Into<String>, node_id: impl Into<NodeId>) -> Self {
        Self {
            endpoint: endpoint.into(),
            node_id: node_id.into(),
        }
    }
}

/// Everything a driver declares about its node when attaching.
///
/// `instances` maps each instance id to the set of command classes
/// that should receive a `Get()` during a forced refresh. Built once
/// per driver attach, destroyed on detach.
///
/// Equality and hashing delegate to the identity alone, so lookups only
/// care about *which* node, not what the driver wants refreshed.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub identity: NodeIdentity,
    pub is_controller: bool,
    pub instances: HashMap<u32, BTreeSet<u32>>,
}

impl NodeInfo {
    pub fn new(
        identity: NodeIdentity,
        is_controller: bool,
        instances: HashMap<u32, BTreeSet<u32>>,
    ) -> Self {
        Self {
            identity,
            is_controller,
            instances,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.identity.node_id
    }

    pub fn endpoint(&self) -> &str {
        &self.identity.endpoint
    }

    /// The instance ids this node's driver consumes.
    pub fn instance_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.instances.keys().copied()
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for NodeInfo {}

impl Hash for NodeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}
