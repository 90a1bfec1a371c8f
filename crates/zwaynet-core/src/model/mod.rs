// ── Domain model ──
//
// Typed views over the gateway's JSON tree, plus the node-identity
// types that drivers register with.

mod node;
mod tree;

pub use node::{NodeIdentity, NodeInfo};
pub use tree::{
    ClassData, CommandClass, Controller, ControllerData, DataElem, Device, Instance, ModelTree,
};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric id of a physical node, unique within one gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}
