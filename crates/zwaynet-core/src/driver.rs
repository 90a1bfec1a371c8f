// ── Driver seams ──
//
// The per-device-category state machines live outside this crate; the
// network layer only needs these two capability interfaces.

use crate::model::{Controller, Device, Instance, NodeId};

/// A logical device driver bound to one physical node.
///
/// Implementations are the per-category state machines (dimmer, sensor,
/// meter, …). `on_update` is called synchronously from the polling
/// cycle, once per registered instance — it must not block, or the
/// whole cycle stalls. This is a contract drivers honor, not one the
/// poller enforces.
pub trait NodeDriver: Send + Sync {
    /// Stable external identifier of the logical device (its URI in the
    /// environment configuration). Uniquely identifies the driver.
    fn device_uri(&self) -> &str;

    /// Consume the tree fragments for this driver's node.
    ///
    /// `device` is the node's subtree, `instance` one of the instances
    /// the driver registered for, `controller` the controller fragment
    /// (only for the driver managing the controlling node).
    fn on_update(
        &self,
        device: Option<&Device>,
        instance: Option<&Instance>,
        controller: Option<&Controller>,
    );
}

/// Receives topology-change notifications from discovery.
///
/// Delivery is asynchronous, off the polling cycle, FIFO per listener.
/// Listeners decide whether and how to instantiate or tear down
/// logical devices.
pub trait DiscoveryListener: Send + Sync {
    /// A node exists on the network but no driver is bound to it.
    fn unknown_device(&self, fragment: Option<&Device>, node_id: NodeId);

    /// A bound node no longer exists on the network. The recommended
    /// reaction is to unbind and tear down the logical device.
    fn missing_device(&self, fragment: Option<&Device>, node_id: NodeId);
}
