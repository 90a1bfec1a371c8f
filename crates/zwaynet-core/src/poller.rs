// ── Polling scheduler ──
//
// One loop per gateway: fire due forced refreshes, resync the model
// tree, run discovery, dispatch fragments to bound drivers, sleep.
// HTTP calls are awaited inline, so cycle latency includes gateway
// round-trips — an accepted trade-off at Z-Wave traffic rates.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handler::HandlerInner;
use crate::model::{NodeId, NodeInfo};

/// Per-node forced-refresh schedule entry.
struct TriggerSlot {
    info: NodeInfo,
    next_fire: Instant,
    every: Duration,
}

/// The set of nodes needing periodic forced refresh.
///
/// Some devices never report state changes on their own; the gateway
/// must be told to `Get()` them. Intervals below the global polling
/// interval cannot be honored (sub-cycle granularity does not exist)
/// and are clamped up at registration time.
#[derive(Default)]
pub(crate) struct TriggerSchedule {
    slots: Mutex<Vec<TriggerSlot>>,
}

impl TriggerSchedule {
    /// Register a node for forced refresh every `every`. A zero
    /// interval means "no forced refresh" — the node is not scheduled.
    pub(crate) fn schedule(&self, info: NodeInfo, every: Duration, global: Duration) {
        if every.is_zero() {
            return;
        }

        let every = if every < global {
            warn!(
                node = %info.node_id(),
                requested_ms = every.as_millis(),
                clamped_ms = global.as_millis(),
                "forced-refresh interval below polling interval, clamping"
            );
            global
        } else {
            every
        };

        let slot = TriggerSlot {
            info,
            next_fire: Instant::now() + every,
            every,
        };
        self.lock().push(slot);
    }

    /// Drop every slot for the given node id.
    pub(crate) fn remove_node(&self, node_id: NodeId) {
        self.lock().retain(|slot| slot.info.node_id() != node_id);
    }

    /// Collect the nodes whose fire time has elapsed and advance their
    /// slots on a fixed cadence: `next_fire` moves in whole intervals
    /// (skipping to the next future slot), never to `now + every`, so
    /// load cannot accumulate drift or produce catch-up bursts.
    pub(crate) fn take_due(&self, now: Instant) -> Vec<NodeInfo> {
        let mut due = Vec::new();
        for slot in &mut *self.lock() {
            if slot.next_fire <= now {
                due.push(slot.info.clone());
                while slot.next_fire <= now {
                    slot.next_fire += slot.every;
                }
            }
        }
        due
    }

    /// The effective interval scheduled for a node, if scheduled.
    #[cfg(test)]
    pub(crate) fn interval_for(&self, node_id: NodeId) -> Option<Duration> {
        self.lock()
            .iter()
            .find(|slot| slot.info.node_id() == node_id)
            .map(|slot| slot.every)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TriggerSlot>> {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The polling loop. The first cycle runs one interval after startup —
/// the initial state read is the worker's job, not the poller's. Runs
/// until cancelled; cancellation is cooperative, the in-flight cycle
/// always finishes before the task exits.
pub(crate) async fn poll_loop(inner: std::sync::Arc<HandlerInner>, cancel: CancellationToken) {
    loop {
        let period = inner.polling_interval();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }

        debug!(endpoint = %inner.endpoint, "starting polling cycle");
        run_cycle(&inner).await;
    }
    debug!(endpoint = %inner.endpoint, "polling loop stopped");
}

/// One polling cycle. Every per-node failure is logged and skipped;
/// nothing here may prevent the next cycle from running on schedule.
async fn run_cycle(inner: &HandlerInner) {
    // 1. forced refreshes that have come due
    let due = inner.triggers.take_due(Instant::now());
    if !due.is_empty() {
        fire_forced_refreshes(inner, &due).await;
    }

    // 2. full resync (fetch + merge), discovery diff on success
    match inner.resync().await {
        Ok(tree) => {
            if inner.auto_discovery {
                inner.run_discovery(&tree);
            }

            // 3. route fragments to bound drivers, sequentially
            dispatch_updates(inner, &tree);
        }
        Err(e) => {
            warn!(endpoint = %inner.endpoint, error = %e, "resync failed, keeping last-known-good tree");
        }
    }
}

/// Issue one `Get()` per registered (instance, command class) pair of
/// each due node, skipping nodes that vanished from the tree between
/// scheduling and firing.
async fn fire_forced_refreshes(inner: &HandlerInner, due: &[NodeInfo]) {
    let tree = inner.current_tree();
    let present: HashSet<NodeId> = tree
        .as_ref()
        .map(|t| t.devices.keys().copied().collect())
        .unwrap_or_default();

    for info in due {
        let node_id = info.node_id();
        if !inner.registry.is_bound(node_id) {
            continue;
        }
        if !present.contains(&node_id) {
            // removal at network level can precede driver detach
            continue;
        }

        for (instance_id, classes) in &info.instances {
            for class_id in classes {
                let command = format!(
                    "devices[{node_id}].instances[{instance_id}].commandClasses[{class_id}].Get()"
                );
                if let Err(e) = inner.client.execute(&command).await {
                    warn!(node = %node_id, error = %e, "forced refresh command failed");
                }
            }
        }
    }
}

/// Deliver device / instance / controller fragments to every bound
/// driver. Dispatch is synchronous and sequential within the cycle.
fn dispatch_updates(inner: &HandlerInner, tree: &crate::model::ModelTree) {
    for binding in inner.registry.bindings() {
        let info = &binding.info;
        let controller = if info.is_controller {
            tree.controller.as_ref()
        } else {
            None
        };

        let Some(device) = tree.device(info.node_id()) else {
            // some gateways report the controlling node only under
            // `controller`, never in `devices`
            if controller.is_some() {
                binding.driver.on_update(None, None, controller);
            } else {
                // topology inconsistency — discovery announces it,
                // dispatch just skips
                debug!(node = %info.node_id(), "bound node absent from tree, skipping dispatch");
            }
            continue;
        };

        if info.instances.is_empty() {
            // controller bindings may register no instances at all
            binding.driver.on_update(Some(device), None, controller);
            continue;
        }

        for instance_id in info.instance_ids() {
            match device.instance(instance_id) {
                Some(instance) => {
                    binding
                        .driver
                        .on_update(Some(device), Some(instance), controller);
                }
                None => {
                    warn!(
                        node = %info.node_id(),
                        instance = instance_id,
                        "registered instance missing from device"
                    );
                }
            }
        }
    }
}
