// ── Network handler ──
//
// Per-gateway façade over the connection, the registry and the polling
// loop. Discovery notifications leave the polling cycle through a
// single-consumer worker so listener code (which may call back into
// the handler, or block on its own locks) can never stall a cycle.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zwaynet_api::{GatewayClient, TransportConfig};

use crate::config::HandlerConfig;
use crate::connection::ConnectionManager;
use crate::driver::{DiscoveryListener, NodeDriver};
use crate::error::CoreError;
use crate::model::{Device, ModelTree, NodeId, NodeInfo};
use crate::poller::{self, TriggerSchedule};
use crate::registry::NodeRegistry;

/// Command class id of the binary switch.
const COMMAND_CLASS_SWITCH_BINARY: u32 = 37;

/// Firmware line above which binary switches reject numeric set values
/// and expect booleans instead.
const BINARY_SWITCH_BOOL_FIRMWARE: FirmwareVersion = FirmwareVersion {
    major: 1,
    minor: 3,
    patch: 1,
};

/// A topology change detected by discovery.
///
/// Carries a cloned device fragment (when the tree still has one) so
/// listeners can inspect capabilities without re-fetching.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A node present on the network with no driver bound to it.
    Unknown {
        node_id: NodeId,
        fragment: Option<Device>,
    },
    /// A bound node that vanished from the network.
    Missing {
        node_id: NodeId,
        fragment: Option<Device>,
    },
}

/// Jobs for the single-consumer worker: the one-shot initial state read
/// plus discovery notifications, all on one centrally-managed task.
enum WorkItem {
    InitialRead,
    Notify(DiscoveryEvent),
}

/// Discovery bookkeeping. Announced sets guarantee each topology change
/// is reported exactly once; entries are cleared when the condition
/// resolves (node bound / node reappears), so a recurrence re-announces.
#[derive(Default)]
struct DiscoveryState {
    announced_unknown: HashSet<NodeId>,
    announced_missing: HashSet<NodeId>,
    last_included: i64,
    last_excluded: i64,
}

/// Shared state between the handler façade, the polling loop and the
/// notification worker.
pub(crate) struct HandlerInner {
    pub(crate) endpoint: String,
    /// Transport clone for command execution, bypassing the connection
    /// mutex so writes never wait behind an in-flight fetch.
    pub(crate) client: GatewayClient,
    conn: tokio::sync::Mutex<ConnectionManager>,
    pub(crate) registry: NodeRegistry,
    pub(crate) triggers: TriggerSchedule,
    pub(crate) auto_discovery: bool,
    polling_interval: RwLock<Duration>,
    /// Latest typed snapshot, readable without touching the connection.
    current: RwLock<Option<Arc<ModelTree>>>,
    discovery: Mutex<DiscoveryState>,
    listeners: RwLock<Vec<Arc<dyn DiscoveryListener>>>,
    work_tx: mpsc::UnboundedSender<WorkItem>,
}

impl HandlerInner {
    pub(crate) fn polling_interval(&self) -> Duration {
        *self
            .polling_interval
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current_tree(&self) -> Option<Arc<ModelTree>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch-and-merge since the watermark; publish the fresh snapshot.
    pub(crate) async fn resync(&self) -> Result<Arc<ModelTree>, CoreError> {
        let tree = self.conn.lock().await.update_devices().await?;
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&tree));
        Ok(tree)
    }

    /// Diff the tree against the registry and queue discovery events.
    ///
    /// Skipped entirely while an inclusion or exclusion ceremony is in
    /// progress: the tree churns mid-ceremony and would produce phantom
    /// unknown/missing reports. A completed ceremony is detected
    /// through the gateway's counters, which clears the announced state
    /// for the affected node so it gets a fresh report.
    pub(crate) fn run_discovery(&self, tree: &ModelTree) {
        if let Some(controller) = &tree.controller {
            if !controller.data.is_idle() {
                debug!(
                    endpoint = %self.endpoint,
                    state = controller.data.controller_state(),
                    "ceremony in progress, discovery deferred"
                );
                return;
            }
        }

        let bound = self.registry.bound_node_ids();
        let mut state = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(controller) = &tree.controller {
            let included = controller.data.last_included_device();
            if included != state.last_included {
                state.last_included = included;
                if included >= 0 {
                    let node = NodeId(u32::try_from(included).unwrap_or_default());
                    info!(endpoint = %self.endpoint, node = %node, "inclusion ceremony completed");
                    state.announced_unknown.remove(&node);
                }
            }

            let excluded = controller.data.last_excluded_device();
            if excluded != state.last_excluded {
                state.last_excluded = excluded;
                if excluded >= 0 {
                    let node = NodeId(u32::try_from(excluded).unwrap_or_default());
                    info!(endpoint = %self.endpoint, node = %node, "exclusion ceremony completed");
                    self.triggers.remove_node(node);
                    state.announced_missing.remove(&node);
                }
            }
        }

        // nodes on the network that nobody drives
        for (&node_id, device) in &tree.devices {
            if bound.contains(&node_id) {
                state.announced_unknown.remove(&node_id);
            } else if state.announced_unknown.insert(node_id) {
                self.queue_event(DiscoveryEvent::Unknown {
                    node_id,
                    fragment: Some(device.clone()),
                });
            }
        }
        state
            .announced_unknown
            .retain(|id| tree.contains_node(*id));

        // bound nodes the network no longer has
        for node_id in bound {
            if tree.contains_node(node_id) {
                state.announced_missing.remove(&node_id);
            } else if state.announced_missing.insert(node_id) {
                self.queue_event(DiscoveryEvent::Missing {
                    node_id,
                    fragment: None,
                });
            }
        }
    }

    fn queue_event(&self, event: DiscoveryEvent) {
        // receiver lives as long as the worker task; a send failure
        // only happens after shutdown
        if self.work_tx.send(WorkItem::Notify(event)).is_err() {
            debug!(endpoint = %self.endpoint, "notification worker gone, event dropped");
        }
    }

    fn deliver(&self, event: &DiscoveryEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match event {
            DiscoveryEvent::Unknown { node_id, fragment } => {
                info!(endpoint = %self.endpoint, node = %node_id, "unknown device on network");
                for listener in &listeners {
                    listener.unknown_device(fragment.as_ref(), *node_id);
                }
            }
            DiscoveryEvent::Missing { node_id, fragment } => {
                info!(endpoint = %self.endpoint, node = %node_id, "bound device missing from network");
                for listener in &listeners {
                    listener.missing_device(fragment.as_ref(), *node_id);
                }
            }
        }
    }
}

/// Single-consumer worker. The first queued item is the initial state
/// read; after that it drains discovery events, FIFO, one at a time,
/// off the polling cycle.
async fn worker_loop(
    inner: Arc<HandlerInner>,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(WorkItem::InitialRead) => {
                    if let Err(e) = inner.resync().await {
                        warn!(endpoint = %inner.endpoint, error = %e, "initial state read failed");
                    }
                }
                Some(WorkItem::Notify(event)) => inner.deliver(&event),
                None => break,
            },
        }
    }
    debug!(endpoint = %inner.endpoint, "worker stopped");
}

/// Per-gateway network handler.
///
/// Owns the polling loop and the notification worker; both run until
/// [`shutdown`](Self::shutdown). Cheap to share via `Arc`.
pub struct NetworkHandler {
    inner: Arc<HandlerInner>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkHandler {
    /// Build a handler and start its background tasks.
    ///
    /// Must be called within a tokio runtime. The first full snapshot
    /// is fetched by a one-shot job on the worker task; construction
    /// never blocks on the gateway.
    pub fn new(config: &HandlerConfig) -> Result<Arc<Self>, CoreError> {
        config.validate()?;

        let mut transport = TransportConfig {
            timeout: config.timeout,
            credentials: config.credentials.clone(),
        };
        if transport.timeout.is_zero() {
            transport.timeout = TransportConfig::default().timeout;
        }

        let client = GatewayClient::new(config.endpoint.clone(), &transport)
            .map_err(CoreError::Transport)?;
        let conn = ConnectionManager::new(client.clone());

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(HandlerInner {
            endpoint: config.endpoint_key(),
            client,
            conn: tokio::sync::Mutex::new(conn),
            registry: NodeRegistry::new(),
            triggers: TriggerSchedule::default(),
            auto_discovery: config.auto_discovery,
            polling_interval: RwLock::new(config.polling_interval),
            current: RwLock::new(None),
            discovery: Mutex::new(DiscoveryState::default()),
            listeners: RwLock::new(Vec::new()),
            work_tx,
        });

        // the initial read is the worker's first job
        let _ = inner.work_tx.send(WorkItem::InitialRead);

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(poller::poll_loop(Arc::clone(&inner), cancel.clone())),
            tokio::spawn(worker_loop(Arc::clone(&inner), work_rx, cancel.clone())),
        ];

        info!(endpoint = %inner.endpoint, interval_ms = config.polling_interval.as_millis(), "network handler started");
        Ok(Arc::new(Self {
            inner,
            cancel,
            tasks: Mutex::new(tasks),
        }))
    }

    /// The endpoint key this handler serves.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    // ── Driver lifecycle ─────────────────────────────────────────────

    /// Bind a driver to its node and schedule its forced refresh.
    ///
    /// A zero `refresh_interval` disables forced refresh for the node;
    /// anything below the global polling interval is clamped up to it.
    pub fn add_driver(&self, info: NodeInfo, refresh_interval: Duration, driver: Arc<dyn NodeDriver>) {
        debug!(
            endpoint = %self.inner.endpoint,
            node = %info.node_id(),
            uri = driver.device_uri(),
            "binding driver"
        );
        self.inner.triggers.schedule(
            info.clone(),
            refresh_interval,
            self.inner.polling_interval(),
        );
        self.inner.registry.bind(info, driver);
    }

    /// Detach a driver, dropping its node binding and refresh schedule.
    pub fn remove_driver(&self, driver: &dyn NodeDriver) {
        if let Some(info) = self.inner.registry.unbind_driver(driver) {
            self.inner.triggers.remove_node(info.node_id());
            debug!(endpoint = %self.inner.endpoint, node = %info.node_id(), "driver detached");
        }
    }

    /// Detach whatever driver is bound to the node.
    pub fn remove_node(&self, node_id: NodeId) {
        if self.inner.registry.unbind_node(node_id).is_some() {
            self.inner.triggers.remove_node(node_id);
            debug!(endpoint = %self.inner.endpoint, node = %node_id, "node unbound");
        }
    }

    /// The external URI of the driver bound to a node, if any.
    pub fn device_uri_for(&self, node_id: NodeId) -> Option<String> {
        self.inner.registry.device_uri_for(node_id)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Set a command-class value on a device instance.
    ///
    /// Builds and executes
    /// `devices[N].instances[I].commandClasses[CC].Set(value)`.
    pub async fn write(
        &self,
        node_id: NodeId,
        instance_id: u32,
        class_id: u32,
        value: &str,
    ) -> Result<String, CoreError> {
        let value = self.patch_value(class_id, value);
        let command = format!(
            "devices[{node_id}].instances[{instance_id}].commandClasses[{class_id}].Set({value})"
        );
        Ok(self.inner.client.execute(&command).await?)
    }

    /// Invoke a controller-level function, e.g.
    /// `controller_write("AddNodeToNetwork", "1")` to open inclusion.
    pub async fn controller_write(&self, function: &str, value: &str) -> Result<String, CoreError> {
        Ok(self.inner.client.execute(&format!("{function}({value})")).await?)
    }

    /// Probe a node's reachability with a no-operation frame.
    pub async fn ping(&self, node_id: NodeId) -> Result<String, CoreError> {
        Ok(self.inner.client.ping(node_id.0).await?)
    }

    /// Binary switches on firmware newer than 1.3.1 reject numeric set
    /// values; translate the conventional 255/0 levels to booleans.
    fn patch_value(&self, class_id: u32, value: &str) -> String {
        if class_id != COMMAND_CLASS_SWITCH_BINARY {
            return value.to_owned();
        }
        let needs_bool = self
            .inner
            .current_tree()
            .and_then(|tree| {
                tree.controller
                    .as_ref()
                    .and_then(|c| c.data.software_revision_version().map(FirmwareVersion::parse))
            })
            .flatten()
            .is_some_and(|version| version > BINARY_SWITCH_BOOL_FIRMWARE);
        if !needs_bool {
            return value.to_owned();
        }

        if value == "255" {
            "true".to_owned()
        } else {
            "false".to_owned()
        }
    }

    // ── Model access ─────────────────────────────────────────────────

    /// The latest model snapshot, if the first fetch has completed.
    pub fn tree(&self) -> Option<Arc<ModelTree>> {
        self.inner.current_tree()
    }

    /// A cloned device fragment from the latest snapshot.
    pub fn raw_device(&self, node_id: NodeId) -> Option<Device> {
        self.inner
            .current_tree()
            .and_then(|tree| tree.device(node_id).cloned())
    }

    // ── Discovery listeners ──────────────────────────────────────────

    pub fn add_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn remove_discovery_listener(&self, listener: &Arc<dyn DiscoveryListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    // ── Runtime control ──────────────────────────────────────────────

    /// Change the global polling interval. Takes effect after the
    /// in-flight cycle; already-scheduled forced refreshes keep their
    /// effective interval.
    pub fn set_polling_interval(&self, interval: Duration) -> Result<(), CoreError> {
        if interval.is_zero() {
            return Err(CoreError::Config {
                message: "polling_interval must be greater than zero".into(),
            });
        }
        *self
            .inner
            .polling_interval
            .write()
            .unwrap_or_else(PoisonError::into_inner) = interval;
        info!(endpoint = %self.inner.endpoint, interval_ms = interval.as_millis(), "polling interval updated");
        Ok(())
    }

    /// Stop the polling loop and the notification worker.
    ///
    /// Cancellation is cooperative: an in-flight cycle finishes before
    /// the task exits. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(endpoint = %self.inner.endpoint, error = %e, "background task panicked");
                }
            }
        }
        info!(endpoint = %self.inner.endpoint, "network handler stopped");
    }
}

/// Semantic firmware version, parsed from the gateway's
/// `softwareRevisionVersion` string (`"v1.7.2"`, `"v2.0.0-rc2"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FirmwareVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl FirmwareVersion {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().trim_start_matches('v');
        // drop any pre-release / build suffix
        let raw = raw
            .split_once(['-', '+'])
            .map_or(raw, |(version, _)| version);

        let mut parts = raw.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}
