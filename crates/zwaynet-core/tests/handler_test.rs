//! End-to-end tests against a mock Z-Way gateway.
//!
//! Each test stands up a wiremock server that speaks the gateway's
//! pseudo-REST protocol, points a `NetworkHandler` at it with a short
//! polling interval, and observes what reaches the bound drivers and
//! discovery listeners.

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_test::assert_ok;
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zwaynet_core::{
    Controller, Device, DiscoveryListener, HandlerConfig, Instance, NetworkHandler, NodeDriver,
    NodeId, NodeIdentity, NodeInfo,
};

// ── Test doubles ─────────────────────────────────────────────────────

/// Records the switch level seen on every dispatched update.
struct RecordingDriver {
    uri: String,
    levels: Mutex<Vec<Option<Value>>>,
}

impl RecordingDriver {
    fn new(uri: &str) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.to_owned(),
            levels: Mutex::new(Vec::new()),
        })
    }

    fn seen_levels(&self) -> Vec<Option<Value>> {
        self.levels.lock().unwrap().clone()
    }
}

impl NodeDriver for RecordingDriver {
    fn device_uri(&self) -> &str {
        &self.uri
    }

    fn on_update(
        &self,
        _device: Option<&Device>,
        instance: Option<&Instance>,
        _controller: Option<&Controller>,
    ) {
        let level = instance
            .and_then(|i| i.command_class(38))
            .and_then(|cc| cc.data.elem_value("level"));
        self.levels.lock().unwrap().push(level);
    }
}

/// Records which fragments each dispatch carried.
struct FragmentDriver {
    uri: String,
    seen: Mutex<Vec<(bool, bool, bool)>>,
}

impl FragmentDriver {
    fn new(uri: &str) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.to_owned(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen_fragments(&self) -> Vec<(bool, bool, bool)> {
        self.seen.lock().unwrap().clone()
    }
}

impl NodeDriver for FragmentDriver {
    fn device_uri(&self) -> &str {
        &self.uri
    }

    fn on_update(
        &self,
        device: Option<&Device>,
        instance: Option<&Instance>,
        controller: Option<&Controller>,
    ) {
        self.seen
            .lock()
            .unwrap()
            .push((device.is_some(), instance.is_some(), controller.is_some()));
    }
}

#[derive(Default)]
struct RecordingListener {
    unknown: Mutex<Vec<NodeId>>,
    missing: Mutex<Vec<NodeId>>,
}

impl DiscoveryListener for RecordingListener {
    fn unknown_device(&self, _fragment: Option<&Device>, node_id: NodeId) {
        self.unknown.lock().unwrap().push(node_id);
    }

    fn missing_device(&self, _fragment: Option<&Device>, node_id: NodeId) {
        self.missing.lock().unwrap().push(node_id);
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

fn controller_fragment(state: i64) -> Value {
    json!({
        "data": {
            "lastIncludedDevice": { "value": -1, "updateTime": 0 },
            "lastExcludedDevice": { "value": -1, "updateTime": 0 },
            "controllerState": { "value": state, "updateTime": 10 },
            "softwareRevisionVersion": { "value": "v2.0.0", "updateTime": 1 }
        }
    })
}

fn dimmer_fragment(level: i64) -> Value {
    json!({
        "instances": {
            "0": {
                "commandClasses": {
                    "38": {
                        "name": "SwitchMultilevel",
                        "data": {
                            "updateTime": 90,
                            "level": { "value": level, "updateTime": 100 }
                        }
                    }
                }
            }
        }
    })
}

fn dimmer_info(endpoint: &str, node_id: u32) -> NodeInfo {
    let mut instances = HashMap::new();
    instances.insert(0u32, BTreeSet::from([38u32]));
    NodeInfo::new(NodeIdentity::new(endpoint, node_id), false, instances)
}

/// Serve `snapshot` for the initial full fetch and `{}` for everything
/// after it, so later cycles are no-op merges.
async fn mount_snapshot(server: &MockServer, snapshot: &Value) {
    Mock::given(method("GET"))
        .and(path("/ZWaveAPI/Data/0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/ZWaveAPI/Data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer) -> HandlerConfig {
    HandlerConfig::new(Url::parse(&server.uri()).unwrap())
        .with_polling_interval(Duration::from_millis(25))
}

/// Poll `condition` until it holds or the deadline passes.
async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_is_dispatched_to_bound_driver() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        &json!({
            "controller": controller_fragment(0),
            "devices": { "12": dimmer_fragment(255) },
            "updateTime": 1000
        }),
    )
    .await;

    let handler = NetworkHandler::new(&config_for(&server)).unwrap();
    let driver = RecordingDriver::new("room/livingroom/dimmer");
    handler.add_driver(
        dimmer_info(&server.uri(), 12),
        Duration::ZERO,
        driver.clone(),
    );

    assert!(
        wait_until(Duration::from_secs(2), || !driver.seen_levels().is_empty()).await,
        "driver never received an update"
    );
    assert_eq!(driver.seen_levels()[0], Some(json!(255)));

    handler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_update_reaches_driver() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ZWaveAPI/Data/0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "controller": controller_fragment(0),
            "devices": { "12": dimmer_fragment(255) },
            "updateTime": 1000
        })))
        .mount(&server)
        .await;
    // the gateway answers the watermarked query with a dot-path delta
    Mock::given(method("GET"))
        .and(path("/ZWaveAPI/Data/1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "devices.12.instances.0.commandClasses.38.data.level": {
                "value": 0, "updateTime": 200
            },
            "updateTime": 2000
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/ZWaveAPI/Data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let handler = NetworkHandler::new(&config_for(&server)).unwrap();
    let driver = RecordingDriver::new("room/livingroom/dimmer");
    handler.add_driver(
        dimmer_info(&server.uri(), 12),
        Duration::ZERO,
        driver.clone(),
    );

    assert!(
        wait_until(Duration::from_secs(2), || {
            driver.seen_levels().contains(&Some(json!(0)))
        })
        .await,
        "merged level never reached the driver"
    );
    // the watermark advanced from the delta's own updateTime
    assert_eq!(handler.tree().unwrap().update_time, 2000);

    handler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_node_is_announced_exactly_once() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        &json!({
            "controller": controller_fragment(0),
            "devices": {
                "12": dimmer_fragment(255),
                "99": dimmer_fragment(0)
            },
            "updateTime": 1000
        }),
    )
    .await;

    let config = config_for(&server).with_auto_discovery(true);
    let handler = NetworkHandler::new(&config).unwrap();
    let driver = RecordingDriver::new("room/livingroom/dimmer");
    handler.add_driver(
        dimmer_info(&server.uri(), 12),
        Duration::ZERO,
        driver.clone(),
    );
    let listener = Arc::new(RecordingListener::default());
    handler.add_discovery_listener(listener.clone());

    assert!(
        wait_until(Duration::from_secs(2), || {
            !listener.unknown.lock().unwrap().is_empty()
        })
        .await,
        "unknown node was never announced"
    );

    // several more cycles must not repeat the announcement
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(listener.unknown.lock().unwrap().as_slice(), &[NodeId(99)]);
    assert!(listener.missing.lock().unwrap().is_empty());

    handler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bound_node_absent_from_network_is_announced_missing() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        &json!({
            "controller": controller_fragment(0),
            "devices": { "12": dimmer_fragment(255) },
            "updateTime": 1000
        }),
    )
    .await;

    let config = config_for(&server).with_auto_discovery(true);
    let handler = NetworkHandler::new(&config).unwrap();
    // node 13 is configured locally but does not exist on the network
    handler.add_driver(
        dimmer_info(&server.uri(), 13),
        Duration::ZERO,
        RecordingDriver::new("room/hallway/dimmer"),
    );
    handler.add_driver(
        dimmer_info(&server.uri(), 12),
        Duration::ZERO,
        RecordingDriver::new("room/livingroom/dimmer"),
    );
    let listener = Arc::new(RecordingListener::default());
    handler.add_discovery_listener(listener.clone());

    assert!(
        wait_until(Duration::from_secs(2), || {
            !listener.missing.lock().unwrap().is_empty()
        })
        .await,
        "missing node was never announced"
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(listener.missing.lock().unwrap().as_slice(), &[NodeId(13)]);

    handler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_is_deferred_during_inclusion_ceremony() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        &json!({
            // state 1: inclusion in progress
            "controller": controller_fragment(1),
            "devices": { "99": dimmer_fragment(0) },
            "updateTime": 1000
        }),
    )
    .await;

    let config = config_for(&server).with_auto_discovery(true);
    let handler = NetworkHandler::new(&config).unwrap();
    let listener = Arc::new(RecordingListener::default());
    handler.add_discovery_listener(listener.clone());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        listener.unknown.lock().unwrap().is_empty(),
        "discovery ran during a ceremony"
    );

    handler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_refresh_issues_get_commands() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        &json!({
            "controller": controller_fragment(0),
            "devices": { "12": dimmer_fragment(255) },
            "updateTime": 1000
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/ZWaveAPI/Run/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let handler = NetworkHandler::new(&config_for(&server)).unwrap();
    handler.add_driver(
        dimmer_info(&server.uri(), 12),
        // at the polling interval, so it fires on the second cycle
        Duration::from_millis(25),
        RecordingDriver::new("room/livingroom/dimmer"),
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut found = false;
    while tokio::time::Instant::now() < deadline && !found {
        let requests = server.received_requests().await.unwrap();
        found = requests.iter().any(|r| {
            r.url.path().starts_with("/ZWaveAPI/Run/") && r.url.path().contains(".Get()")
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(found, "no forced-refresh Get() was issued");

    handler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn binary_switch_write_is_patched_on_new_firmware() {
    let server = MockServer::start().await;
    mount_snapshot(
        &server,
        &json!({
            "controller": controller_fragment(0),
            "devices": { "12": dimmer_fragment(255) },
            "updateTime": 1000
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/ZWaveAPI/Run/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let handler = NetworkHandler::new(&config_for(&server)).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || handler.tree().is_some()).await,
        "tree never loaded"
    );

    // firmware v2.0.0 > 1.3.1, class 37: numeric levels become booleans
    assert_ok!(handler.write(NodeId(12), 0, 37, "255").await);
    assert_ok!(handler.write(NodeId(12), 0, 37, "0").await);
    // other classes pass through untouched
    assert_ok!(handler.write(NodeId(12), 0, 38, "99").await);

    let requests = server.received_requests().await.unwrap();
    let runs: Vec<&str> = requests
        .iter()
        .map(|r| r.url.path())
        .filter(|p| p.starts_with("/ZWaveAPI/Run/"))
        .collect();
    assert!(runs.iter().any(|p| p.contains("Set(true)")));
    assert!(runs.iter().any(|p| p.contains("Set(false)")));
    assert!(runs.iter().any(|p| p.contains("Set(99)")));

    handler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn controller_binding_gets_controller_fragment_without_device_entry() {
    let server = MockServer::start().await;
    // the controlling node appears only under `controller`, not in
    // `devices` — some gateways report it that way
    mount_snapshot(
        &server,
        &json!({
            "controller": controller_fragment(0),
            "devices": { "12": dimmer_fragment(255) },
            "updateTime": 1000
        }),
    )
    .await;

    let handler = NetworkHandler::new(&config_for(&server)).unwrap();
    let driver = FragmentDriver::new("gateway/controller");
    handler.add_driver(
        NodeInfo::new(
            NodeIdentity::new(server.uri(), 1u32),
            true,
            HashMap::new(),
        ),
        Duration::ZERO,
        driver.clone(),
    );

    assert!(
        wait_until(Duration::from_secs(2), || {
            !driver.seen_fragments().is_empty()
        })
        .await,
        "controller driver never received an update"
    );
    // no device fragment, no instance, but the controller came through
    assert_eq!(driver.seen_fragments()[0], (false, false, true));

    handler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_failure_keeps_last_known_good_tree() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ZWaveAPI/Data/0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "controller": controller_fragment(0),
            "devices": { "12": dimmer_fragment(255) },
            "updateTime": 1000
        })))
        .mount(&server)
        .await;
    // every later fetch fails
    Mock::given(method("GET"))
        .and(path_regex(r"^/ZWaveAPI/Data/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("gateway error"))
        .mount(&server)
        .await;

    let handler = NetworkHandler::new(&config_for(&server)).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || handler.tree().is_some()).await,
        "tree never loaded"
    );

    // cycles keep failing; the snapshot must survive untouched
    tokio::time::sleep(Duration::from_millis(150)).await;
    let tree = handler.tree().unwrap();
    assert!(tree.contains_node(NodeId(12)));
    assert_eq!(tree.update_time, 1000);

    handler.shutdown().await;
}
