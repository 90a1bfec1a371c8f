// ── Model tree ──
//
// Typed view over the gateway's data snapshot. The gateway JSON is
// inconsistent across firmware lines, so every field defaults and the
// named data children stay as raw values, converted on access.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::NodeId;

/// Full snapshot of one Z-Wave network, as reported by the gateway.
///
/// `update_time` is the gateway's own watermark for this snapshot; the
/// connection manager feeds it back as the `since` parameter of the
/// next fetch. All staleness decisions compare gateway-assigned
/// `updateTime` fields, never local arrival time — the gateway replays
/// stale cached values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelTree {
    #[serde(default)]
    pub controller: Option<Controller>,
    #[serde(default)]
    pub devices: HashMap<NodeId, Device>,
    #[serde(default, rename = "updateTime")]
    pub update_time: u64,
}

impl ModelTree {
    pub fn device(&self, node_id: NodeId) -> Option<&Device> {
        self.devices.get(&node_id)
    }

    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.devices.contains_key(&node_id)
    }
}

/// One physical device and its sub-endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub instances: HashMap<u32, Instance>,
}

impl Device {
    pub fn instance(&self, instance_id: u32) -> Option<&Instance> {
        self.instances.get(&instance_id)
    }
}

/// A sub-endpoint of a multi-channel node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, rename = "commandClasses")]
    pub command_classes: HashMap<u32, CommandClass>,
}

impl Instance {
    pub fn command_class(&self, class_id: u32) -> Option<&CommandClass> {
        self.command_classes.get(&class_id)
    }
}

/// A typed capability block (switch level, sensor reading, …).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandClass {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: ClassData,
}

/// The `data` node of a command class: a few fixed fields plus named
/// children, each carrying its own `value` / `updateTime` pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassData {
    #[serde(default, alias = "val")]
    pub value: Option<Value>,
    #[serde(default, rename = "updateTime")]
    pub update_time: u64,
    #[serde(default, rename = "invalidateTime")]
    pub invalidate_time: Option<u64>,
    /// Named data children, kept raw; converted on access via
    /// [`elem`](Self::elem).
    #[serde(flatten)]
    pub elems: HashMap<String, Value>,
}

impl ClassData {
    /// Look up a named data child.
    ///
    /// Falls back to searching numeric-keyed containers: gateways
    /// running firmware 1.7.2 and newer nest sensor values one level
    /// deeper, under the sensor-type index.
    pub fn elem(&self, name: &str) -> Option<DataElem> {
        if let Some(raw) = self.elems.get(name) {
            if let Some(elem) = DataElem::from_raw(raw) {
                return Some(elem);
            }
        }

        for (key, container) in &self.elems {
            if key.parse::<u64>().is_ok() {
                if let Some(nested) = container.get(name) {
                    if let Some(elem) = DataElem::from_raw(nested) {
                        return Some(elem);
                    }
                }
            }
        }

        None
    }

    /// The `value` of a named data child, when present.
    pub fn elem_value(&self, name: &str) -> Option<Value> {
        self.elem(name).and_then(|e| e.value)
    }
}

/// One named data field: a value plus the gateway-assigned update time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataElem {
    #[serde(default, alias = "val")]
    pub value: Option<Value>,
    #[serde(default, rename = "updateTime")]
    pub update_time: u64,
}

impl DataElem {
    fn from_raw(raw: &Value) -> Option<Self> {
        raw.as_object()?;
        serde_json::from_value(raw.clone()).ok()
    }
}

/// The controlling node, present only when the gateway was queried for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Controller {
    #[serde(default)]
    pub data: ControllerData,
}

/// The controller's data node. Exposes the counters that mark completed
/// inclusion / exclusion ceremonies and the reported firmware version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerData {
    #[serde(flatten)]
    pub elems: HashMap<String, Value>,
}

impl ControllerData {
    fn counter(&self, name: &str) -> i64 {
        self.elems
            .get(name)
            .and_then(|e| e.get("value"))
            .and_then(Value::as_i64)
            .unwrap_or(-1)
    }

    /// Node id of the most recently included device, `-1` when unknown.
    pub fn last_included_device(&self) -> i64 {
        self.counter("lastIncludedDevice")
    }

    /// Node id of the most recently excluded device, `-1` when unknown.
    pub fn last_excluded_device(&self) -> i64 {
        self.counter("lastExcludedDevice")
    }

    /// Controller state: 0 = idle, 1 = including, 5 = excluding.
    /// Absent data reads as idle so discovery still runs on gateways
    /// that do not report it.
    pub fn controller_state(&self) -> i64 {
        self.elems
            .get("controllerState")
            .and_then(|e| e.get("value"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn is_idle(&self) -> bool {
        self.controller_state() == 0
    }

    /// The gateway's reported firmware revision, e.g. `"v2.0.1-rc2"`.
    pub fn software_revision_version(&self) -> Option<&str> {
        self.elems
            .get("softwareRevisionVersion")
            .and_then(|e| e.get("value"))
            .and_then(Value::as_str)
    }
}
