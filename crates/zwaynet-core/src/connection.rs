// ── Connection manager ──
//
// One instance per gateway, owned by its network handler — the
// process-wide singleton of older integrations is deliberately gone.
// Owns the cached raw tree (for path merging), the typed snapshot
// handed to consumers, and the `last_update` watermark.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use zwaynet_api::GatewayClient;

use crate::error::CoreError;
use crate::merge;
use crate::model::{ModelTree, NodeId};

/// Cached model tree plus fetch/merge logic for one gateway.
///
/// Not internally synchronized: the handler keeps it behind a mutex and
/// only the polling cycle (and the one-shot initial read) mutate it.
pub struct ConnectionManager {
    client: GatewayClient,
    /// Raw JSON mirror of the tree; partial updates merge into this.
    raw: Option<Value>,
    /// Typed snapshot rebuilt after every successful merge.
    tree: Option<Arc<ModelTree>>,
    /// Gateway-assigned watermark of the last applied update. Advances
    /// only from the tree's own `updateTime`, never from wall clock, so
    /// a failed fetch cannot skip server-side history.
    last_update: u64,
}

impl ConnectionManager {
    pub fn new(client: GatewayClient) -> Self {
        Self {
            client,
            raw: None,
            tree: None,
            last_update: 0,
        }
    }

    /// The transport client, for command execution.
    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    /// Last-known-good typed tree, if any fetch has succeeded yet.
    pub fn tree(&self) -> Option<Arc<ModelTree>> {
        self.tree.clone()
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Fetch since the memoized watermark, merge, and advance the
    /// watermark from the merged tree's own update time.
    pub async fn update_devices(&mut self) -> Result<Arc<ModelTree>, CoreError> {
        let tree = self.update_devices_since(self.last_update).await?;
        self.last_update = self.last_update.max(tree.update_time);
        Ok(tree)
    }

    /// Fetch since an explicit timestamp. `0`, or any value past the
    /// gateway's knowledge, yields a full snapshot which replaces the
    /// cache outright; otherwise the partial document merges into it.
    ///
    /// On any failure the cached tree and watermark are left untouched
    /// (last-known-good).
    pub async fn update_devices_since(&mut self, since: u64) -> Result<Arc<ModelTree>, CoreError> {
        let body = self.client.fetch(since).await?;

        let tree = if self.raw.is_none() || since == 0 {
            let raw: Value = serde_json::from_str(&body)?;
            let tree: ModelTree = serde_json::from_value(raw.clone())?;
            debug!(
                devices = tree.devices.len(),
                update_time = tree.update_time,
                "full snapshot parsed"
            );
            self.raw = Some(raw);
            Arc::new(tree)
        } else {
            // merge into a scratch copy so a failing re-type cannot
            // corrupt the cache
            let mut raw = self
                .raw
                .clone()
                .ok_or(CoreError::TreeUnavailable)?;
            let report = merge::apply_partial(&mut raw, &body)?;
            let tree: ModelTree = serde_json::from_value(raw.clone())?;
            debug!(
                applied = report.applied,
                skipped = report.skipped,
                update_time = tree.update_time,
                "partial update merged"
            );
            self.raw = Some(raw);
            Arc::new(tree)
        };

        self.tree = Some(Arc::clone(&tree));
        Ok(tree)
    }

    /// Execute a command expression on the gateway. Fire-and-forget:
    /// no retry, no acknowledgment beyond the HTTP response.
    pub async fn send_command(&self, command: &str) -> Result<String, CoreError> {
        Ok(self.client.execute(command).await?)
    }

    /// Probe a node with a no-operation frame.
    pub async fn ping(&self, node_id: NodeId) -> Result<String, CoreError> {
        Ok(self.client.ping(node_id.0).await?)
    }
}
