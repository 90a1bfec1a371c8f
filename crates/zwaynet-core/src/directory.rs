// ── Handler directory ──
//
// One network handler per gateway endpoint, created lazily on first
// request. Gateways are independent: no shared state, no cross-gateway
// ordering, a failing gateway only affects its own handler.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::HandlerConfig;
use crate::error::CoreError;
use crate::handler::NetworkHandler;

/// Table of live handlers, keyed by normalized endpoint URL.
#[derive(Default)]
pub struct HandlerDirectory {
    handlers: DashMap<String, Arc<NetworkHandler>>,
}

impl HandlerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handler for the configured endpoint, creating and starting
    /// it on first request. An existing handler is returned as-is; its
    /// settings are not reconciled against the supplied config.
    pub fn handler_for(&self, config: &HandlerConfig) -> Result<Arc<NetworkHandler>, CoreError> {
        let key = config.endpoint_key();
        if let Some(existing) = self.handlers.get(&key) {
            return Ok(Arc::clone(&existing));
        }

        // entry() holds the shard lock across creation so two racing
        // callers cannot spawn two handlers for one gateway
        match self.handlers.entry(key) {
            dashmap::Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            dashmap::Entry::Vacant(entry) => {
                let handler = NetworkHandler::new(config)?;
                debug!(endpoint = entry.key(), "handler created");
                entry.insert(Arc::clone(&handler));
                Ok(handler)
            }
        }
    }

    /// Look up a running handler without creating one.
    pub fn handler(&self, endpoint: &str) -> Option<Arc<NetworkHandler>> {
        self.handlers
            .get(endpoint.trim_end_matches('/'))
            .map(|h| Arc::clone(&h))
    }

    /// Stop and drop the handler for an endpoint.
    pub async fn remove(&self, endpoint: &str) {
        if let Some((key, handler)) = self.handlers.remove(endpoint.trim_end_matches('/')) {
            handler.shutdown().await;
            info!(endpoint = key, "handler removed");
        }
    }

    /// Fan a new polling interval out to every live handler.
    pub fn set_polling_interval(&self, interval: Duration) -> Result<(), CoreError> {
        for entry in &self.handlers {
            entry.value().set_polling_interval(interval)?;
        }
        Ok(())
    }

    /// Stop every handler. The directory is empty afterwards.
    pub async fn shutdown_all(&self) {
        let handlers: Vec<Arc<NetworkHandler>> = self
            .handlers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.handlers.clear();
        for handler in handlers {
            handler.shutdown().await;
        }
        info!("all handlers stopped");
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use url::Url;

    // an unreachable endpoint is fine here: construction never blocks
    // on the gateway, and failed cycles only warn
    fn config(endpoint: &str) -> HandlerConfig {
        HandlerConfig::new(Url::parse(endpoint).unwrap())
            .with_polling_interval(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn same_endpoint_reuses_the_handler() {
        let directory = HandlerDirectory::new();

        let first = directory.handler_for(&config("http://127.0.0.1:1")).unwrap();
        let second = directory.handler_for(&config("http://127.0.0.1:1")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(directory.len(), 1);

        directory.shutdown_all().await;
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn distinct_endpoints_get_distinct_handlers() {
        let directory = HandlerDirectory::new();

        directory.handler_for(&config("http://127.0.0.1:1")).unwrap();
        directory.handler_for(&config("http://127.0.0.1:2")).unwrap();
        assert_eq!(directory.len(), 2);

        assert!(directory.handler("http://127.0.0.1:1").is_some());
        directory.remove("http://127.0.0.1:1").await;
        assert!(directory.handler("http://127.0.0.1:1").is_none());
        assert_eq!(directory.len(), 1);

        directory.shutdown_all().await;
    }

    #[tokio::test]
    async fn invalid_config_never_creates_a_handler() {
        let directory = HandlerDirectory::new();

        let bad = config("http://127.0.0.1:1").with_polling_interval(Duration::ZERO);
        assert!(directory.handler_for(&bad).is_err());
        assert!(directory.is_empty());
    }
}
