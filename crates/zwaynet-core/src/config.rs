// ── Handler configuration ──
//
// Describes *how* to reach one gateway and how its network is polled.
// The embedding application constructs a `HandlerConfig` and hands it
// in — this crate never reads config files.

use std::time::Duration;

use url::Url;

use zwaynet_api::BasicCredentials;

/// Baseline polling cadence when the configuration gives none.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(5000);

/// Configuration for one gateway's network handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Gateway endpoint (e.g. `http://192.168.1.40:8083`).
    pub endpoint: Url,
    /// Optional HTTP Basic credentials.
    pub credentials: Option<BasicCredentials>,
    /// Global polling interval — one full resync per interval. Must be
    /// greater than zero; per-device forced-refresh intervals are
    /// clamped to at least this value.
    pub polling_interval: Duration,
    /// Detect and announce unconfigured / vanished nodes.
    pub auto_discovery: bool,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl HandlerConfig {
    /// Minimal config for a gateway endpoint; defaults everywhere else.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            credentials: None,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            auto_discovery: false,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_credentials(mut self, credentials: BasicCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_auto_discovery(mut self, enabled: bool) -> Self {
        self.auto_discovery = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// Fails synchronously — an invalid interval must never be patched
    /// up silently.
    pub fn validate(&self) -> Result<(), crate::error::CoreError> {
        if self.polling_interval.is_zero() {
            return Err(crate::error::CoreError::Config {
                message: "polling_interval must be greater than zero".into(),
            });
        }
        if self.endpoint.host_str().is_none() {
            return Err(crate::error::CoreError::Config {
                message: format!("endpoint {} has no host", self.endpoint),
            });
        }
        Ok(())
    }

    /// The endpoint as the string key used by registries and the
    /// handler directory.
    pub fn endpoint_key(&self) -> String {
        let mut key = self.endpoint.to_string();
        if key.ends_with('/') {
            key.pop();
        }
        key
    }
}
