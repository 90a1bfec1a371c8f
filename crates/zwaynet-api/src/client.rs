// Z-Way gateway HTTP client
//
// Wraps `reqwest::Client` with the gateway's URL conventions. The
// protocol is GET-only: newer Z-Way firmwares dropped POST support, so
// both the data query and command execution ride on path segments.

use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Path of the data endpoint, suffixed with the `since` timestamp.
pub const DATA_PATH: &str = "ZWaveAPI/Data";

/// Path of the run endpoint, suffixed with a command expression.
pub const RUN_PATH: &str = "ZWaveAPI/Run";

/// Raw HTTP client for one Z-Way gateway endpoint.
///
/// Every call is one-shot: a single GET, no retry, no caching. The
/// response body is returned verbatim as a JSON string; the model
/// layer decides how to parse it.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl GatewayClient {
    /// Create a new client for the given gateway endpoint
    /// (e.g. `http://192.168.1.40:8083`).
    pub fn new(endpoint: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, endpoint })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    /// The gateway endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetch the network state as JSON, full or partial.
    ///
    /// `since` is the gateway-assigned timestamp of the last known
    /// update; `0` requests a full snapshot. The gateway itself decides
    /// how much of the tree to return based on its staleness tracking.
    pub async fn fetch(&self, since: u64) -> Result<String, Error> {
        let url = self.path_url(DATA_PATH, &since.to_string())?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        Self::read_body(resp).await
    }

    /// Execute a command expression on the run endpoint, e.g.
    /// `devices[12].instances[0].commandClasses[38].Set(255)`.
    ///
    /// The raw JSON response is returned; commands are fire-and-forget
    /// beyond the HTTP status, so most callers ignore the body.
    pub async fn execute(&self, command: &str) -> Result<String, Error> {
        let url = self.path_url(RUN_PATH, command)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        Self::read_body(resp).await
    }

    /// Ping a node with a no-operation frame, to probe reachability.
    pub async fn ping(&self, node_id: u32) -> Result<String, Error> {
        self.execute(&format!("devices[{node_id}].SendNoOperation()"))
            .await
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Build `<endpoint>/<path>/<suffix>`. The suffix is a single path
    /// segment, so bracket characters in command expressions survive
    /// URL encoding intact on the gateway side.
    fn path_url(&self, path: &str, suffix: &str) -> Result<Url, Error> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| Error::InvalidUrl("gateway endpoint cannot be a base URL".into()))?;
            segments.pop_if_empty();
            segments.extend(path.split('/'));
            segments.push(suffix);
        }
        Ok(url)
    }

    /// Surface non-2xx responses as typed gateway errors.
    async fn read_body(resp: reqwest::Response) -> Result<String, Error> {
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(Error::Gateway {
                status: status.as_u16(),
                body,
            })
        }
    }
}
