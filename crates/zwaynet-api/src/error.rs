use thiserror::Error;

/// Top-level error type for the `zwaynet-api` crate.
///
/// Covers every failure mode of the gateway transport. `zwaynet-core`
/// maps these into its own taxonomy; callers there never see raw
/// reqwest errors.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway endpoint URL cannot carry the request path, e.g. a
    /// cannot-be-a-base URL like `mailto:`.
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    /// Non-2xx response from the gateway. The body is kept verbatim
    /// since Z-Way error pages are plain text, not JSON.
    #[error("Gateway returned HTTP {status}: {body}")]
    Gateway { status: u16, body: String },

    /// TLS setup or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying on a
    /// later polling cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Gateway { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
