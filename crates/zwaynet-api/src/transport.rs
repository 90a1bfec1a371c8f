// Shared transport configuration for building reqwest::Client instances.
//
// The gateway optionally requires HTTP Basic credentials; the
// Authorization header is computed once here and installed as a default
// header, so every request carries it without per-call work.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

/// HTTP Basic credentials for a gateway that has authentication enabled.
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub credentials: Option<BasicCredentials>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            credentials: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// With credentials present, the Basic-Authorization header is
    /// precomputed and injected into every request via default headers.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent("zwaynet/0.1.0");

        if let Some(ref creds) = self.credentials {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, basic_header(creds)?);
            builder = builder.default_headers(headers);
        }

        builder
            .build()
            .map_err(|e| crate::error::Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Attach credentials to this config.
    pub fn with_credentials(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.credentials = Some(BasicCredentials {
            username: username.into(),
            password,
        });
        self
    }
}

/// Compute the `Basic <base64(user:pass)>` header value.
fn basic_header(creds: &BasicCredentials) -> Result<HeaderValue, crate::error::Error> {
    let token = STANDARD.encode(format!(
        "{}:{}",
        creds.username,
        creds.password.expose_secret()
    ));
    let mut value = HeaderValue::from_str(&format!("Basic {token}"))
        .map_err(|e| crate::error::Error::Tls(format!("invalid credential bytes: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn basic_header_encodes_user_and_password() {
        let creds = BasicCredentials {
            username: "admin".into(),
            password: SecretString::from("zway".to_string()),
        };
        let value = basic_header(&creds).unwrap();
        // base64("admin:zway")
        assert_eq!(value.to_str().unwrap(), "Basic YWRtaW46endheQ==");
    }

    #[test]
    fn default_config_has_no_credentials() {
        let config = TransportConfig::default();
        assert!(config.credentials.is_none());
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
