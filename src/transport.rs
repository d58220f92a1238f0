//! HTTP transport for SOAP service calls.
//!
//! One [`SoapClient`] should be shared across all consumers so reqwest's
//! connection pool is reused. Timeouts are bounded: a hung authority call
//! surfaces as [`AfipError::Transport`] instead of stalling the caller.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::error::{AfipError, Result};

/// HTTP transport configuration.
///
/// TOML-deserializable, with defaults matching a conservative production
/// setup:
///
/// ```toml
/// [http]
/// timeout_secs = 30
/// connect_timeout_secs = 10
/// pool_max_idle_per_host = 10
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Total request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum idle connections per host.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_pool_max_idle() -> usize {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

/// Shared HTTP client for SOAP POSTs to AFIP endpoints.
#[derive(Debug, Clone)]
pub struct SoapClient {
    client: Client,
}

impl SoapClient {
    /// Creates a client with default [`HttpConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::Transport`] if the underlying client cannot be
    /// constructed.
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpConfig::default())
    }

    /// Creates a client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::Transport`] if the underlying client cannot be
    /// constructed.
    pub fn with_config(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AfipError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// POSTs a SOAP envelope and returns the raw response body.
    ///
    /// SOAP faults arrive with non-success HTTP statuses but carry an XML
    /// body the caller must inspect (the WSAA duplicate-login fault is one),
    /// so a body that looks like a fault is returned as `Ok` and left to the
    /// caller's fault mapping. Any other non-success status is a transport
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::Transport`] on network errors, timeouts, or
    /// non-success statuses without a fault body.
    #[instrument(skip(self, envelope), fields(body_len = envelope.len()))]
    pub async fn post(&self, endpoint: &str, action: &str, envelope: &str) -> Result<String> {
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(envelope.to_owned())
            .send()
            .await
            .map_err(|e| AfipError::Transport(format!("request to {endpoint} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AfipError::Transport(format!("failed reading response from {endpoint}: {e}")))?;

        if !status.is_success() && !body.contains(":Fault") && !body.contains("<Fault") {
            let preview: String = body.chars().take(200).collect();
            return Err(AfipError::Transport(format!(
                "{endpoint} returned status {status}: {preview}"
            )));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.pool_max_idle_per_host, 10);
    }

    #[test]
    fn test_http_config_from_toml_partial() {
        let config: HttpConfig = toml::from_str("timeout_secs = 5").unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_client_builds_with_defaults() {
        assert!(SoapClient::new().is_ok());
    }
}
