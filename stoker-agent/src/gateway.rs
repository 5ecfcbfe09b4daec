//! Gateway control API: project/config rescans and a liveness ping.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::GatewayError;

const API_TOKEN_HEADER: &str = "X-Ignition-API-Token";
const SCAN_PROJECTS_PATH: &str = "/data/api/v1/scan/projects";
const SCAN_CONFIG_PATH: &str = "/data/api/v1/scan/config";
const STATUS_PING_PATH: &str = "/StatusPing";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one rescan request pair. Never an `Err`: scan problems are
/// reported, not propagated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Per-endpoint outcome, e.g. `projects=200 config=200`.
    pub summary: String,
    pub error: Option<String>,
}

impl ScanResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.summary, &self.error) {
            (summary, None) => write!(f, "{summary}"),
            (summary, Some(err)) if summary.is_empty() => write!(f, "error: {err}"),
            (summary, Some(err)) => write!(f, "{summary} error: {err}"),
        }
    }
}

#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Ask the gateway to rescan projects, then config.
    async fn trigger_scan(&self) -> ScanResult;
    async fn health_check(&self) -> Result<(), GatewayError>;
}

/// HTTP [`GatewayApi`] client.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<SecretString>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(http, base_url, api_token))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_token: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }

    async fn post_scan(&self, path: &str) -> Result<u16, GatewayError> {
        let mut request = self.http.post(format!("{}{path}", self.base_url));
        if let Some(token) = &self.api_token {
            request = request.header(API_TOKEN_HEADER, token.expose_secret());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(status.as_u16())
    }
}

#[async_trait]
impl GatewayApi for GatewayClient {
    async fn trigger_scan(&self) -> ScanResult {
        let mut parts = Vec::new();
        let mut errors = Vec::new();

        for (label, path) in [("projects", SCAN_PROJECTS_PATH), ("config", SCAN_CONFIG_PATH)] {
            match self.post_scan(path).await {
                Ok(status) => parts.push(format!("{label}={status}")),
                Err(err) => {
                    tracing::debug!(endpoint = path, error = %err, "scan request failed");
                    parts.push(format!("{label}=failed"));
                    errors.push(format!("{label}: {err}"));
                }
            }
        }

        ScanResult {
            summary: parts.join(" "),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        let response = self
            .http
            .get(format!("{}{STATUS_PING_PATH}", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                endpoint: STATUS_PING_PATH.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_result_display() {
        let ok = ScanResult {
            summary: "projects=200 config=200".to_string(),
            error: None,
        };
        assert_eq!(ok.to_string(), "projects=200 config=200");

        let failed = ScanResult {
            summary: "projects=200 config=failed".to_string(),
            error: Some("config: /data/api/v1/scan/config returned 500".to_string()),
        };
        assert!(failed.to_string().contains("error"));
        assert!(!failed.is_ok());
    }

    #[test]
    fn trailing_slash_trimmed() {
        let client = GatewayClient::with_client(reqwest::Client::new(), "http://gw:8088/", None);
        assert_eq!(client.base_url, "http://gw:8088");
    }
}
