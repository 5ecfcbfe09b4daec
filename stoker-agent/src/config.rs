//! Agent configuration.
//!
//! Built by the binary from flags and environment; the agent itself never
//! reads the environment.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stoker_git::FileAuthPaths;

use crate::error::{io_err, AgentError};

/// Reported in every status record.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8082";
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(30);
pub const METADATA_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gateway_name: String,
    pub pod_name: String,
    pub namespace: String,
    /// Name of the custom resource that owns this gateway.
    pub cr_name: String,
    /// Pod labels exposed to templates as `labels`.
    pub labels: BTreeMap<String, String>,

    /// Mounted bus directory (`metadata/` and `status/` below it).
    pub bus_dir: PathBuf,
    /// Local checkout of the configuration repository.
    pub repo_path: PathBuf,
    /// The gateway's live data directory.
    pub live_dir: PathBuf,

    /// Periodic resync interval, on top of metadata change events.
    pub sync_period: Duration,
    pub metadata_poll: Duration,
    pub debounce: Duration,

    pub health_addr: SocketAddr,

    /// Base URL of the gateway, e.g. `http://localhost:8088`.
    pub gateway_url: String,
    pub gateway_api_token_file: Option<PathBuf>,

    /// Mounted credential files; take priority over the bus auth reference.
    pub auth: FileAuthPaths,
    /// Root of mounted secrets (`<root>/<namespace>/<name>/<key>`), used to
    /// resolve a `gitAuth` reference published on the bus.
    pub secrets_dir: Option<PathBuf>,

    pub log_format: LogFormat,
}

impl AgentConfig {
    /// Defaults for everything but the identity and paths.
    pub fn new(
        gateway_name: impl Into<String>,
        bus_dir: impl Into<PathBuf>,
        repo_path: impl Into<PathBuf>,
        live_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway_name: gateway_name.into(),
            pod_name: String::new(),
            namespace: String::new(),
            cr_name: String::new(),
            labels: BTreeMap::new(),
            bus_dir: bus_dir.into(),
            repo_path: repo_path.into(),
            live_dir: live_dir.into(),
            sync_period: DEFAULT_SYNC_PERIOD,
            metadata_poll: METADATA_POLL_INTERVAL,
            debounce: DEBOUNCE_WINDOW,
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            gateway_url: "http://localhost:8088".to_string(),
            gateway_api_token_file: None,
            auth: FileAuthPaths::default(),
            secrets_dir: None,
            log_format: LogFormat::Text,
        }
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.gateway_name.trim().is_empty() {
            return Err(AgentError::Config("gateway name is required".to_string()));
        }
        if self.gateway_name.starts_with('.')
            || self.gateway_name.contains('/')
            || self.gateway_name.contains('\\')
        {
            return Err(AgentError::Config(format!(
                "gateway name '{}' cannot be used as a file name",
                self.gateway_name
            )));
        }
        if self.sync_period.is_zero() {
            return Err(AgentError::Config("sync period must be positive".to_string()));
        }
        if self.repo_path == self.live_dir {
            return Err(AgentError::Config(
                "repository path and live directory must differ".to_string(),
            ));
        }
        if self.live_dir.starts_with(&self.repo_path) || self.repo_path.starts_with(&self.live_dir)
        {
            return Err(AgentError::Config(
                "repository path and live directory must not nest".to_string(),
            ));
        }
        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            return Err(AgentError::Config(format!(
                "gateway URL '{}' must be http or https",
                self.gateway_url
            )));
        }
        Ok(())
    }
}

/// Parse a downward-API labels file (`key="value"` per line).
pub fn parse_pod_labels(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.replace("\\\"", "\"")))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

pub fn load_pod_labels(path: &Path) -> Result<BTreeMap<String, String>, AgentError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(parse_pod_labels(&contents))
}
