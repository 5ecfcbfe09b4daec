use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the agent runtime and its collaborators.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Shutdown was signalled before the agent finished starting.
    #[error("cancelled")]
    Cancelled,

    #[error("gitURL not found in metadata")]
    MissingGitUrl,

    #[error("initial clone: {0}")]
    InitialClone(#[source] Box<AgentError>),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error(transparent)]
    Auth(#[from] stoker_git::AuthError),

    #[error(transparent)]
    Git(#[from] stoker_git::GitError),

    #[error(transparent)]
    Plan(#[from] stoker_sync::PlanError),

    #[error(transparent)]
    Sync(#[from] stoker_sync::SyncError),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("{0} task join failure: {1}")]
    Join(&'static str, String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AgentError {
    AgentError::Io {
        path: path.into(),
        source,
    }
}

/// Metadata / status bus failures.
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Store(#[from] stoker_core::StoreError),

    #[error("bus task join failure: {0}")]
    Join(String),
}

/// Gateway control API failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}")]
    Status { endpoint: String, status: u16 },
}

/// Metric registration and encoding failures.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}
