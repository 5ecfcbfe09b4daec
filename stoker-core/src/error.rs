//! Error types for stoker-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from bus store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, with the path that was being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The profile document did not parse as YAML (or JSON, which is a YAML subset).
    #[error("failed to parse profile at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A status record did not round-trip through JSON.
    #[error("status JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The metadata directory has not been published yet.
    #[error("metadata not found at {path}")]
    MetadataNotFound { path: PathBuf },

    /// No resolved profile has been published for this gateway.
    #[error("profile not found at {path}")]
    ProfileNotFound { path: PathBuf },

    /// Gateway names become file names; separators and dot-names are refused.
    #[error("invalid gateway name '{0}'")]
    InvalidGatewayName(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
