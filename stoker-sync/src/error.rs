//! Error types for stoker-sync.

use std::path::PathBuf;

use thiserror::Error;

use stoker_core::MappingType;
use stoker_template::TemplateError;

/// Plan compilation failures. None of these touch the filesystem.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A mapping path referenced a missing key or failed to parse.
    #[error("mapping[{index}].{field}: {source}")]
    Template {
        index: usize,
        field: &'static str,
        #[source]
        source: TemplateError,
    },

    /// A resolved mapping path is absolute or escapes its root.
    #[error("mapping[{index}].{field}: {reason}: {path:?}")]
    UnsafePath {
        index: usize,
        field: &'static str,
        path: String,
        reason: &'static str,
    },

    /// A `required` mapping's source does not exist in the checkout.
    #[error("mapping[{index}]: required source {path} does not exist")]
    RequiredSourceMissing { index: usize, path: PathBuf },
}

/// Failures while staging, templating or promoting a plan.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed.
    #[error("walking {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// An exclude pattern is not a valid glob.
    #[error("invalid exclude pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The mapping source exists but is not of the declared type.
    #[error("mapping[{index}]: source {path} is not a {expected}")]
    SourceType {
        index: usize,
        path: PathBuf,
        expected: MappingType,
    },

    /// Per-file templating failed for a staged file.
    #[error("templating {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
