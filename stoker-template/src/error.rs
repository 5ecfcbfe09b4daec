//! Error types for stoker-template.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from template resolution.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template failed to parse or referenced a key the context lacks.
    #[error("resolving template {template:?}: {message}")]
    Resolve { template: String, message: String },

    /// The context could not be converted into an engine context.
    #[error("template context error: {0}")]
    Context(#[from] tera::Error),

    /// Staged file contains a null byte; templating binary content is refused.
    #[error("refusing to template binary file {path}")]
    BinaryContent { path: PathBuf },

    /// Staged file has markers but is not valid UTF-8; rendering would
    /// rewrite the undecodable bytes.
    #[error("refusing to template non-UTF-8 file {path}")]
    NonUtf8 { path: PathBuf },

    /// Filesystem error while reading or rewriting a staged file.
    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TemplateError {
    TemplateError::Io {
        path: path.into(),
        source,
    }
}
