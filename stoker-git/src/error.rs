//! Error types for stoker-git.

use std::path::PathBuf;

use thiserror::Error;

/// Credential lookup and resolution failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The referenced secret or key does not exist.
    #[error("key {key:?} not found in secret {namespace}/{secret_name}")]
    SecretNotFound {
        namespace: String,
        secret_name: String,
        key: String,
    },

    /// Reading a mounted secret or credential file failed.
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SSH private key material is not a recognisable private key.
    #[error("parsing SSH private key: {0}")]
    InvalidSshKey(String),

    /// No PEM block could be found in the GitHub App key.
    #[error("parsing PEM key: {0}")]
    InvalidPem(String),

    /// PEM block label is neither `RSA PRIVATE KEY` nor `PRIVATE KEY`.
    #[error("unsupported PEM block type: {0}")]
    UnsupportedKeyType(String),

    /// Signing the app JWT failed (includes non-RSA PKCS#8 keys).
    #[error("signing JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Transport failure talking to the GitHub API.
    #[error("exchanging token: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub answered with something other than 201 Created.
    #[error("GitHub API returned {status}: {body}")]
    ExchangeRejected { status: u16, body: String },

    /// 201 Created, but the body did not carry a usable token.
    #[error("parsing token response: {0}")]
    InvalidResponse(String),
}

pub(crate) fn auth_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AuthError {
    AuthError::Io {
        path: path.into(),
        source,
    }
}

/// Clone / fetch failures.
#[derive(Debug, Error)]
pub enum GitError {
    /// Filesystem error preparing the checkout or the SSH key file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `git` binary could not be started.
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    /// `git` exited non-zero.
    #[error("`git {command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
}

pub(crate) fn git_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> GitError {
    GitError::Io {
        path: path.into(),
        source,
    }
}
