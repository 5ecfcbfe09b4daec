//! # stoker-git
//!
//! Git credentials and transport for the sync agent.
//!
//! - [`credential`]: declared [`Credential`] variants and the transport-ready
//!   [`GitCredential`] they all resolve to
//! - [`resolver`]: declared auth → credential → git credential, one function per variant
//! - [`github_app`]: RS256 app JWT and installation-token exchange
//! - [`secrets`]: namespaced secret lookup ([`SecretStore`], [`FileSecretStore`])
//! - [`client`]: the [`GitClient`] contract and the `git` CLI implementation

pub mod client;
pub mod credential;
pub mod error;
pub mod github_app;
pub mod resolver;
pub mod secrets;

pub use client::{FetchResult, GitCli, GitClient};
pub use credential::{Credential, GitCredential, ResolvedCredential};
pub use error::{AuthError, GitError};
pub use github_app::{exchange_installation_token, GitHubAppToken, DEFAULT_GITHUB_API_URL};
pub use resolver::{resolve_auth, resolve_credential, resolve_file_auth, FileAuthPaths, GitHubAppFiles};
pub use secrets::{FileSecretStore, SecretStore};
