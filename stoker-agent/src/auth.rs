//! Agent-side credential loading and caching.

use std::path::Path;

use chrono::Utc;
use stoker_git::{
    resolve_auth, resolve_credential, resolve_file_auth, AuthError, Credential, FileAuthPaths,
    FileSecretStore, GitCredential,
};
use tokio::sync::Mutex;

use crate::bus::StatusBus;
use crate::error::AgentError;
use crate::metrics::AgentMetrics;

/// Installation tokens are re-minted this many seconds before they expire.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Pick the agent's credential.
///
/// Mounted credential files win. Without any, a `gitAuth` reference on the
/// bus is resolved against the mounted secrets directory when one is
/// configured; otherwise the repository is treated as public.
pub async fn load_credential(
    files: &FileAuthPaths,
    secrets_dir: Option<&Path>,
    namespace: &str,
    bus: &dyn StatusBus,
) -> Result<Credential, AgentError> {
    let credential = resolve_file_auth(files)?;
    if !matches!(credential, Credential::None) {
        return Ok(credential);
    }

    let Some(secrets_dir) = secrets_dir else {
        return Ok(Credential::None);
    };
    let Some(spec) = bus.read_git_auth().await? else {
        return Ok(Credential::None);
    };
    let store = FileSecretStore::new(secrets_dir);
    Ok(resolve_auth(Some(&spec), &store, namespace)?)
}

/// Resolves the credential once and hands out transport credentials.
///
/// Only GitHub App tokens expire; those are re-minted once they are within
/// [`TOKEN_REFRESH_MARGIN_SECS`] of expiry.
pub struct AuthProvider {
    credential: Credential,
    http: reqwest::Client,
    metrics: Option<AgentMetrics>,
    cached: Mutex<Option<stoker_git::ResolvedCredential>>,
}

impl AuthProvider {
    pub fn new(credential: Credential, http: reqwest::Client) -> Self {
        Self {
            credential,
            http,
            metrics: None,
            cached: Mutex::new(None),
        }
    }

    /// Publish minted token expiry on these metrics.
    pub fn with_metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn kind(&self) -> &'static str {
        self.credential.kind()
    }

    pub async fn git_credential(&self) -> Result<GitCredential, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(resolved) = cached.as_ref() {
            let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
            if !resolved.expires_within(Utc::now(), margin) {
                return Ok(resolved.credential.clone());
            }
            tracing::info!(kind = self.kind(), "credential near expiry, refreshing");
        }

        let resolved = resolve_credential(&self.credential, &self.http).await?;
        if let (Some(expires_at), Credential::GitHubApp { app_id, installation_id, .. }) =
            (resolved.expires_at, &self.credential)
        {
            if let Some(metrics) = &self.metrics {
                metrics.set_token_expiry(*app_id, *installation_id, expires_at.timestamp());
            }
        }
        let credential = resolved.credential.clone();
        *cached = Some(resolved);
        Ok(credential)
    }
}
