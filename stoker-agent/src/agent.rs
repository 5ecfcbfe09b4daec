//! Sync orchestration.
//!
//! ## Lifecycle
//!
//! 1. Poll the bus until metadata carries a commit.
//! 2. Publish `Pending`, load the credential, clone. Clone failure is fatal.
//! 3. One blocking initial sync. Its errors are logged, never fatal; the
//!    agent reports ready afterwards either way.
//! 4. Loop on triggers until shutdown. Each trigger re-reads metadata and
//!    runs a cycle only when the commit moved and the gateway is not paused.
//!
//! Every cycle that reaches the sync step writes a status record, success or
//! failure, including one cut short by shutdown. `last_synced_commit` only
//! advances after the engine completed.

use std::sync::Arc;
use std::time::Instant;

use stoker_core::status::now_rfc3339;
use stoker_core::{format_duration, store, GatewayStatus, Metadata, Profile, SyncStatus};
use stoker_git::{FetchResult, GitClient};
use stoker_sync::{compile_plan, execute, SyncResult};
use stoker_template::{TemplateContext, TemplateResolver};
use tokio::sync::{broadcast, mpsc};

use crate::auth::{load_credential, AuthProvider};
use crate::bus::StatusBus;
use crate::config::{AgentConfig, AGENT_VERSION};
use crate::error::AgentError;
use crate::gateway::GatewayApi;
use crate::health::Readiness;
use crate::metrics::AgentMetrics;
use crate::watcher::{trigger_channel, Trigger, TriggerWatcher};

const CYCLE_CANCELLED: &str = "sync cancelled: agent shutting down";

/// Collaborators the orchestrator drives.
pub struct AgentDeps {
    pub bus: Arc<dyn StatusBus>,
    pub git: Arc<dyn GitClient>,
    pub gateway: Arc<dyn GatewayApi>,
    pub resolver: Arc<dyn TemplateResolver>,
    pub metrics: AgentMetrics,
    pub readiness: Readiness,
    /// Client for GitHub App token exchange.
    pub http: reqwest::Client,
}

/// Orchestrator state carried from one cycle to the next. Owned by the main
/// loop only.
pub struct CycleState {
    pub git_url: String,
    /// Commit of the last cycle whose engine run completed.
    pub last_synced_commit: String,
    pub initial_sync_done: bool,
    auth: AuthProvider,
    /// Commit and ref of a cycle that has published `Syncing` but not yet
    /// its final status.
    in_flight: Option<(String, String)>,
}

/// What a trigger led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    MetadataUnavailable,
    Paused,
    Unchanged,
    FetchFailed,
    SyncFailed,
    Synced,
}

pub struct Agent {
    config: AgentConfig,
    deps: AgentDeps,
}

impl Agent {
    pub fn new(config: AgentConfig, deps: AgentDeps) -> Self {
        Self { config, deps }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Start, then serve triggers from the metadata watcher until shutdown.
    pub async fn run(&self, shutdown_tx: &broadcast::Sender<()>) -> Result<(), AgentError> {
        let mut shutdown_rx = shutdown_tx.subscribe();
        let watcher_shutdown = shutdown_tx.subscribe();

        tracing::info!(
            gateway = %self.config.gateway_name,
            cr = %self.config.cr_name,
            namespace = %self.config.namespace,
            repo_path = %self.config.repo_path.display(),
            live_dir = %self.config.live_dir.display(),
            sync_period_secs = self.config.sync_period.as_secs(),
            "starting agent",
        );

        let mut state = self.start(&mut shutdown_rx).await?;

        let (trigger_tx, trigger_rx) = trigger_channel();
        let watcher = TriggerWatcher::new(
            store::metadata_dir_at(&self.config.bus_dir),
            self.config.sync_period,
            self.config.debounce,
        );
        let watcher_handle = tokio::spawn(watcher.run(trigger_tx, watcher_shutdown));

        let result = self.run_loop(&mut state, trigger_rx, shutdown_rx).await;

        match watcher_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "trigger watcher failed"),
            Err(err) => tracing::warn!(error = %err, "trigger watcher join failure"),
        }
        result
    }

    /// Steps 1 to 3 of the lifecycle. Returns the state the loop continues
    /// from, with readiness already set.
    pub async fn start(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<CycleState, AgentError> {
        let meta = self.wait_for_metadata(shutdown_rx).await?;
        tracing::info!(
            git_url = %meta.git_url,
            commit = %meta.commit,
            git_ref = %meta.git_ref,
            "metadata loaded",
        );
        if meta.git_url.is_empty() {
            return Err(AgentError::MissingGitUrl);
        }

        self.write_status(&GatewayStatus::pending(&meta.git_ref, AGENT_VERSION))
            .await;

        let (commit, git_ref) = (meta.commit.clone(), meta.git_ref.clone());
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                self.report_error(&commit, &git_ref, CYCLE_CANCELLED.to_string())
                    .await;
                Err(AgentError::Cancelled)
            }
            state = self.initial_sync(meta) => state,
        }
    }

    async fn initial_sync(&self, meta: Metadata) -> Result<CycleState, AgentError> {
        let credential = match load_credential(
            &self.config.auth,
            self.config.secrets_dir.as_deref(),
            &self.config.namespace,
            self.deps.bus.as_ref(),
        )
        .await
        {
            Ok(credential) => credential,
            Err(err) => {
                self.report_error(&meta.commit, &meta.git_ref, format!("git auth: {err}"))
                    .await;
                return Err(err);
            }
        };
        let auth = AuthProvider::new(credential, self.deps.http.clone())
            .with_metrics(self.deps.metrics.clone());
        tracing::info!(auth = auth.kind(), url = %meta.git_url, git_ref = %meta.git_ref, "cloning repository");

        let fetched = match self.fetch(&auth, &meta.git_url, &meta.git_ref).await {
            Ok(fetched) => fetched,
            Err(err) => {
                self.report_error(&meta.commit, &meta.git_ref, format!("git fetch: {err}"))
                    .await;
                return Err(AgentError::InitialClone(Box::new(err)));
            }
        };
        tracing::info!(commit = %fetched.commit, "clone complete");

        let mut state = CycleState {
            git_url: meta.git_url,
            last_synced_commit: String::new(),
            initial_sync_done: false,
            auth,
            in_flight: None,
        };

        tracing::info!("performing initial sync");
        if let Err(err) = self.sync_once(&mut state, &fetched).await {
            tracing::error!(error = %err, "initial sync had errors (continuing)");
        }
        state.initial_sync_done = true;
        self.deps.readiness.mark_ready();
        tracing::info!("initial sync complete, agent ready");
        Ok(state)
    }

    /// Poll until metadata carries a commit. Read failures are expected while
    /// the controller has not published yet and are only logged at debug.
    pub async fn wait_for_metadata(
        &self,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<Metadata, AgentError> {
        loop {
            match self.deps.bus.read_metadata().await {
                Ok(meta) if meta.is_available() => return Ok(meta),
                Ok(_) => tracing::debug!("metadata has no commit yet, retrying"),
                Err(err) => tracing::debug!(error = %err, "metadata not available yet, retrying"),
            }
            tokio::select! {
                _ = shutdown_rx.recv() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(self.config.metadata_poll) => {}
            }
        }
    }

    /// Serve triggers until shutdown or until the trigger source closes.
    /// Shutdown abandons an in-flight cycle; if it had already published
    /// `Syncing`, a final `Error` status replaces it. Engine promotion runs on
    /// the blocking pool and completes regardless.
    pub async fn run_loop(
        &self,
        state: &mut CycleState,
        mut triggers: mpsc::Receiver<Trigger>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), AgentError> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
                trigger = triggers.recv() => {
                    let Some(trigger) = trigger else {
                        tracing::info!("trigger source closed, stopping");
                        return Ok(());
                    };
                    tracing::info!(?trigger, "sync triggered");
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => {
                            self.abandon_cycle(state).await;
                            return Ok(());
                        }
                        outcome = self.handle_trigger(state) => {
                            tracing::debug!(?outcome, "trigger handled");
                        }
                    }
                }
            }
        }
    }

    /// Re-read metadata and run a cycle if the desired commit moved.
    pub async fn handle_trigger(&self, state: &mut CycleState) -> TriggerOutcome {
        let meta = match self.deps.bus.read_metadata().await {
            Ok(meta) if meta.is_available() => meta,
            Ok(_) => {
                tracing::warn!("metadata has no commit, skipping sync");
                return TriggerOutcome::MetadataUnavailable;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to read metadata");
                return TriggerOutcome::MetadataUnavailable;
            }
        };

        if meta.is_paused() {
            tracing::info!("gateway is paused, skipping sync");
            return TriggerOutcome::Paused;
        }
        if meta.commit == state.last_synced_commit {
            tracing::debug!(commit = %meta.commit, "commit unchanged, skipping sync");
            return TriggerOutcome::Unchanged;
        }

        tracing::info!(
            old = %state.last_synced_commit,
            new = %meta.commit,
            git_ref = %meta.git_ref,
            "new commit detected",
        );
        if !meta.git_url.is_empty() && meta.git_url != state.git_url {
            tracing::info!(url = %meta.git_url, "repository URL changed");
            state.git_url = meta.git_url.clone();
        }

        let fetched = match self.fetch(&state.auth, &state.git_url, &meta.git_ref).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::error!(error = %err, "git fetch failed");
                self.deps.metrics.record_outcome(false);
                self.report_error(&meta.commit, &meta.git_ref, format!("git fetch: {err}"))
                    .await;
                return TriggerOutcome::FetchFailed;
            }
        };
        tracing::info!(commit = %fetched.commit, "git updated");

        match self.sync_once(state, &fetched).await {
            Ok(_) => TriggerOutcome::Synced,
            Err(err) => {
                tracing::error!(error = %err, "sync had errors");
                TriggerOutcome::SyncFailed
            }
        }
    }

    /// One cycle for an already checked-out commit: compile the profile, run
    /// the engine, rescan the gateway if anything changed, write status.
    pub async fn sync_once(
        &self,
        state: &mut CycleState,
        fetched: &FetchResult,
    ) -> Result<SyncResult, AgentError> {
        state.in_flight = Some((fetched.commit.clone(), fetched.git_ref.clone()));
        let result = self.run_cycle(state, fetched).await;
        state.in_flight = None;
        result
    }

    async fn run_cycle(
        &self,
        state: &mut CycleState,
        fetched: &FetchResult,
    ) -> Result<SyncResult, AgentError> {
        let initial = !state.initial_sync_done;
        let commit = fetched.commit.as_str();
        let git_ref = fetched.git_ref.as_str();

        self.write_status(&GatewayStatus::syncing(commit, git_ref, AGENT_VERSION))
            .await;

        let profile = match self.deps.bus.read_profile().await {
            Ok(profile) => profile,
            Err(err) => {
                self.deps.metrics.record_outcome(false);
                self.report_error(commit, git_ref, format!("profile: {err}"))
                    .await;
                return Err(err.into());
            }
        };

        let started = Instant::now();
        let result = match self.plan_and_execute(&profile, fetched).await {
            Ok(result) => result,
            Err(err) => {
                self.deps
                    .metrics
                    .record_sync(profile.label(), started.elapsed(), 0, false);
                self.report_error(commit, git_ref, failure_message(&err))
                    .await;
                return Err(err);
            }
        };

        let files_changed = result.files_changed();
        tracing::info!(
            added = result.files_added,
            modified = result.files_modified,
            deleted = result.files_deleted,
            projects = ?result.projects_synced,
            duration = %format_duration(result.duration),
            dry_run = profile.dry_run,
            "files synced",
        );
        self.deps
            .metrics
            .record_sync(profile.label(), result.duration, files_changed, true);

        // Only a real scan result can turn the status into Error; the
        // initial health check is informational.
        let (scan_result, scan_failed) = if initial {
            // The gateway scans on first boot by itself.
            match self.deps.gateway.health_check().await {
                Ok(()) => (String::new(), false),
                Err(err) => {
                    tracing::info!(error = %err, "gateway health check failed (expected on initial sync)");
                    (format!("health check failed: {err}"), false)
                }
            }
        } else if files_changed > 0 && !profile.dry_run {
            tracing::info!("triggering gateway scan");
            let scan_started = Instant::now();
            let scan = self.deps.gateway.trigger_scan().await;
            self.deps
                .metrics
                .record_scan(scan_started.elapsed(), scan.is_ok());
            match &scan.error {
                Some(err) => tracing::info!(error = %err, "scan API warning (non-fatal)"),
                None => tracing::info!(result = %scan, "scan complete"),
            }
            let summary = scan.to_string();
            let failed = summary.contains("error");
            (summary, failed)
        } else {
            (String::new(), false)
        };

        let (sync_status, error_message) = if scan_failed {
            (SyncStatus::Error, scan_result.clone())
        } else {
            (SyncStatus::Synced, String::new())
        };

        self.write_status(&GatewayStatus {
            sync_status,
            synced_commit: commit.to_string(),
            synced_ref: git_ref.to_string(),
            last_sync_time: now_rfc3339(),
            last_sync_duration: format_duration(result.duration),
            agent_version: AGENT_VERSION.to_string(),
            last_scan_result: scan_result,
            files_changed,
            projects_synced: result.projects_synced.clone(),
            error_message,
        })
        .await;

        state.last_synced_commit = commit.to_string();
        Ok(result)
    }

    async fn plan_and_execute(
        &self,
        profile: &Profile,
        fetched: &FetchResult,
    ) -> Result<SyncResult, AgentError> {
        let ctx = self.template_context(profile, fetched);
        let plan = compile_plan(
            profile,
            &ctx,
            Arc::clone(&self.deps.resolver),
            &self.config.repo_path,
            &self.config.live_dir,
        )?;
        let result = tokio::task::spawn_blocking(move || execute(&plan))
            .await
            .map_err(|err| AgentError::Join("sync engine", err.to_string()))??;
        Ok(result)
    }

    fn template_context(&self, profile: &Profile, fetched: &FetchResult) -> TemplateContext {
        TemplateContext {
            gateway_name: self.config.gateway_name.clone(),
            pod_name: self.config.pod_name.clone(),
            namespace: self.config.namespace.clone(),
            git_ref: fetched.git_ref.clone(),
            commit: fetched.commit.clone(),
            cr_name: self.config.cr_name.clone(),
            labels: self.config.labels.clone(),
            vars: profile.vars.clone(),
        }
    }

    async fn fetch(
        &self,
        auth: &AuthProvider,
        url: &str,
        git_ref: &str,
    ) -> Result<FetchResult, AgentError> {
        let operation = if self.config.repo_path.join(".git").exists() {
            "fetch"
        } else {
            "clone"
        };
        let started = Instant::now();
        let result = async {
            let credential = auth.git_credential().await?;
            let fetched = self
                .deps
                .git
                .clone_or_fetch(url, git_ref, &self.config.repo_path, &credential)
                .await?;
            Ok::<_, AgentError>(fetched)
        }
        .await;
        self.deps
            .metrics
            .record_git_fetch(operation, started.elapsed(), result.is_ok());
        result
    }

    async fn abandon_cycle(&self, state: &mut CycleState) {
        match state.in_flight.take() {
            Some((commit, git_ref)) => {
                tracing::warn!(commit = %commit, "shutting down during sync cycle");
                self.report_error(&commit, &git_ref, CYCLE_CANCELLED.to_string())
                    .await;
            }
            None => tracing::info!("shutting down during sync cycle"),
        }
    }

    async fn write_status(&self, status: &GatewayStatus) {
        match self
            .deps
            .bus
            .write_status(&self.config.gateway_name, status)
            .await
        {
            Ok(()) => tracing::info!(
                gateway = %self.config.gateway_name,
                status = %status.sync_status,
                "status written",
            ),
            Err(err) => tracing::error!(error = %err, "failed to write status"),
        }
    }

    async fn report_error(&self, commit: &str, git_ref: &str, message: String) {
        self.write_status(&GatewayStatus::failed(commit, git_ref, message, AGENT_VERSION))
            .await;
    }
}

fn failure_message(err: &AgentError) -> String {
    match err {
        AgentError::Plan(err) => format!("sync plan: {err}"),
        other => format!("sync engine: {other}"),
    }
}
