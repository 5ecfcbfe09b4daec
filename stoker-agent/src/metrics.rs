//! Prometheus metrics for the agent.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `stoker_agent_sync_duration_seconds` | Histogram | `profile` |
//! | `stoker_agent_sync_total` | Counter | `profile`, `result` |
//! | `stoker_agent_files_changed` | Gauge | `profile` |
//! | `stoker_agent_git_fetch_duration_seconds` | Histogram | `operation` |
//! | `stoker_agent_git_fetch_total` | Counter | `operation`, `result` |
//! | `stoker_agent_scan_duration_seconds` | Histogram | |
//! | `stoker_agent_scan_total` | Counter | `result` |
//! | `stoker_agent_designer_sessions_blocked` | Gauge | |
//! | `stoker_agent_last_sync_timestamp_seconds` | Gauge | |
//! | `stoker_agent_last_sync_success` | Gauge | |
//! | `stoker_agent_github_app_token_expiry_timestamp_seconds` | Gauge | `app_id`, `installation_id` |
//!
//! The registry is private to the agent; nothing is registered globally.

use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

use crate::error::MetricsError;

const NAMESPACE: &str = "stoker";
const SUBSYSTEM: &str = "agent";

pub const SYNC_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];
pub const GIT_FETCH_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0];

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";

/// Handles to every agent metric. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AgentMetrics {
    registry: Registry,
    sync_duration: HistogramVec,
    sync_total: CounterVec,
    files_changed: GaugeVec,
    git_fetch_duration: HistogramVec,
    git_fetch_total: CounterVec,
    scan_duration: Histogram,
    scan_total: CounterVec,
    // Always 0; syncs never wait on designer sessions.
    _designer_blocked: Gauge,
    last_sync_timestamp: Gauge,
    last_sync_success: Gauge,
    token_expiry: GaugeVec,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM)
}

fn histogram_opts(name: &str, help: &str, buckets: &[f64]) -> HistogramOpts {
    HistogramOpts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM)
        .buckets(buckets.to_vec())
}

impl AgentMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let sync_duration = HistogramVec::new(
            histogram_opts(
                "sync_duration_seconds",
                "Duration of file sync operations in seconds.",
                SYNC_BUCKETS,
            ),
            &["profile"],
        )?;
        registry.register(Box::new(sync_duration.clone()))?;

        let sync_total = CounterVec::new(
            opts("sync_total", "Total number of sync operations."),
            &["profile", "result"],
        )?;
        registry.register(Box::new(sync_total.clone()))?;

        let files_changed = GaugeVec::new(
            opts("files_changed", "Number of files changed in the last sync."),
            &["profile"],
        )?;
        registry.register(Box::new(files_changed.clone()))?;

        let git_fetch_duration = HistogramVec::new(
            histogram_opts(
                "git_fetch_duration_seconds",
                "Duration of git clone/fetch operations in seconds.",
                GIT_FETCH_BUCKETS,
            ),
            &["operation"],
        )?;
        registry.register(Box::new(git_fetch_duration.clone()))?;

        let git_fetch_total = CounterVec::new(
            opts("git_fetch_total", "Total number of git clone/fetch operations."),
            &["operation", "result"],
        )?;
        registry.register(Box::new(git_fetch_total.clone()))?;

        let scan_duration = Histogram::with_opts(histogram_opts(
            "scan_duration_seconds",
            "Duration of gateway scan API calls in seconds.",
            SYNC_BUCKETS,
        ))?;
        registry.register(Box::new(scan_duration.clone()))?;

        let scan_total = CounterVec::new(
            opts("scan_total", "Total number of gateway scan operations."),
            &["result"],
        )?;
        registry.register(Box::new(scan_total.clone()))?;

        let designer_blocked = Gauge::with_opts(opts(
            "designer_sessions_blocked",
            "Whether sync is currently blocked by active designer sessions (1=blocked, 0=not).",
        ))?;
        registry.register(Box::new(designer_blocked.clone()))?;

        let last_sync_timestamp = Gauge::with_opts(opts(
            "last_sync_timestamp_seconds",
            "Unix timestamp of the last successful sync.",
        ))?;
        registry.register(Box::new(last_sync_timestamp.clone()))?;

        let last_sync_success = Gauge::with_opts(opts(
            "last_sync_success",
            "Whether the last sync was successful (1=success, 0=error).",
        ))?;
        registry.register(Box::new(last_sync_success.clone()))?;

        let token_expiry = GaugeVec::new(
            opts(
                "github_app_token_expiry_timestamp_seconds",
                "Unix timestamp at which the cached GitHub App installation token expires.",
            ),
            &["app_id", "installation_id"],
        )?;
        registry.register(Box::new(token_expiry.clone()))?;

        Ok(Self {
            registry,
            sync_duration,
            sync_total,
            files_changed,
            git_fetch_duration,
            git_fetch_total,
            scan_duration,
            scan_total,
            _designer_blocked: designer_blocked,
            last_sync_timestamp,
            last_sync_success,
            token_expiry,
        })
    }

    /// A sync cycle finished (engine ran, successfully or not).
    pub fn record_sync(&self, profile: &str, duration: Duration, files_changed: u32, ok: bool) {
        self.sync_duration
            .with_label_values(&[profile])
            .observe(duration.as_secs_f64());
        self.sync_total
            .with_label_values(&[profile, result_label(ok)])
            .inc();
        if ok {
            self.files_changed
                .with_label_values(&[profile])
                .set(f64::from(files_changed));
        }
        self.record_outcome(ok);
    }

    /// Last-sync gauges only; for failures that never reach the engine.
    pub fn record_outcome(&self, ok: bool) {
        if ok {
            self.last_sync_timestamp
                .set(chrono::Utc::now().timestamp() as f64);
            self.last_sync_success.set(1.0);
        } else {
            self.last_sync_success.set(0.0);
        }
    }

    /// `operation` is `clone` for the first checkout and `fetch` afterwards.
    pub fn record_git_fetch(&self, operation: &str, duration: Duration, ok: bool) {
        self.git_fetch_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
        self.git_fetch_total
            .with_label_values(&[operation, result_label(ok)])
            .inc();
    }

    pub fn record_scan(&self, duration: Duration, ok: bool) {
        self.scan_duration.observe(duration.as_secs_f64());
        self.scan_total.with_label_values(&[result_label(ok)]).inc();
    }

    pub fn set_token_expiry(&self, app_id: i64, installation_id: i64, expires_at_unix: i64) {
        self.token_expiry
            .with_label_values(&[&app_id.to_string(), &installation_id.to_string()])
            .set(expires_at_unix as f64);
    }

    /// Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

fn result_label(ok: bool) -> &'static str {
    if ok {
        RESULT_SUCCESS
    } else {
        RESULT_ERROR
    }
}
