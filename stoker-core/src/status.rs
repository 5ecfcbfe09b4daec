//! Observed-state record each agent writes for its gateway.
//!
//! The record is replaced wholesale on every write; nothing reads it back to
//! merge fields.

use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Sync lifecycle as seen from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    #[default]
    Pending,
    Syncing,
    Synced,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "Pending"),
            SyncStatus::Syncing => write!(f, "Syncing"),
            SyncStatus::Synced => write!(f, "Synced"),
            SyncStatus::Error => write!(f, "Error"),
        }
    }
}

/// JSON payload stored under the gateway's name in the status map.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub sync_status: SyncStatus,
    pub synced_commit: String,
    pub synced_ref: String,
    /// RFC3339, UTC, second precision.
    pub last_sync_time: String,
    /// Human-readable, millisecond-rounded (`"1.5s"`, `"250ms"`).
    pub last_sync_duration: String,
    pub agent_version: String,
    pub last_scan_result: String,
    pub files_changed: u32,
    #[serde(default)]
    pub projects_synced: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl GatewayStatus {
    /// Waiting for metadata or for the first clone.
    pub fn pending(git_ref: &str, agent_version: &str) -> Self {
        Self {
            sync_status: SyncStatus::Pending,
            synced_ref: git_ref.to_string(),
            last_sync_time: now_rfc3339(),
            agent_version: agent_version.to_string(),
            ..Self::default()
        }
    }

    /// A cycle for `commit` has started.
    pub fn syncing(commit: &str, git_ref: &str, agent_version: &str) -> Self {
        Self {
            sync_status: SyncStatus::Syncing,
            synced_commit: commit.to_string(),
            synced_ref: git_ref.to_string(),
            last_sync_time: now_rfc3339(),
            agent_version: agent_version.to_string(),
            ..Self::default()
        }
    }

    /// A cycle for `commit` failed before any scan result existed.
    pub fn failed(commit: &str, git_ref: &str, message: impl Into<String>, agent_version: &str) -> Self {
        Self {
            sync_status: SyncStatus::Error,
            synced_commit: commit.to_string(),
            synced_ref: git_ref.to_string(),
            last_sync_time: now_rfc3339(),
            agent_version: agent_version.to_string(),
            error_message: message.into(),
            ..Self::default()
        }
    }
}

/// Current UTC time in the status record's timestamp format.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a duration rounded to the millisecond, e.g. `"0s"`, `"250ms"`,
/// `"1.234s"`, `"2m3.5s"`, `"1h0m0s"`.
pub fn format_duration(duration: Duration) -> String {
    let millis = (duration.as_micros() + 500) / 1000;
    if millis == 0 {
        return "0s".to_string();
    }
    if millis < 1000 {
        return format!("{millis}ms");
    }

    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1000) % 60;
    let fraction = millis % 1000;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    let _ = write!(out, "{seconds}");
    if fraction > 0 {
        let digits = format!("{fraction:03}");
        let _ = write!(out, ".{}", digits.trim_end_matches('0'));
    }
    out.push('s');
    out
}
