//! `stoker-agent status`: status records published by every agent on the bus.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use stoker_core::{store, GatewayStatus, SyncStatus};

/// Arguments for `stoker-agent status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(long, env = "STOKER_BUS_DIR")]
    pub bus_dir: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusEntryJson<'a> {
    gateway: &'a str,
    #[serde(flatten)]
    status: &'a GatewayStatus,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "gateway")]
    gateway: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "commit")]
    commit: String,
    #[tabled(rename = "ref")]
    git_ref: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "files")]
    files_changed: u32,
    #[tabled(rename = "detail")]
    detail: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let statuses = store::list_statuses_at(&self.bus_dir)
            .with_context(|| format!("failed to read status records from {}", self.bus_dir.display()))?;

        if self.json {
            let payload: Vec<_> = statuses
                .iter()
                .map(|(gateway, status)| StatusEntryJson { gateway, status })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(statuses);
        Ok(())
    }
}

fn print_table(statuses: Vec<(String, GatewayStatus)>) {
    if statuses.is_empty() {
        println!("No status records.");
        return;
    }

    let errors = statuses
        .iter()
        .filter(|(_, s)| s.sync_status == SyncStatus::Error)
        .count();
    println!(
        "Stoker v{} | {} gateways | {} in error",
        env!("CARGO_PKG_VERSION"),
        statuses.len(),
        errors,
    );

    let now = Utc::now();
    let rows: Vec<StatusTableRow> = statuses
        .into_iter()
        .map(|(gateway, status)| StatusTableRow {
            gateway,
            status: status_label(status.sync_status),
            commit: short_commit(&status.synced_commit),
            git_ref: status.synced_ref.clone(),
            last_sync: format_age(&status.last_sync_time, now),
            files_changed: status.files_changed,
            detail: detail(&status),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn status_label(status: SyncStatus) -> String {
    let label = status.to_string();
    match status {
        SyncStatus::Synced => label.green().to_string(),
        SyncStatus::Syncing | SyncStatus::Pending => label.yellow().to_string(),
        SyncStatus::Error => label.red().bold().to_string(),
    }
}

fn short_commit(commit: &str) -> String {
    commit.chars().take(8).collect()
}

fn detail(status: &GatewayStatus) -> String {
    if !status.error_message.is_empty() {
        status.error_message.clone()
    } else {
        status.last_scan_result.clone()
    }
}

/// `"42s ago"`, `"5m ago"`, `"3h ago"`, `"2d ago"`; the raw value if it does
/// not parse as RFC3339.
fn format_age(timestamp: &str, now: DateTime<Utc>) -> String {
    if timestamp.is_empty() {
        return "never".to_string();
    }
    let Ok(at) = DateTime::parse_from_rfc3339(timestamp) else {
        return timestamp.to_string();
    };
    let secs = (now - at.with_timezone(&Utc)).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ages_are_coarse() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_age("2026-03-01T11:59:30Z", now), "30s ago");
        assert_eq!(format_age("2026-03-01T11:55:00Z", now), "5m ago");
        assert_eq!(format_age("2026-03-01T09:00:00Z", now), "3h ago");
        assert_eq!(format_age("2026-02-27T12:00:00Z", now), "2d ago");
        assert_eq!(format_age("", now), "never");
        assert_eq!(format_age("yesterday", now), "yesterday");
    }

    #[test]
    fn commits_are_shortened() {
        assert_eq!(short_commit("0123456789abcdef"), "01234567");
        assert_eq!(short_commit("abc"), "abc");
    }

    #[test]
    fn error_message_wins_over_scan_result() {
        let status = GatewayStatus {
            last_scan_result: "projects=200 config=200".to_string(),
            error_message: "git fetch: timeout".to_string(),
            ..GatewayStatus::default()
        };
        assert_eq!(detail(&status), "git fetch: timeout");
    }
}
