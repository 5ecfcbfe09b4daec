//! `stoker-agent plan`: compile the published profile and preview the sync.
//!
//! Always runs the engine in dry-run mode, so the data directory is never
//! touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use stoker_core::store;
use stoker_sync::{compile_plan, execute, ResolvedMapping, SyncResult};
use stoker_template::{TemplateContext, TeraResolver};

/// Arguments for `stoker-agent plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[arg(long, env = "STOKER_GATEWAY_NAME")]
    pub gateway_name: String,

    #[arg(long, env = "STOKER_BUS_DIR")]
    pub bus_dir: PathBuf,

    #[arg(long, env = "STOKER_REPO_PATH", default_value = "/repo")]
    pub repo_path: PathBuf,

    #[arg(long, env = "STOKER_DATA_PATH")]
    pub data_path: PathBuf,

    #[arg(long, env = "STOKER_NAMESPACE", default_value = "")]
    pub namespace: String,

    #[arg(long, env = "STOKER_CR_NAME", default_value = "")]
    pub cr_name: String,
}

#[derive(Tabled)]
struct MappingRow {
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "destination")]
    destination: String,
    #[tabled(rename = "type")]
    mapping_type: String,
    #[tabled(rename = "template")]
    template: bool,
    #[tabled(rename = "required")]
    required: bool,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let mut profile = store::load_profile_at(&self.bus_dir)
            .context("failed to load the published profile")?;
        profile.dry_run = true;

        // Metadata is optional here; without it `ref` and `commit` render empty.
        let meta = store::load_metadata_at(&self.bus_dir).unwrap_or_default();
        let ctx = TemplateContext {
            gateway_name: self.gateway_name.clone(),
            namespace: self.namespace.clone(),
            git_ref: meta.git_ref,
            commit: meta.commit,
            cr_name: self.cr_name.clone(),
            vars: profile.vars.clone(),
            ..TemplateContext::default()
        };

        let plan = compile_plan(
            &profile,
            &ctx,
            Arc::new(TeraResolver),
            &self.repo_path,
            &self.data_path,
        )
        .context("sync plan failed to compile")?;

        print_mappings(&self.repo_path, &plan.mappings);
        let result = execute(&plan).context("dry run failed")?;
        print_result(&self.gateway_name, &result);
        Ok(())
    }
}

fn print_mappings(repo_path: &Path, mappings: &[ResolvedMapping]) {
    if mappings.is_empty() {
        println!("Profile has no mappings.");
        return;
    }
    let rows: Vec<MappingRow> = mappings
        .iter()
        .map(|m| MappingRow {
            source: m
                .source
                .strip_prefix(repo_path)
                .unwrap_or(&m.source)
                .display()
                .to_string(),
            destination: display_destination(&m.destination),
            mapping_type: m.mapping_type.to_string(),
            template: m.template,
            required: m.required,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn display_destination(destination: &Path) -> String {
    if destination.as_os_str().is_empty() {
        ".".to_string()
    } else {
        destination.display().to_string()
    }
}

fn print_result(gateway: &str, result: &SyncResult) {
    let summary = format!(
        "{} added, {} modified, {} deleted",
        result.files_added, result.files_modified, result.files_deleted
    );
    if result.files_changed() == 0 {
        println!("[dry-run] '{gateway}' is up to date ({summary})");
    } else {
        println!("[dry-run] '{gateway}' would change: {}", summary.yellow());
    }
    if !result.projects_synced.is_empty() {
        println!("projects: {}", result.projects_synced.join(", "));
    }
}
