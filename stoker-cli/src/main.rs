//! Stoker gateway sync agent.
//!
//! # Usage
//!
//! ```text
//! stoker-agent run --gateway-name <name> --bus-dir <dir> --data-path <dir> [...]
//! stoker-agent plan --gateway-name <name> --bus-dir <dir> --repo-path <dir> --data-path <dir>
//! stoker-agent status --bus-dir <dir> [--json]
//! ```
//!
//! Every flag also reads a `STOKER_*` environment variable.

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{plan::PlanArgs, run::RunArgs, status::StatusArgs};
use stoker_agent::LogFormat;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "stoker-agent",
    version,
    about = "Keep a gateway's data directory in sync with a git repository",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync agent until SIGINT/SIGTERM.
    Run(RunArgs),

    /// Compile the published profile and dry-run it against a checkout.
    Plan(PlanArgs),

    /// Show the status records on the bus.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Shared LogFormat argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `LogFormat` from CLI args.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFormatArg(pub LogFormat);

impl FromStr for LogFormatArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self(LogFormat::Text)),
            "json" => Ok(Self(LogFormat::Json)),
            other => Err(format!("unknown log format '{other}'; expected: text, json")),
        }
    }
}

impl fmt::Display for LogFormatArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        arg.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
