//! `stoker-agent run`: the long-running agent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use stoker_agent::config::{load_pod_labels, DEFAULT_HEALTH_ADDR};
use stoker_agent::{start_blocking, AgentConfig};
use stoker_git::{FileAuthPaths, GitHubAppFiles};

use crate::LogFormatArg;

/// Arguments for `stoker-agent run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Name of the gateway this agent serves; also its status record key.
    #[arg(long, env = "STOKER_GATEWAY_NAME")]
    pub gateway_name: String,

    #[arg(long, env = "STOKER_POD_NAME", default_value = "")]
    pub pod_name: String,

    #[arg(long, env = "STOKER_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Name of the owning custom resource, exposed to templates as `crName`.
    #[arg(long, env = "STOKER_CR_NAME", default_value = "")]
    pub cr_name: String,

    /// Downward-API labels file (`key="value"` per line).
    #[arg(long, env = "STOKER_POD_LABELS_FILE")]
    pub pod_labels_file: Option<PathBuf>,

    /// Mounted bus directory.
    #[arg(long, env = "STOKER_BUS_DIR")]
    pub bus_dir: PathBuf,

    /// Local checkout of the configuration repository.
    #[arg(long, env = "STOKER_REPO_PATH", default_value = "/repo")]
    pub repo_path: PathBuf,

    /// The gateway's live data directory.
    #[arg(long, env = "STOKER_DATA_PATH")]
    pub data_path: PathBuf,

    /// Periodic resync interval in seconds.
    #[arg(long, env = "STOKER_SYNC_PERIOD", default_value_t = 30)]
    pub sync_period: u64,

    #[arg(long, env = "STOKER_HEALTH_ADDR", default_value = DEFAULT_HEALTH_ADDR)]
    pub health_addr: SocketAddr,

    #[arg(long, env = "STOKER_GATEWAY_URL", default_value = "http://localhost:8088")]
    pub gateway_url: String,

    /// File holding the gateway API token sent with scan requests.
    #[arg(long, env = "STOKER_GATEWAY_API_TOKEN_FILE")]
    pub gateway_api_token_file: Option<PathBuf>,

    #[arg(long, env = "STOKER_GIT_SSH_KEY_FILE")]
    pub git_ssh_key_file: Option<PathBuf>,

    #[arg(long, env = "STOKER_GIT_TOKEN_FILE")]
    pub git_token_file: Option<PathBuf>,

    #[arg(long, env = "STOKER_GITHUB_APP_ID")]
    pub github_app_id: Option<i64>,

    #[arg(long, env = "STOKER_GITHUB_APP_INSTALLATION_ID")]
    pub github_app_installation_id: Option<i64>,

    #[arg(long, env = "STOKER_GITHUB_APP_PRIVATE_KEY_FILE")]
    pub github_app_private_key_file: Option<PathBuf>,

    /// GitHub Enterprise API base URL.
    #[arg(long, env = "STOKER_GITHUB_API_URL")]
    pub github_api_url: Option<String>,

    /// Root of mounted secrets, for a `gitAuth` reference on the bus.
    #[arg(long, env = "STOKER_SECRETS_DIR")]
    pub secrets_dir: Option<PathBuf>,

    /// `text` or `json`.
    #[arg(long, env = "STOKER_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormatArg,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let config = self.into_config()?;
        start_blocking(config).context("agent exited with error")
    }

    pub fn into_config(self) -> Result<AgentConfig> {
        let github_app = match (
            self.github_app_id,
            self.github_app_installation_id,
            self.github_app_private_key_file,
        ) {
            (None, None, None) => None,
            (Some(app_id), Some(installation_id), Some(private_key_file)) => {
                Some(GitHubAppFiles {
                    app_id,
                    installation_id,
                    private_key_file,
                    api_base_url: self.github_api_url,
                })
            }
            _ => bail!(
                "GitHub App auth needs --github-app-id, --github-app-installation-id and --github-app-private-key-file"
            ),
        };

        let labels = match &self.pod_labels_file {
            Some(path) => load_pod_labels(path)
                .with_context(|| format!("failed to read pod labels from {}", path.display()))?,
            None => Default::default(),
        };

        let mut config = AgentConfig::new(
            self.gateway_name,
            self.bus_dir,
            self.repo_path,
            self.data_path,
        );
        config.pod_name = self.pod_name;
        config.namespace = self.namespace;
        config.cr_name = self.cr_name;
        config.labels = labels;
        config.sync_period = Duration::from_secs(self.sync_period);
        config.health_addr = self.health_addr;
        config.gateway_url = self.gateway_url;
        config.gateway_api_token_file = self.gateway_api_token_file;
        config.auth = FileAuthPaths {
            ssh_key_file: self.git_ssh_key_file,
            token_file: self.git_token_file,
            github_app,
        };
        config.secrets_dir = self.secrets_dir;
        config.log_format = self.log_format.into();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use stoker_agent::LogFormat;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(extra: &[&str]) -> Result<AgentConfig> {
        let mut argv = vec![
            "stoker-agent",
            "--gateway-name",
            "gw-blue",
            "--bus-dir",
            "/bus",
            "--data-path",
            "/data",
        ];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv)?.args.into_config()
    }

    #[test]
    fn flags_map_onto_config() {
        let config = parse(&[
            "--sync-period",
            "90",
            "--namespace",
            "plant-a",
            "--log-format",
            "json",
            "--git-token-file",
            "/secrets/token",
        ])
        .unwrap();
        assert_eq!(config.gateway_name, "gw-blue");
        assert_eq!(config.repo_path, PathBuf::from("/repo"));
        assert_eq!(config.live_dir, PathBuf::from("/data"));
        assert_eq!(config.sync_period, Duration::from_secs(90));
        assert_eq!(config.namespace, "plant-a");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.auth.token_file, Some(PathBuf::from("/secrets/token")));
        assert!(config.auth.github_app.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn github_app_flags_must_come_together() {
        let err = parse(&["--github-app-id", "12"]).unwrap_err();
        assert!(err.to_string().contains("--github-app-installation-id"));

        let config = parse(&[
            "--github-app-id",
            "12",
            "--github-app-installation-id",
            "34",
            "--github-app-private-key-file",
            "/secrets/app.pem",
        ])
        .unwrap();
        let app = config.auth.github_app.unwrap();
        assert_eq!((app.app_id, app.installation_id), (12, 34));
        assert!(app.api_base_url.is_none());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(parse(&["--log-format", "xml"]).is_err());
    }
}
