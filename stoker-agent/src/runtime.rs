use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use stoker_git::GitCli;
use stoker_template::TeraResolver;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::agent::{Agent, AgentDeps};
use crate::bus::FileBus;
use crate::config::{AgentConfig, LogFormat};
use crate::error::{io_err, AgentError};
use crate::gateway::GatewayClient;
use crate::health::{self, Readiness};
use crate::metrics::AgentMetrics;

const GITHUB_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Start the agent runtime and block the current thread until it exits.
pub fn start_blocking(config: AgentConfig) -> Result<(), AgentError> {
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the agent: health server, signal handling and the orchestrator.
///
/// Fails fast when the health address cannot be bound.
pub async fn run(config: AgentConfig) -> Result<(), AgentError> {
    config.validate()?;

    let metrics = AgentMetrics::new()?;
    let readiness = Readiness::default();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let listener = TcpListener::bind(config.health_addr)
        .await
        .map_err(|e| io_err(format!("health listener {}", config.health_addr), e))?;

    let api_token = match &config.gateway_api_token_file {
        Some(path) => Some(read_secret_file(path)?),
        None => None,
    };
    let gateway = GatewayClient::new(&config.gateway_url, api_token)
        .map_err(|e| AgentError::Config(format!("gateway client: {e}")))?;
    let http = reqwest::Client::builder()
        .timeout(GITHUB_HTTP_TIMEOUT)
        .build()
        .map_err(|e| AgentError::Config(format!("http client: {e}")))?;

    let deps = AgentDeps {
        bus: Arc::new(FileBus::new(&config.bus_dir)),
        git: Arc::new(GitCli::default()),
        gateway: Arc::new(gateway),
        resolver: Arc::new(TeraResolver),
        metrics: metrics.clone(),
        readiness: readiness.clone(),
        http,
    };
    let agent = Agent::new(config, deps);

    let health_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = health::serve(listener, readiness, metrics, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = wait_for_signal() => {
                    match signal {
                        Ok(name) => {
                            tracing::info!(signal = name, "received signal, shutting down agent");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(io_err("signal handler", err)),
                    }
                }
            }
        })
    };

    let agent_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = match agent.run(&shutdown).await {
                Err(AgentError::Cancelled) => Ok(()),
                other => other,
            };
            let _ = shutdown.send(());
            result
        })
    };

    let (agent_result, health_result, signal_result) =
        tokio::join!(agent_handle, health_handle, signal_handle);

    handle_join("agent", agent_result)?;
    handle_join("health_server", health_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}

fn read_secret_file(path: &Path) -> Result<SecretString, AgentError> {
    let value = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(SecretString::from(value.trim().to_string()))
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), AgentError>, tokio::task::JoinError>,
) -> Result<(), AgentError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(AgentError::Join(task, err.to_string())),
    }
}
