//! Gateway sync agent: orchestrator, trigger watcher, health server.

pub mod agent;
pub mod auth;
pub mod bus;
pub mod config;
mod error;
pub mod gateway;
pub mod health;
pub mod metrics;
mod runtime;
pub mod watcher;

pub use agent::{Agent, AgentDeps, CycleState, TriggerOutcome};
pub use auth::{load_credential, AuthProvider};
pub use bus::{FileBus, StatusBus};
pub use config::{AgentConfig, LogFormat, AGENT_VERSION};
pub use error::{AgentError, BusError, GatewayError, MetricsError};
pub use gateway::{GatewayApi, GatewayClient, ScanResult};
pub use health::Readiness;
pub use metrics::AgentMetrics;
pub use runtime::{init_tracing, run, start_blocking};
pub use watcher::{trigger_channel, Trigger, TriggerWatcher};
