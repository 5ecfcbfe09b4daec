//! Liveness, readiness and metrics over HTTP.
//!
//! - `GET /healthz`: always 200 while the process serves requests
//! - `GET /readyz`: 503 until the first sync attempt has finished, then 200
//! - `GET /metrics`: Prometheus text format

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::error::{io_err, AgentError};
use crate::metrics::AgentMetrics;

/// Set once, after the initial sync attempt. Never cleared.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
struct HealthState {
    readiness: Readiness,
    metrics: AgentMetrics,
}

pub fn router(readiness: Readiness, metrics: AgentMetrics) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(HealthState { readiness, metrics })
}

/// Serve on an already-bound listener until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    readiness: Readiness,
    metrics: AgentMetrics,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    let addr = listener
        .local_addr()
        .map_err(|e| io_err("health listener", e))?;
    tracing::info!(addr = %addr, "health server listening");

    axum::serve(listener, router(readiness, metrics))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| io_err("health server", e))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<HealthState>) -> Response {
    if state.readiness.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_handler(State(state): State<HealthState>) -> Response {
    match state.metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
