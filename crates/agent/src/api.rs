//! HTTP API for health checks, monitor status and Prometheus metrics
//!
//! - `/healthz`: 200 unless a component is unhealthy
//! - `/readyz`: 200 while the monitor loop runs
//! - `/status`: the monitor's latest progress snapshot
//! - `/metrics`: Prometheus text exposition

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use anyhow::Context;
use hostwatch_lib::health::HealthRegistry;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub node_name: String,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, node_name: impl Into<String>) -> Self {
        Self {
            health_registry,
            node_name: node_name.into(),
        }
    }
}

/// 503 when `ok` is false, 200 otherwise
fn probe<T: serde::Serialize>(ok: bool, body: T) -> (StatusCode, Json<T>) {
    let code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    // Collecting training data or a flaky dispatcher is still operational
    probe(health.status.is_operational(), health)
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    probe(readiness.ready, readiness)
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let monitor = state.health_registry.monitor_status().await;
    Json(serde_json::json!({
        "node": state.node_name,
        "monitor": monitor,
    }))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    let code = match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        code,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API server on {}", addr))?;
    info!(addr = %addr, "API server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("API server stopped");
    Ok(())
}
