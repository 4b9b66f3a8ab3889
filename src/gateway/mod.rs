//! Liveness gateway.
//!
//! The bridge only needs an HTTP listener so the hosting platform's health
//! probe succeeds; `/healthz` and `/status` are read-only extras for anyone
//! curious about what the process is doing. Body limits and timeouts are
//! applied even though no route reads a body.

use crate::bridge::BridgeState;
use anyhow::{Context, Result};
use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<BridgeState>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/healthz", get(handle_healthz))
        .route("/status", get(handle_status))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .with_state(state)
}

/// What the platform health check probes.
async fn handle_root() -> &'static str {
    "OK"
}

async fn handle_healthz() -> Json<serde_json::Value> {
    Json(crate::health::snapshot_json())
}

async fn handle_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "bridge": state.bridge.counters.snapshot_json(),
        "health": crate::health::snapshot_json(),
    }))
}

pub async fn run_gateway(host: &str, port: u16, state: AppState) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    tracing::info!("Gateway listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("Gateway server error")
}
