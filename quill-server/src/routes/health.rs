//! Health / heartbeat endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health, get_heartbeat))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/heartbeat", get(get_heartbeat))
}

/// Health endpoint.
///
/// Returns `{"status": "ok", "version": "..."}` plus worker pool occupancy.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status":  "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workers": state.pool.capacity(),
        "in_flight": state.pool.in_flight(),
        "open_streams": state.registry.len(),
    }))
}

/// Liveness probe; always `{"alive": true}`.
#[utoipa::path(
    get,
    path = "/heartbeat",
    tag = "health",
    responses(
        (status = 200, description = "Server is alive", body = Value)
    )
)]
pub async fn get_heartbeat() -> Json<Value> {
    Json(json!({ "alive": true }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
