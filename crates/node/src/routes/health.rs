use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall node status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Number of peers this node was configured with.
    pub peers_configured: usize,
    /// Backends currently able to take work.
    pub backends_running: usize,
}

/// GET /health -- node liveness plus a count of usable backends.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let backends_running = state
        .registry
        .list()
        .await
        .iter()
        .filter(|b| b.status().is_usable())
        .count();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        peers_configured: state.config.peers.len(),
        backends_running,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
