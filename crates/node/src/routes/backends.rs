//! Read-only view of the backend registry.

use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::{routing::get, Json, Router};
use hivelink_core::status::BackendStatus;
use hivelink_core::types::{BackendId, RemoteBackendId};
use hivelink_federation::FederatedBackend;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// One registry record as reported over HTTP.
#[derive(Debug, Serialize)]
pub struct BackendSummary {
    pub id: BackendId,
    /// `real` or `proxy`.
    pub role: &'static str,
    pub address: String,
    pub linked_remote_id: Option<RemoteBackendId>,
    pub status: BackendStatus,
    pub features: BTreeSet<String>,
    pub backend_types: BTreeSet<String>,
    pub current_model: Option<String>,
    pub max_usage_count: u32,
    /// Remote ids mirrored by a real backend; empty for proxies.
    pub proxies: Vec<RemoteBackendId>,
}

impl BackendSummary {
    async fn from_backend(backend: &FederatedBackend) -> Self {
        Self {
            id: backend.id(),
            role: if backend.is_real() { "real" } else { "proxy" },
            address: backend.address().to_string(),
            linked_remote_id: backend.linked_remote_id(),
            status: backend.status(),
            features: backend.supported_features(),
            backend_types: backend.backend_types(),
            current_model: backend.current_model_name().await,
            max_usage_count: backend.max_usage_count(),
            proxies: backend.controlled_proxy_ids().await,
        }
    }
}

/// GET /backends
async fn list_backends(State(state): State<AppState>) -> Json<Vec<BackendSummary>> {
    let backends = state.registry.list().await;
    let mut summaries = Vec::with_capacity(backends.len());
    for backend in &backends {
        summaries.push(BackendSummary::from_backend(backend).await);
    }
    Json(summaries)
}

/// GET /backends/{id}
async fn get_backend(
    State(state): State<AppState>,
    Path(id): Path<BackendId>,
) -> AppResult<Json<BackendSummary>> {
    let backend = state
        .registry
        .get(id)
        .await
        .ok_or(AppError::BackendNotFound(id))?;
    Ok(Json(BackendSummary::from_backend(&backend).await))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/backends", get(list_backends))
        .route("/backends/{id}", get(get_backend))
}
