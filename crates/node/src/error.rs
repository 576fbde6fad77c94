use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hivelink_core::types::BackendId;
use serde_json::json;

/// Error type for HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Backend {0} not found")]
    BackendNotFound(BackendId),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::BackendNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        };

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
