use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// The error taxonomy from which every HTTP response is derived.
///
/// Each variant maps to exactly one status code; `Internal` and `Database`
/// are logged at ERROR and never leak their message to the caller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Unauthorized,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<crate::store::StoreError> for AppError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::NotFound => AppError::NotFound,
            crate::store::StoreError::Conflict(msg) => AppError::Conflict(msg),
            crate::store::StoreError::Database(e) => AppError::Database(e),
            crate::store::StoreError::Internal(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                format!("{msg} — refresh and try again"),
            ),
            AppError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "unauthenticated".to_string())
            }
            AppError::Unauthorized => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            AppError::Upstream(e) => (StatusCode::BAD_GATEWAY, e.clone()),
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": msg }))).into_response()
    }
}
