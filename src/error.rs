//! Error taxonomy for the risk-assessment boundary.
//!
//! Internal engines return `anyhow::Result` with `.context(...)` breadcrumbs;
//! at the Orchestrator/HTTP seam everything collapses into `AppError`, whose
//! variants are exactly the error kinds in the specification's error table.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("store unavailable")]
    StoreReadUnavailable,

    #[error("store write could not be persisted, queued for retry")]
    StoreWritePersistenceFailure,

    #[error("assessment exceeded its deadline")]
    Timeout,

    #[error("invalid request: {0}")]
    ValidationError(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::StoreReadUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_read_unavailable")
            }
            AppError::StoreWritePersistenceFailure => {
                (StatusCode::ACCEPTED, "store_write_queued_for_retry")
            }
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "assessment_timeout"),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
