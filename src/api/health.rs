use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let retry_depth = state.store.retry_queue_depth().unwrap_or(0);
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "retry_queue_depth": retry_depth,
        })),
    )
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics_handle.render())
}
