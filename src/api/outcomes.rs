use super::AppState;
use crate::error::AppResult;
use crate::models::Outcome;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub transaction_id: Uuid,
    pub payer_id: Uuid,
    pub receiver: String,
    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
pub struct OutcomeResponse {
    pub accepted: bool,
}

pub async fn outcomes_handler(
    State(state): State<AppState>,
    Json(request): Json<OutcomeRequest>,
) -> AppResult<Json<OutcomeResponse>> {
    state
        .trust_updater
        .apply_outcome(
            request.transaction_id,
            request.payer_id,
            &request.receiver.to_lowercase(),
            request.outcome,
        )
        .await
        .map_err(crate::error::AppError::Internal)?;

    Ok(Json(OutcomeResponse { accepted: true }))
}
