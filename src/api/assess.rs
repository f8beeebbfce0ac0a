use super::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{GeoPoint, PaymentMode, ReceiverType, Transaction, TransactionStatus};
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AssessRequest {
    pub payer_id: Uuid,
    pub receiver: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub device_fingerprint: String,
    pub location: Option<GeoPoint>,
    pub payment_mode: PaymentMode,
    pub receiver_type: ReceiverType,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AssessResponse {
    #[serde(flatten)]
    pub assessment: crate::models::RiskAssessment,
}

pub async fn assess_handler(
    State(state): State<AppState>,
    Json(request): Json<AssessRequest>,
) -> AppResult<Json<AssessResponse>> {
    validate_request(&request)?;

    let txn = Transaction {
        id: Uuid::new_v4(),
        payer_id: request.payer_id,
        receiver: request.receiver.to_lowercase(),
        amount: request.amount,
        timestamp: request.timestamp,
        device_fingerprint: request.device_fingerprint,
        location: request.location,
        payment_mode: request.payment_mode,
        receiver_type: request.receiver_type,
        status: TransactionStatus::PendingAssessment,
    };

    let assessment = state
        .orchestrator
        .assess(txn, request.idempotency_key)
        .await?;

    Ok(Json(AssessResponse { assessment }))
}

fn validate_request(request: &AssessRequest) -> AppResult<()> {
    if request.amount < 0.0 {
        return Err(AppError::ValidationError("amount must be non-negative".to_string()));
    }
    if request.receiver.trim().is_empty() {
        return Err(AppError::ValidationError("receiver must not be empty".to_string()));
    }
    let drift = (Utc::now() - request.timestamp).num_seconds().abs();
    if drift > 300 {
        return Err(AppError::ValidationError(
            "timestamp is more than 5 minutes from server clock".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> AssessRequest {
        AssessRequest {
            payer_id: Uuid::new_v4(),
            receiver: "swiggy@paytm".to_string(),
            amount: 600.0,
            timestamp: Utc::now(),
            device_fingerprint: "d1".to_string(),
            location: None,
            payment_mode: PaymentMode::Mobile,
            receiver_type: ReceiverType::Vpa,
            idempotency_key: None,
        }
    }

    #[test]
    fn test_negative_amount_rejected() {
        let mut request = base_request();
        request.amount = -1.0;
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_empty_receiver_rejected() {
        let mut request = base_request();
        request.receiver = "  ".to_string();
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let mut request = base_request();
        request.timestamp = Utc::now() - chrono::Duration::minutes(10);
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate_request(&base_request()).is_ok());
    }
}
