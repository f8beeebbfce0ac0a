//! ML Scoring Engine: engineers the fixed-shape feature vector and maps it
//! to a fraud probability, falling back to a weighted heuristic when no
//! model artifact is loaded.

use crate::context::{PayerContext, ReceiverContext};
use crate::models::Transaction;
use nalgebra::SVector;

pub const FEATURE_COUNT: usize = 22;
pub type FeatureVector = SVector<f64, FEATURE_COUNT>;

/// Builds the 22-feature vector in the fixed order the model artifact
/// depends on. Never reorder these without bumping the model version.
pub fn engineer_features(
    txn: &Transaction,
    payer: &PayerContext,
    receiver: &ReceiverContext,
) -> FeatureVector {
    let hour = txn.hour() as f64;
    let is_new_receiver = receiver.is_new_for_this_payer as u8 as f64;
    let is_night = txn.is_night() as u8 as f64;
    let is_round_amount = if (txn.amount % 100.0).abs() < f64::EPSILON {
        1.0
    } else {
        0.0
    };
    let velocity_check = if payer.txn_count_1h > 5 { 1.0 } else { 0.0 };
    let deviation_from_sender_avg = txn.amount / (payer.avg_amount_30d + 1.0);
    let exceeds_recent_max = if payer.max_amount_7d > 0.0 && txn.amount > payer.max_amount_7d {
        1.0
    } else {
        0.0
    };
    let amount_log = (1.0 + txn.amount).ln();
    let hour_sin = (2.0 * std::f64::consts::PI * hour / 24.0).sin();
    let hour_cos = (2.0 * std::f64::consts::PI * hour / 24.0).cos();
    let ratio_30d = txn.amount / (payer.avg_amount_30d + 1.0);
    let risk_profile = if receiver.reputation_score < 0.5 { 1.0 } else { 0.0 };

    FeatureVector::from_column_slice(&[
        txn.amount,
        txn.payment_mode.as_feature_code(),
        txn.receiver_type.as_feature_code(),
        is_new_receiver,
        payer.avg_amount_7d,
        payer.avg_amount_30d,
        payer.max_amount_7d,
        payer.txn_count_1h as f64,
        payer.txn_count_24h as f64,
        payer.days_since_last_txn,
        payer.night_txn_ratio,
        0.0, // location_mismatch: reserved, default 0
        is_night,
        is_round_amount,
        velocity_check,
        deviation_from_sender_avg,
        exceeds_recent_max,
        amount_log,
        hour_sin,
        hour_cos,
        ratio_30d,
        risk_profile,
    ])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MlOutcome {
    pub score: f64,
    pub degraded: bool,
    pub model_version: &'static str,
}

/// A pretrained classifier artifact. No implementation ships in this
/// core — `MlEngine` runs the fallback heuristic whenever `model` is `None`.
pub trait ModelArtifact: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> f64;
    fn version(&self) -> &'static str;
}

pub struct MlEngine {
    model: Option<Box<dyn ModelArtifact>>,
}

impl MlEngine {
    pub fn new(model: Option<Box<dyn ModelArtifact>>) -> Self {
        Self { model }
    }

    pub fn predict(&self, features: &FeatureVector, device_change: bool) -> MlOutcome {
        match &self.model {
            Some(model) => MlOutcome {
                score: model.predict(features).clamp(0.0, 1.0),
                degraded: false,
                model_version: model.version(),
            },
            None => MlOutcome {
                score: fallback_heuristic(features, device_change),
                degraded: true,
                model_version: "fallback",
            },
        }
    }
}

/// Weighted heuristic used whenever no trained model is available.
/// Additions can exceed 1.0 before clamping — clamp happens only after
/// the full summation, never between terms. `risk_profile` (feature 21)
/// doubles as the `receiver.fraudRatio >= 0.5` signal: it's already
/// thresholded at `reputation_score < 0.5`, and reputation is the
/// complement of fraud ratio.
fn fallback_heuristic(features: &FeatureVector, device_change: bool) -> f64 {
    let is_new_receiver = features[3];
    let deviation_from_sender_avg = features[15];
    let velocity_check = features[14];
    let risk_profile = features[21];

    let mut score = 0.0;
    if risk_profile > 0.0 {
        score += 0.35;
    }
    if deviation_from_sender_avg > 10.0 {
        score += 0.40;
    } else if deviation_from_sender_avg > 5.0 {
        score += 0.25;
    } else if deviation_from_sender_avg > 3.0 {
        score += 0.10;
    }
    if is_new_receiver > 0.0 {
        score += 0.15;
    }
    if velocity_check > 0.0 {
        score += 0.25;
    }
    if device_change {
        score += 0.15;
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentMode, ReceiverType, Tier, TransactionStatus};
    use chrono::Utc;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn sample_payer() -> PayerContext {
        PayerContext {
            tier: Tier::Gold,
            trust_score: 85,
            account_age_days: 400.0,
            avg_amount_7d: 700.0,
            avg_amount_30d: 1500.0,
            max_amount_7d: 2000.0,
            txn_count_1h: 1,
            txn_count_24h: 2,
            txn_count_5min: 0,
            days_since_last_txn: 1.0,
            night_txn_ratio: 0.0,
            known_device_set: HashSet::new(),
            last_known_location: None,
            last_known_location_ts: None,
            failed_txn_count_7d: 0,
        }
    }

    fn sample_receiver(is_new: bool) -> ReceiverContext {
        ReceiverContext {
            reputation_score: 0.998,
            total_transactions: 1000,
            fraud_count: 2,
            is_new_for_this_payer: is_new,
            payer_receiver_txn_count: if is_new { 0 } else { 12 },
        }
    }

    fn sample_txn(amount: f64) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            receiver: "swiggy@paytm".to_string(),
            amount,
            timestamp: Utc::now(),
            device_fingerprint: "d1".to_string(),
            location: None,
            payment_mode: PaymentMode::Mobile,
            receiver_type: ReceiverType::Vpa,
            status: TransactionStatus::PendingAssessment,
        }
    }

    #[test]
    fn test_feature_vector_length_and_amount_position() {
        let payer = sample_payer();
        let receiver = sample_receiver(false);
        let txn = sample_txn(600.0);
        let features = engineer_features(&txn, &payer, &receiver);
        assert_eq!(features.len(), FEATURE_COUNT);
        assert_eq!(features[0], 600.0);
    }

    #[test]
    fn test_fallback_no_model_is_degraded() {
        let engine = MlEngine::new(None);
        let features = engineer_features(&sample_txn(600.0), &sample_payer(), &sample_receiver(false));
        let outcome = engine.predict(&features, false);
        assert!(outcome.degraded);
        assert_eq!(outcome.model_version, "fallback");
        assert_eq!(outcome.score, 0.0);
    }

    #[test]
    fn test_fallback_new_receiver_only() {
        let engine = MlEngine::new(None);
        let payer = sample_payer();
        let receiver = sample_receiver(true);
        let txn = sample_txn(600.0);
        let features = engineer_features(&txn, &payer, &receiver);
        let outcome = engine.predict(&features, false);
        assert!((outcome.score - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_device_change_adds_fixed_bump() {
        let engine = MlEngine::new(None);
        let features = engineer_features(&sample_txn(600.0), &sample_payer(), &sample_receiver(false));
        let outcome = engine.predict(&features, true);
        assert!((outcome.score - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_high_deviation_from_sender_avg() {
        let engine = MlEngine::new(None);
        let payer = sample_payer();
        let receiver = sample_receiver(false);
        // amount / (avg_amount_30d + 1) = 16800 / 1501 ~= 11.2 > 10
        let txn = sample_txn(16_800.0);
        let features = engineer_features(&txn, &payer, &receiver);
        let outcome = engine.predict(&features, false);
        assert!((outcome.score - 0.40).abs() < 1e-9);
    }
}
