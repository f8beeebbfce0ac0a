//! Rules Engine: deterministic evaluation against a fixed, versioned catalog.

use crate::context::{PayerContext, ReceiverContext};
use crate::models::{Severity, Transaction};
use serde::{Deserialize, Serialize};

pub const RULESET_VERSION: &str = "RULESET_V1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCode {
    VelocitySpike,
    Blacklisted,
    NewReceiverHighAmount,
    AmountAnomaly,
    DeviceChange,
    HighFailedTxn,
    ImpossibleTravel,
    SuspiciousTravel,
}

impl RuleCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCode::VelocitySpike => "VELOCITY_SPIKE",
            RuleCode::Blacklisted => "BLACKLISTED",
            RuleCode::NewReceiverHighAmount => "NEW_RECEIVER_HIGH_AMOUNT",
            RuleCode::AmountAnomaly => "AMOUNT_ANOMALY",
            RuleCode::DeviceChange => "DEVICE_CHANGE",
            RuleCode::HighFailedTxn => "HIGH_FAILED_TXN",
            RuleCode::ImpossibleTravel => "IMPOSSIBLE_TRAVEL",
            RuleCode::SuspiciousTravel => "SUSPICIOUS_TRAVEL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub code: RuleCode,
    pub triggered: bool,
    pub severity: Severity,
    pub score: f64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RulesOutcome {
    pub results: Vec<RuleResult>,
    pub rule_score: f64,
    pub flags: Vec<String>,
    pub hard_block: bool,
}

pub struct RulesEngine {
    geo: crate::config::GeoConfig,
}

impl RulesEngine {
    pub fn new(geo: crate::config::GeoConfig) -> Self {
        Self { geo }
    }

    pub fn evaluate(
        &self,
        txn: &Transaction,
        payer: &PayerContext,
        receiver: &ReceiverContext,
    ) -> RulesOutcome {
        let mut results = Vec::new();
        let mut flags = Vec::new();
        let mut score = 0.0_f64;
        let mut hard_block = false;

        // BLACKLISTED — evaluated first since it short-circuits everything downstream.
        let fraud_ratio = if receiver.total_transactions > 0 {
            receiver.fraud_count as f64 / receiver.total_transactions as f64
        } else {
            0.0
        };
        let blacklisted = receiver.fraud_count >= 7
            && receiver.total_transactions >= 10
            && fraud_ratio > 0.70;
        if blacklisted {
            hard_block = true;
            flags.push(RuleCode::Blacklisted.as_str().to_string());
            results.push(RuleResult {
                code: RuleCode::Blacklisted,
                triggered: true,
                severity: Severity::Critical,
                score: 1.0,
                message: "Receiver on fraud blacklist".to_string(),
            });
            return RulesOutcome {
                results,
                rule_score: 1.0,
                flags,
                hard_block: true,
            };
        }
        results.push(not_triggered(RuleCode::Blacklisted));

        // VELOCITY_SPIKE
        let velocity_triggered = (payer.days_since_last_txn > 7.0 && payer.txn_count_5min >= 3)
            || payer.txn_count_5min >= 5
            || payer.txn_count_1h >= 15;
        if velocity_triggered {
            let bump = if payer.txn_count_1h >= 15 { 0.35 } else { 0.25 };
            score += bump;
            flags.push(RuleCode::VelocitySpike.as_str().to_string());
            results.push(RuleResult {
                code: RuleCode::VelocitySpike,
                triggered: true,
                severity: Severity::High,
                score: bump,
                message: "Unusual transaction velocity".to_string(),
            });
        } else {
            results.push(not_triggered(RuleCode::VelocitySpike));
        }

        // NEW_RECEIVER_HIGH_AMOUNT
        let new_receiver_high = receiver.is_new_for_this_payer
            && txn.amount > 3.0 * payer.avg_amount_30d;
        if new_receiver_high {
            score += 0.30;
            flags.push(RuleCode::NewReceiverHighAmount.as_str().to_string());
            results.push(RuleResult {
                code: RuleCode::NewReceiverHighAmount,
                triggered: true,
                severity: Severity::Medium,
                score: 0.30,
                message: "Large payment to a receiver never used before".to_string(),
            });
        } else {
            results.push(not_triggered(RuleCode::NewReceiverHighAmount));
        }

        // AMOUNT_ANOMALY — additive with the rule above if both apply.
        let over_30d = txn.amount > 5.0 * payer.avg_amount_30d;
        let over_7d_max = payer.max_amount_7d > 0.0 && txn.amount > 1.5 * payer.max_amount_7d;
        if over_30d || over_7d_max {
            let bump = if over_30d && over_7d_max {
                0.25
            } else if over_30d {
                0.20
            } else {
                0.10
            };
            score += bump;
            flags.push(RuleCode::AmountAnomaly.as_str().to_string());
            results.push(RuleResult {
                code: RuleCode::AmountAnomaly,
                triggered: true,
                severity: Severity::Medium,
                score: bump,
                message: "Amount far exceeds payer's historical pattern".to_string(),
            });
        } else {
            results.push(not_triggered(RuleCode::AmountAnomaly));
        }

        // DEVICE_CHANGE — an empty known-device set does not count as a change.
        let device_change =
            !payer.known_device_set.is_empty() && !payer.known_device_set.contains(&txn.device_fingerprint);
        if device_change {
            score += 0.15;
            flags.push(RuleCode::DeviceChange.as_str().to_string());
            results.push(RuleResult {
                code: RuleCode::DeviceChange,
                triggered: true,
                severity: Severity::Medium,
                score: 0.15,
                message: "Payment from an unrecognized device".to_string(),
            });
        } else {
            results.push(not_triggered(RuleCode::DeviceChange));
        }

        // HIGH_FAILED_TXN
        if payer.failed_txn_count_7d >= 5 {
            score += 0.20;
            flags.push(RuleCode::HighFailedTxn.as_str().to_string());
            results.push(RuleResult {
                code: RuleCode::HighFailedTxn,
                triggered: true,
                severity: Severity::Medium,
                score: 0.20,
                message: "Repeated failed transactions in the last 7 days".to_string(),
            });
        } else if payer.failed_txn_count_7d >= 3 {
            score += 0.10;
            flags.push(RuleCode::HighFailedTxn.as_str().to_string());
            results.push(RuleResult {
                code: RuleCode::HighFailedTxn,
                triggered: true,
                severity: Severity::Low,
                score: 0.10,
                message: "Several failed transactions in the last 7 days".to_string(),
            });
        } else {
            results.push(not_triggered(RuleCode::HighFailedTxn));
        }

        // IMPOSSIBLE_TRAVEL / SUSPICIOUS_TRAVEL — both optional on missing geolocation.
        if let (Some(current), Some(last), Some(last_ts)) = (
            &txn.location,
            &payer.last_known_location,
            payer.last_known_location_ts,
        ) {
            let distance_km = haversine_km(current, last);
            let elapsed_hours = (txn.timestamp - last_ts).num_seconds() as f64 / 3600.0;
            if elapsed_hours > 0.0 {
                let speed_kmh = distance_km / elapsed_hours;
                if speed_kmh > self.geo.supersonic_kmh {
                    let bump = 0.45;
                    score += bump;
                    flags.push(RuleCode::ImpossibleTravel.as_str().to_string());
                    results.push(RuleResult {
                        code: RuleCode::ImpossibleTravel,
                        triggered: true,
                        severity: Severity::Critical,
                        score: bump,
                        message: "Travel speed between consecutive locations is physically impossible"
                            .to_string(),
                    });
                    results.push(not_triggered(RuleCode::SuspiciousTravel));
                } else if speed_kmh > self.geo.suspicious_kmh {
                    let bump = 0.20;
                    score += bump;
                    flags.push(RuleCode::SuspiciousTravel.as_str().to_string());
                    results.push(RuleResult {
                        code: RuleCode::SuspiciousTravel,
                        triggered: true,
                        severity: Severity::High,
                        score: bump,
                        message: "Travel speed between consecutive locations is unusually high"
                            .to_string(),
                    });
                    results.push(not_triggered(RuleCode::ImpossibleTravel));
                } else {
                    results.push(not_triggered(RuleCode::ImpossibleTravel));
                    results.push(not_triggered(RuleCode::SuspiciousTravel));
                }
            } else {
                results.push(not_triggered(RuleCode::ImpossibleTravel));
                results.push(not_triggered(RuleCode::SuspiciousTravel));
            }
        } else {
            results.push(not_triggered(RuleCode::ImpossibleTravel));
            results.push(not_triggered(RuleCode::SuspiciousTravel));
        }

        RulesOutcome {
            results,
            rule_score: score.clamp(0.0, 1.0),
            flags,
            hard_block,
        }
    }
}

fn not_triggered(code: RuleCode) -> RuleResult {
    RuleResult {
        code,
        triggered: false,
        severity: Severity::Low,
        score: 0.0,
        message: String::new(),
    }
}

/// Great-circle distance in kilometers via the haversine formula.
fn haversine_km(a: &crate::models::GeoPoint, b: &crate::models::GeoPoint) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoConfig;
    use crate::models::{GeoPoint, PaymentMode, ReceiverType, Tier, TransactionStatus};
    use chrono::Utc;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn base_payer_context() -> PayerContext {
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
            known_device_set: {
                let mut s = HashSet::new();
                s.insert("d1".to_string());
                s
            },
            last_known_location: None,
            last_known_location_ts: None,
            failed_txn_count_7d: 0,
        }
    }

    fn base_receiver_context() -> ReceiverContext {
        ReceiverContext {
            reputation_score: 0.998,
            total_transactions: 1000,
            fraud_count: 2,
            is_new_for_this_payer: false,
            payer_receiver_txn_count: 12,
        }
    }

    fn base_txn(amount: f64, device: &str, hour: u32) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            receiver: "swiggy@paytm".to_string(),
            amount,
            timestamp: Utc::now()
                .date_naive()
                .and_hms_opt(hour, 0, 0)
                .unwrap()
                .and_local_timezone(Utc)
                .unwrap(),
            device_fingerprint: device.to_string(),
            location: None,
            payment_mode: PaymentMode::Mobile,
            receiver_type: ReceiverType::Vpa,
            status: TransactionStatus::PendingAssessment,
        }
    }

    #[test]
    fn test_low_scenario_no_flags() {
        let engine = RulesEngine::new(GeoConfig::default());
        let txn = base_txn(600.0, "d1", 19);
        let outcome = engine.evaluate(&txn, &base_payer_context(), &base_receiver_context());
        assert!(outcome.flags.is_empty());
        assert!((outcome.rule_score - 0.0).abs() < 1e-9);
        assert!(!outcome.hard_block);
    }

    #[test]
    fn test_blacklisted_hard_blocks() {
        let engine = RulesEngine::new(GeoConfig::default());
        let txn = base_txn(5000.0, "d1", 12);
        let receiver = ReceiverContext {
            reputation_score: 0.15,
            total_transactions: 20,
            fraud_count: 17,
            is_new_for_this_payer: false,
            payer_receiver_txn_count: 0,
        };
        let outcome = engine.evaluate(&txn, &base_payer_context(), &receiver);
        assert!(outcome.hard_block);
        assert_eq!(outcome.rule_score, 1.0);
        assert!(outcome.flags.contains(&"BLACKLISTED".to_string()));
    }

    #[test]
    fn test_new_receiver_high_amount_strict_greater_than() {
        let engine = RulesEngine::new(GeoConfig::default());
        let payer = base_payer_context();
        let receiver = ReceiverContext {
            is_new_for_this_payer: true,
            ..base_receiver_context()
        };

        let exactly_3x = base_txn(3.0 * payer.avg_amount_30d, "d1", 14);
        let outcome = engine.evaluate(&exactly_3x, &payer, &receiver);
        assert!(!outcome.flags.contains(&"NEW_RECEIVER_HIGH_AMOUNT".to_string()));

        let over_3x = base_txn(3.0 * payer.avg_amount_30d + 1.0, "d1", 14);
        let outcome = engine.evaluate(&over_3x, &payer, &receiver);
        assert!(outcome.flags.contains(&"NEW_RECEIVER_HIGH_AMOUNT".to_string()));
    }

    #[test]
    fn test_device_change_not_triggered_on_empty_known_set() {
        let engine = RulesEngine::new(GeoConfig::default());
        let mut payer = base_payer_context();
        payer.known_device_set.clear();
        let txn = base_txn(600.0, "brand-new-device", 12);
        let outcome = engine.evaluate(&txn, &payer, &base_receiver_context());
        assert!(!outcome.flags.contains(&"DEVICE_CHANGE".to_string()));
    }

    #[test]
    fn test_impossible_travel_bumps_score_without_hard_block() {
        let engine = RulesEngine::new(GeoConfig::default());
        let mut payer = base_payer_context();
        payer.last_known_location = Some(GeoPoint {
            latitude: 13.0827,
            longitude: 80.2707,
        });
        payer.last_known_location_ts = Some(Utc::now() - chrono::Duration::minutes(5));

        let mut txn = base_txn(600.0, "d1", 12);
        txn.location = Some(GeoPoint {
            latitude: 19.0760,
            longitude: 72.8777,
        });
        txn.timestamp = Utc::now();

        let outcome = engine.evaluate(&txn, &payer, &base_receiver_context());
        assert!(!outcome.hard_block);
        assert!(outcome.rule_score >= 0.40 && outcome.rule_score <= 0.50);
        assert!(outcome.flags.contains(&"IMPOSSIBLE_TRAVEL".to_string()));
    }
}
