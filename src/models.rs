//! Core data model: payers, transactions, assessments, reputations, events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type PayerId = Uuid;
pub type TransactionId = Uuid;

/// Coarse bucketing of payer trust, used only for score blending and tier adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

impl Tier {
    /// BRONZE [0,30], SILVER [31,70], GOLD [71,100].
    pub fn from_trust_score(trust_score: i32) -> Self {
        match trust_score {
            0..=30 => Tier::Bronze,
            31..=70 => Tier::Silver,
            _ => Tier::Gold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payer {
    pub id: PayerId,
    pub created_at: DateTime<Utc>,
    pub trust_score: i32,
    pub known_device_set: HashSet<String>,
}

impl Payer {
    pub fn tier(&self) -> Tier {
        Tier::from_trust_score(self.trust_score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    Qr,
    Mobile,
    UpiApp,
}

impl PaymentMode {
    /// Fixed integer encoding used by feature index 2.
    pub fn as_feature_code(&self) -> f64 {
        match self {
            PaymentMode::Qr => 0.0,
            PaymentMode::Mobile => 1.0,
            PaymentMode::UpiApp => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiverType {
    Phone,
    Vpa,
}

impl ReceiverType {
    /// Fixed integer encoding used by feature index 3.
    pub fn as_feature_code(&self) -> f64 {
        match self {
            ReceiverType::Phone => 0.0,
            ReceiverType::Vpa => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    PendingAssessment,
    Assessed,
    Executed,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A proposed payment, prior to assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub payer_id: PayerId,
    /// Case-normalized lowercase receiver handle.
    pub receiver: String,
    /// Amount in rupees with 2-decimal fixed-point semantics (paise-scaled internally).
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub device_fingerprint: String,
    pub location: Option<GeoPoint>,
    pub payment_mode: PaymentMode,
    pub receiver_type: ReceiverType,
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn hour(&self) -> u32 {
        use chrono::Timelike;
        self.timestamp.hour()
    }

    pub fn is_night(&self) -> bool {
        let h = self.hour();
        h >= 23 || h <= 5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Low,
    Moderate,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Allow,
    Warn,
    OtpRequired,
    Block,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Subscores {
    pub behavior: f64,
    pub amount: f64,
    pub receiver: f64,
    pub ml: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Immutable, 1:1 with a Transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub transaction_id: TransactionId,
    pub final_score: f64,
    pub level: Level,
    pub action: Action,
    pub subscores: Subscores,
    pub flags: Vec<String>,
    pub factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub processing_ms: u64,
    pub model_version: String,
    pub ruleset_version: String,
}

/// Keyed by normalized receiver handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverReputation {
    pub receiver: String,
    pub total_transactions: u64,
    pub fraud_count: u64,
    pub chargeback_count: u64,
    pub successful_transactions: u64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ReceiverReputation {
    /// `1 - fraudCount/totalTransactions` when `totalTransactions > 0`, else the neutral prior 0.5.
    pub fn reputation_score(&self) -> f64 {
        if self.total_transactions == 0 {
            0.5
        } else {
            1.0 - (self.fraud_count as f64 / self.total_transactions as f64)
        }
    }

    pub fn fraud_ratio(&self) -> f64 {
        if self.total_transactions == 0 {
            0.0
        } else {
            self.fraud_count as f64 / self.total_transactions as f64
        }
    }
}

/// Append-only audit record, never mutated after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub transaction_id: TransactionId,
    pub payer_id: PayerId,
    pub triggered_rules: Vec<String>,
    pub rule_score: f64,
    pub ml_score: f64,
    pub final_score: f64,
    pub action: Action,
    pub feature_vector: Vec<f64>,
    pub assessed_at: DateTime<Utc>,
    pub ml_degraded: bool,
}

/// Post-execution outcomes consumed by the Trust Updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failed,
    FraudReported,
    Chargeback,
    OtpFailed,
    KycVerified,
}

impl Outcome {
    /// Fixed trust-score delta table (§4.6).
    pub fn trust_delta(&self) -> i32 {
        match self {
            Outcome::Success => 1,
            Outcome::Failed => 0,
            Outcome::FraudReported => -10,
            Outcome::Chargeback => -10,
            Outcome::OtpFailed => -1,
            Outcome::KycVerified => 5,
        }
    }
}
