//! Persistent store: the durable home for payers, transactctions, risk
//! events, and receiver reputation.
//!
//! Owns all entity lifetimes. Uses a single SQLite connection behind a
//! mutex (WAL mode lets readers proceed while a writer holds the lock)
//! rather than a true connection pool — sufficient for the throughput this
//! core targets and simple enough to reason about under the write-then-audit
//! atomicity requirement in step 5 of the orchestration contract.

mod schema;

use crate::context::PayerContext;
use crate::models::{
    Action, PayerId, ReceiverReputation, RiskAssessment, RiskEvent, Transaction,
    TransactionId, TransactionStatus,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open store")?;
        conn.execute_batch(schema::SCHEMA_SQL)
            .context("failed to apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        conn.execute_batch(schema::SCHEMA_SQL)
            .context("failed to apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // -- Payers --------------------------------------------------------

    pub fn upsert_payer(
        &self,
        payer_id: PayerId,
        trust_score: i32,
        known_device_set: &HashSet<String>,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let devices = serde_json::to_string(known_device_set)?;
        conn.prepare_cached(
            "INSERT INTO payers (id, created_at, trust_score, known_device_set)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                trust_score = excluded.trust_score,
                known_device_set = excluded.known_device_set",
        )?
        .execute(params![
            payer_id.to_string(),
            created_at.to_rfc3339(),
            trust_score,
            devices
        ])?;
        Ok(())
    }

    pub fn get_payer_trust_and_devices(
        &self,
        payer_id: PayerId,
    ) -> Result<Option<(i32, HashSet<String>)>> {
        let conn = self.conn.lock();
        let row: Option<(i32, String)> = conn
            .prepare_cached("SELECT trust_score, known_device_set FROM payers WHERE id = ?1")?
            .query_row(params![payer_id.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        match row {
            Some((trust_score, devices_json)) => {
                let devices: HashSet<String> =
                    serde_json::from_str(&devices_json).unwrap_or_default();
                Ok(Some((trust_score, devices)))
            }
            None => Ok(None),
        }
    }

    pub fn update_trust_score(&self, payer_id: PayerId, new_trust_score: i32) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("UPDATE payers SET trust_score = ?1 WHERE id = ?2")?
            .execute(params![new_trust_score, payer_id.to_string()])?;
        Ok(())
    }

    pub fn add_known_device(&self, payer_id: PayerId, device: &str) -> Result<()> {
        let conn = self.conn.lock();
        let existing: Option<String> = conn
            .prepare_cached("SELECT known_device_set FROM payers WHERE id = ?1")?
            .query_row(params![payer_id.to_string()], |row| row.get(0))
            .optional()?;

        let mut devices: HashSet<String> = existing
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default();
        devices.insert(device.to_string());

        conn.prepare_cached("UPDATE payers SET known_device_set = ?1 WHERE id = ?2")?
            .execute(params![
                serde_json::to_string(&devices)?,
                payer_id.to_string()
            ])?;
        Ok(())
    }

    /// Single aggregated query producing every `PayerContext` field that
    /// depends on transaction history. Tier/trustScore/knownDeviceSet come
    /// from the payer row fetched alongside it by the context engine.
    pub fn get_payer_aggregates(&self, payer_id: PayerId, now: DateTime<Utc>) -> Result<PayerAggregates> {
        let conn = self.conn.lock();
        let payer_id_str = payer_id.to_string();

        let row = conn.prepare_cached(
            "SELECT
                COALESCE(AVG(CASE WHEN created_at >= ?2 THEN amount_paise END), 0) / 100.0,
                COALESCE(AVG(CASE WHEN created_at >= ?3 THEN amount_paise END), 0) / 100.0,
                COALESCE(MAX(CASE WHEN created_at >= ?2 THEN amount_paise END), 0) / 100.0,
                COUNT(CASE WHEN created_at >= ?4 THEN 1 END),
                COUNT(CASE WHEN created_at >= ?5 THEN 1 END),
                COUNT(CASE WHEN created_at >= ?6 THEN 1 END),
                MAX(created_at),
                COUNT(CASE WHEN failed = 1 AND created_at >= ?2 THEN 1 END),
                COUNT(CASE WHEN created_at >= ?3 AND (CAST(strftime('%H', created_at) AS INTEGER) >= 23 OR CAST(strftime('%H', created_at) AS INTEGER) <= 5) THEN 1 END),
                COUNT(CASE WHEN created_at >= ?3 THEN 1 END)
             FROM transactions WHERE payer_id = ?1",
        )?;

        let week_ago = (now - chrono::Duration::days(7)).to_rfc3339();
        let month_ago = (now - chrono::Duration::days(30)).to_rfc3339();
        let hour_ago = (now - chrono::Duration::hours(1)).to_rfc3339();
        let day_ago = (now - chrono::Duration::hours(24)).to_rfc3339();
        let five_min_ago = (now - chrono::Duration::minutes(5)).to_rfc3339();

        let result = row.query_row(
            params![
                payer_id_str,
                week_ago,
                month_ago,
                hour_ago,
                day_ago,
                five_min_ago
            ],
            |r| {
                Ok(PayerAggregates {
                    avg_amount_7d: r.get(0)?,
                    avg_amount_30d: r.get(1)?,
                    max_amount_7d: r.get(2)?,
                    txn_count_1h: r.get::<_, i64>(3)? as u64,
                    txn_count_24h: r.get::<_, i64>(4)? as u64,
                    txn_count_5min: r.get::<_, i64>(5)? as u64,
                    last_txn_at: r.get::<_, Option<String>>(6)?,
                    failed_txn_count_7d: r.get::<_, i64>(7)? as u64,
                    night_txn_count_30d: r.get::<_, i64>(8)? as u64,
                    total_txn_count_30d: r.get::<_, i64>(9)? as u64,
                })
            },
        )?;

        Ok(result)
    }

    /// Most recent transaction that carried a location, if any.
    pub fn get_last_known_location(
        &self,
        payer_id: PayerId,
    ) -> Result<Option<(crate::models::GeoPoint, DateTime<Utc>)>> {
        let conn = self.conn.lock();
        let row: Option<(f64, f64, String)> = conn
            .prepare_cached(
                "SELECT latitude, longitude, created_at FROM transactions
                 WHERE payer_id = ?1 AND latitude IS NOT NULL AND longitude IS NOT NULL
                 ORDER BY created_at DESC LIMIT 1",
            )?
            .query_row(params![payer_id.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;

        Ok(row.map(|(latitude, longitude, ts)| {
            (crate::models::GeoPoint { latitude, longitude }, parse_ts(ts))
        }))
    }

    // -- Receiver reputation -------------------------------------------

    pub fn get_receiver_reputation(&self, receiver: &str) -> Result<Option<ReceiverReputation>> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "SELECT receiver, total_transactions, fraud_count, chargeback_count,
                    successful_transactions, first_seen, last_updated
             FROM receiver_reputation WHERE receiver = ?1",
        )?
        .query_row(params![receiver], row_to_reputation)
        .optional()
        .context("failed to query receiver reputation")
    }

    pub fn upsert_receiver_reputation(&self, rep: &ReceiverReputation) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO receiver_reputation
                (receiver, total_transactions, fraud_count, chargeback_count,
                 successful_transactions, first_seen, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(receiver) DO UPDATE SET
                total_transactions = excluded.total_transactions,
                fraud_count = excluded.fraud_count,
                chargeback_count = excluded.chargeback_count,
                successful_transactions = excluded.successful_transactions,
                last_updated = excluded.last_updated",
        )?
        .execute(params![
            rep.receiver,
            rep.total_transactions as i64,
            rep.fraud_count as i64,
            rep.chargeback_count as i64,
            rep.successful_transactions as i64,
            rep.first_seen.to_rfc3339(),
            rep.last_updated.to_rfc3339(),
        ])?;
        Ok(())
    }

    /// Payer-specific receiver facts that are never cached globally.
    pub fn get_payer_receiver_facts(&self, payer_id: PayerId, receiver: &str) -> Result<(bool, u64)> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .prepare_cached(
                "SELECT COUNT(*) FROM transactions WHERE payer_id = ?1 AND receiver = ?2",
            )?
            .query_row(params![payer_id.to_string(), receiver], |r| r.get(0))?;
        Ok((count == 0, count as u64))
    }

    // -- Transactions + risk events (atomic write) ----------------------

    /// Inserts Transaction (status ASSESSED) and RiskEvent in one store
    /// transaction. The transaction row must never exist without its event.
    pub fn persist_assessment(&self, txn: &Transaction, event: &RiskEvent) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        insert_transaction(&tx, txn)?;
        insert_risk_event(&tx, event)?;

        tx.commit().context("failed to commit assessment write")?;
        Ok(())
    }

    pub fn get_risk_event(&self, transaction_id: TransactionId) -> Result<Option<RiskEvent>> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "SELECT transaction_id, payer_id, triggered_rules, rule_score, ml_score,
                    final_score, action, feature_vector, assessed_at, ml_degraded
             FROM risk_events WHERE transaction_id = ?1",
        )?
        .query_row(params![transaction_id.to_string()], row_to_risk_event)
        .optional()
        .context("failed to query risk event")
    }

    // -- Retry queue -----------------------------------------------------

    pub fn enqueue_retry(&self, txn: &Transaction, event: &RiskEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO retry_queue (transaction_id, transaction_json, risk_event_json, enqueued_at, attempts)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(transaction_id) DO NOTHING",
        )?
        .execute(params![
            event.transaction_id.to_string(),
            serde_json::to_string(txn)?,
            serde_json::to_string(event)?,
            Utc::now().to_rfc3339(),
        ])?;
        Ok(())
    }

    pub fn retry_queue_depth(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM retry_queue", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Drains up to `limit` queued rows so the caller can attempt to
    /// persist them idempotently (keyed by transaction_id).
    pub fn drain_retry_queue(&self, limit: u32) -> Result<Vec<(Transaction, RiskEvent)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT transaction_json, risk_event_json FROM retry_queue ORDER BY enqueued_at LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let txn_json: String = row.get(0)?;
            let event_json: String = row.get(1)?;
            Ok((txn_json, event_json))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (txn_json, event_json) = row?;
            let txn: Transaction = serde_json::from_str(&txn_json)?;
            let event: RiskEvent = serde_json::from_str(&event_json)?;
            out.push((txn, event));
        }
        Ok(out)
    }

    pub fn remove_from_retry_queue(&self, transaction_id: TransactionId) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("DELETE FROM retry_queue WHERE transaction_id = ?1")?
            .execute(params![transaction_id.to_string()])?;
        Ok(())
    }

    // -- Idempotency -------------------------------------------------------

    pub fn get_idempotent_response(&self, key: &str) -> Result<Option<RiskAssessment>> {
        let conn = self.conn.lock();
        let row: Option<String> = conn
            .prepare_cached(
                "SELECT response_json FROM idempotency_keys
                 WHERE idempotency_key = ?1 AND created_at >= ?2",
            )?
            .query_row(
                params![key, (Utc::now() - chrono::Duration::hours(24)).to_rfc3339()],
                |r| r.get(0),
            )
            .optional()?;

        Ok(match row {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    /// Records `transaction_id` as applied, returning `true` the first time
    /// it's seen and `false` on every replay so the caller can skip the
    /// trust/reputation mutation.
    pub fn mark_outcome_applied(&self, transaction_id: TransactionId) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn
            .prepare_cached(
                "INSERT INTO applied_outcomes (transaction_id, applied_at)
                 VALUES (?1, ?2)
                 ON CONFLICT(transaction_id) DO NOTHING",
            )?
            .execute(params![transaction_id.to_string(), Utc::now().to_rfc3339()])?;
        Ok(inserted == 1)
    }

    pub fn store_idempotent_response(&self, key: &str, assessment: &RiskAssessment) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO idempotency_keys (idempotency_key, response_json, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(idempotency_key) DO NOTHING",
        )?
        .execute(params![
            key,
            serde_json::to_string(assessment)?,
            Utc::now().to_rfc3339()
        ])?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PayerAggregates {
    pub avg_amount_7d: f64,
    pub avg_amount_30d: f64,
    pub max_amount_7d: f64,
    pub txn_count_1h: u64,
    pub txn_count_24h: u64,
    pub txn_count_5min: u64,
    pub last_txn_at: Option<String>,
    pub failed_txn_count_7d: u64,
    pub night_txn_count_30d: u64,
    pub total_txn_count_30d: u64,
}

impl PayerAggregates {
    pub fn days_since_last_txn(&self, now: DateTime<Utc>) -> f64 {
        match &self.last_txn_at {
            Some(ts) => match DateTime::parse_from_rfc3339(ts) {
                Ok(t) => (now - t.with_timezone(&Utc)).num_seconds() as f64 / 86_400.0,
                Err(_) => f64::INFINITY,
            },
            None => f64::INFINITY,
        }
    }

    pub fn night_txn_ratio(&self) -> f64 {
        if self.total_txn_count_30d == 0 {
            0.0
        } else {
            self.night_txn_count_30d as f64 / self.total_txn_count_30d as f64
        }
    }
}

fn insert_transaction(tx: &rusqlite::Transaction<'_>, txn: &Transaction) -> Result<()> {
    tx.execute(
        "INSERT INTO transactions
            (id, payer_id, receiver, amount_paise, created_at, device_fingerprint,
             latitude, longitude, payment_mode, receiver_type, status, failed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)",
        params![
            txn.id.to_string(),
            txn.payer_id.to_string(),
            txn.receiver,
            (txn.amount * 100.0).round() as i64,
            txn.timestamp.to_rfc3339(),
            txn.device_fingerprint,
            txn.location.as_ref().map(|l| l.latitude),
            txn.location.as_ref().map(|l| l.longitude),
            format!("{:?}", txn.payment_mode),
            format!("{:?}", txn.receiver_type),
            format!("{:?}", TransactionStatus::Assessed),
        ],
    )?;
    Ok(())
}

fn insert_risk_event(tx: &rusqlite::Transaction<'_>, event: &RiskEvent) -> Result<()> {
    tx.execute(
        "INSERT INTO risk_events
            (transaction_id, payer_id, triggered_rules, rule_score, ml_score,
             final_score, action, feature_vector, assessed_at, ml_degraded)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            event.transaction_id.to_string(),
            event.payer_id.to_string(),
            serde_json::to_string(&event.triggered_rules)?,
            event.rule_score,
            event.ml_score,
            event.final_score,
            format!("{:?}", event.action),
            serde_json::to_string(&event.feature_vector)?,
            event.assessed_at.to_rfc3339(),
            event.ml_degraded as i64,
        ],
    )?;
    Ok(())
}

fn row_to_reputation(row: &rusqlite::Row) -> rusqlite::Result<ReceiverReputation> {
    Ok(ReceiverReputation {
        receiver: row.get(0)?,
        total_transactions: row.get::<_, i64>(1)? as u64,
        fraud_count: row.get::<_, i64>(2)? as u64,
        chargeback_count: row.get::<_, i64>(3)? as u64,
        successful_transactions: row.get::<_, i64>(4)? as u64,
        first_seen: parse_ts(row.get::<_, String>(5)?),
        last_updated: parse_ts(row.get::<_, String>(6)?),
    })
}

fn row_to_risk_event(row: &rusqlite::Row) -> rusqlite::Result<RiskEvent> {
    let triggered_rules_json: String = row.get(2)?;
    let action_str: String = row.get(6)?;
    let feature_vector_json: String = row.get(7)?;

    Ok(RiskEvent {
        transaction_id: row
            .get::<_, String>(0)?
            .parse()
            .unwrap_or_else(|_| uuid::Uuid::nil()),
        payer_id: row
            .get::<_, String>(1)?
            .parse()
            .unwrap_or_else(|_| uuid::Uuid::nil()),
        triggered_rules: serde_json::from_str(&triggered_rules_json).unwrap_or_default(),
        rule_score: row.get(3)?,
        ml_score: row.get(4)?,
        final_score: row.get(5)?,
        action: parse_action(&action_str),
        feature_vector: serde_json::from_str(&feature_vector_json).unwrap_or_default(),
        assessed_at: parse_ts(row.get::<_, String>(8)?),
        ml_degraded: row.get::<_, i64>(9)? != 0,
    })
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_action(s: &str) -> Action {
    match s {
        "Allow" => Action::Allow,
        "Warn" => Action::Warn,
        "OtpRequired" => Action::OtpRequired,
        _ => Action::Block,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeoPoint, PaymentMode, ReceiverType};
    use uuid::Uuid;

    fn sample_transaction(payer_id: PayerId) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            payer_id,
            receiver: "swiggy@paytm".to_string(),
            amount: 600.0,
            timestamp: Utc::now(),
            device_fingerprint: "d1".to_string(),
            location: Some(GeoPoint {
                latitude: 13.08,
                longitude: 80.27,
            }),
            payment_mode: PaymentMode::Mobile,
            receiver_type: ReceiverType::Vpa,
            status: TransactionStatus::Assessed,
        }
    }

    fn sample_event(txn: &Transaction) -> RiskEvent {
        RiskEvent {
            transaction_id: txn.id,
            payer_id: txn.payer_id,
            triggered_rules: vec![],
            rule_score: 0.0,
            ml_score: 0.0,
            final_score: 0.0,
            action: Action::Allow,
            feature_vector: vec![0.0; 22],
            assessed_at: Utc::now(),
            ml_degraded: false,
        }
    }

    #[test]
    fn test_persist_assessment_atomic_and_readable() {
        let store = Store::open_in_memory().unwrap();
        let payer_id = Uuid::new_v4();
        let txn = sample_transaction(payer_id);
        let event = sample_event(&txn);

        store.persist_assessment(&txn, &event).unwrap();

        let fetched = store.get_risk_event(txn.id).unwrap().unwrap();
        assert_eq!(fetched.transaction_id, txn.id);
    }

    #[test]
    fn test_payer_upsert_and_fetch() {
        let store = Store::open_in_memory().unwrap();
        let payer_id = Uuid::new_v4();
        let mut devices = HashSet::new();
        devices.insert("d1".to_string());

        store
            .upsert_payer(payer_id, 45, &devices, Utc::now())
            .unwrap();

        let (trust, devs) = store.get_payer_trust_and_devices(payer_id).unwrap().unwrap();
        assert_eq!(trust, 45);
        assert!(devs.contains("d1"));
    }

    #[test]
    fn test_receiver_reputation_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let rep = ReceiverReputation {
            receiver: "scam@paytm".to_string(),
            total_transactions: 20,
            fraud_count: 17,
            chargeback_count: 1,
            successful_transactions: 2,
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        };
        store.upsert_receiver_reputation(&rep).unwrap();

        let fetched = store.get_receiver_reputation("scam@paytm").unwrap().unwrap();
        assert_eq!(fetched.total_transactions, 20);
        assert_eq!(fetched.fraud_count, 17);
    }

    #[test]
    fn test_retry_queue_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let payer_id = Uuid::new_v4();
        let txn = sample_transaction(payer_id);
        let event = sample_event(&txn);

        store.enqueue_retry(&txn, &event).unwrap();
        assert_eq!(store.retry_queue_depth().unwrap(), 1);

        let drained = store.drain_retry_queue(10).unwrap();
        assert_eq!(drained.len(), 1);

        store.remove_from_retry_queue(txn.id).unwrap();
        assert_eq!(store.retry_queue_depth().unwrap(), 0);
    }

    #[test]
    fn test_idempotency_store_and_replay() {
        let store = Store::open_in_memory().unwrap();
        let assessment = RiskAssessment {
            transaction_id: Uuid::new_v4(),
            final_score: 0.05,
            level: crate::models::Level::Low,
            action: Action::Allow,
            subscores: crate::models::Subscores {
                behavior: 0.0,
                amount: 0.0,
                receiver: 0.0,
                ml: 0.05,
            },
            flags: vec![],
            factors: vec![],
            recommendations: vec![],
            processing_ms: 10,
            model_version: "fallback".to_string(),
            ruleset_version: "RULESET_V1".to_string(),
        };

        store
            .store_idempotent_response("idem-key-1", &assessment)
            .unwrap();

        let replayed = store.get_idempotent_response("idem-key-1").unwrap();
        assert!(replayed.is_some());
        assert_eq!(replayed.unwrap().transaction_id, assessment.transaction_id);

        assert!(store.get_idempotent_response("missing-key").unwrap().is_none());
    }
}
