//! Trust/Reputation Updater: post-execution mutation of payer trust and
//! receiver reputation. All updates for a given (payerId, receiver) pair
//! are serialized through a sharded lock keyed on that pair.

use crate::context::ContextEngine;
use crate::models::{Outcome, PayerId, ReceiverReputation, TransactionId};
use crate::store::Store;
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Sharded per-(payerId, receiver) mutex so concurrent outcomes for the
/// same pair serialize without a single global lock across all payers.
pub struct TrustUpdater {
    store: Store,
    context: Arc<ContextEngine>,
    locks: Mutex<HashMap<(PayerId, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl TrustUpdater {
    pub fn new(store: Store, context: Arc<ContextEngine>) -> Self {
        Self {
            store,
            context,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, payer_id: PayerId, receiver: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry((payer_id, receiver.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Applies an outcome's trust/reputation deltas exactly once per
    /// `transaction_id` — a replayed report for the same transaction is a
    /// no-op rather than double-counting the delta.
    pub async fn apply_outcome(
        &self,
        transaction_id: TransactionId,
        payer_id: PayerId,
        receiver: &str,
        outcome: Outcome,
    ) -> Result<()> {
        let pair_lock = self.lock_for(payer_id, receiver);
        let _guard = pair_lock.lock().await;

        let store = self.store.clone();
        let receiver_owned = receiver.to_string();
        let first_time = tokio::task::spawn_blocking(move || {
            if !store.mark_outcome_applied(transaction_id)? {
                return anyhow::Ok(false);
            }
            apply_trust_delta(&store, payer_id, outcome)?;
            apply_reputation_delta(&store, &receiver_owned, outcome)?;
            anyhow::Ok(true)
        })
        .await??;

        if first_time {
            self.context.invalidate_payer(payer_id);
            self.context.invalidate_receiver(receiver);
        }
        Ok(())
    }
}

fn apply_trust_delta(store: &Store, payer_id: PayerId, outcome: Outcome) -> Result<()> {
    let (trust_score, devices) = store
        .get_payer_trust_and_devices(payer_id)?
        .unwrap_or((0, Default::default()));
    let new_score = (trust_score + outcome.trust_delta()).clamp(0, 100);
    store.update_trust_score(payer_id, new_score)?;
    let _ = devices;
    Ok(())
}

fn apply_reputation_delta(store: &Store, receiver: &str, outcome: Outcome) -> Result<()> {
    let mut rep = store
        .get_receiver_reputation(receiver)?
        .unwrap_or_else(|| ReceiverReputation {
            receiver: receiver.to_string(),
            total_transactions: 0,
            fraud_count: 0,
            chargeback_count: 0,
            successful_transactions: 0,
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        });

    rep.total_transactions += 1;
    match outcome {
        Outcome::Success | Outcome::KycVerified => rep.successful_transactions += 1,
        Outcome::FraudReported => rep.fraud_count += 1,
        Outcome::Chargeback => rep.chargeback_count += 1,
        Outcome::Failed | Outcome::OtpFailed => {}
    }
    rep.last_updated = Utc::now();

    store.upsert_receiver_reputation(&rep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::config::AppConfig;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_apply_outcome_updates_trust_and_reputation() {
        let store = Store::open_in_memory().unwrap();
        let payer_id = Uuid::new_v4();
        store
            .upsert_payer(payer_id, 50, &Default::default(), Utc::now())
            .unwrap();

        let cache = InMemoryCache::new().into_shared();
        let context = Arc::new(ContextEngine::new(store.clone(), cache, AppConfig::default()));
        let updater = TrustUpdater::new(store.clone(), context);

        updater
            .apply_outcome(Uuid::new_v4(), payer_id, "swiggy@paytm", Outcome::Success)
            .await
            .unwrap();

        let (trust, _) = store.get_payer_trust_and_devices(payer_id).unwrap().unwrap();
        assert_eq!(trust, 51);

        let rep = store.get_receiver_reputation("swiggy@paytm").unwrap().unwrap();
        assert_eq!(rep.total_transactions, 1);
        assert_eq!(rep.successful_transactions, 1);
    }

    #[tokio::test]
    async fn test_apply_outcome_is_deduped_by_transaction_id() {
        let store = Store::open_in_memory().unwrap();
        let payer_id = Uuid::new_v4();
        store
            .upsert_payer(payer_id, 50, &Default::default(), Utc::now())
            .unwrap();

        let cache = InMemoryCache::new().into_shared();
        let context = Arc::new(ContextEngine::new(store.clone(), cache, AppConfig::default()));
        let updater = TrustUpdater::new(store.clone(), context);
        let transaction_id = Uuid::new_v4();

        for _ in 0..3 {
            updater
                .apply_outcome(transaction_id, payer_id, "swiggy@paytm", Outcome::Success)
                .await
                .unwrap();
        }

        let (trust, _) = store.get_payer_trust_and_devices(payer_id).unwrap().unwrap();
        assert_eq!(trust, 51);

        let rep = store.get_receiver_reputation("swiggy@paytm").unwrap().unwrap();
        assert_eq!(rep.total_transactions, 1);
    }

    #[tokio::test]
    async fn test_trust_score_clamped_to_bounds() {
        let store = Store::open_in_memory().unwrap();
        let payer_id = Uuid::new_v4();
        store
            .upsert_payer(payer_id, 95, &Default::default(), Utc::now())
            .unwrap();

        let cache = InMemoryCache::new().into_shared();
        let context = Arc::new(ContextEngine::new(store.clone(), cache, AppConfig::default()));
        let updater = TrustUpdater::new(store.clone(), context);

        for _ in 0..10 {
            updater
                .apply_outcome(Uuid::new_v4(), payer_id, "swiggy@paytm", Outcome::KycVerified)
                .await
                .unwrap();
        }

        let (trust, _) = store.get_payer_trust_and_devices(payer_id).unwrap().unwrap();
        assert_eq!(trust, 100);
    }
}
