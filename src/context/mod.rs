//! Context Engine: assembles `PayerContext` and `ReceiverContext` from cache
//! then store, with cache-aside semantics and push-based invalidation.

use crate::cache::Cache;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::{GeoPoint, PayerId};
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayerContext {
    pub tier: crate::models::Tier,
    pub trust_score: i32,
    pub account_age_days: f64,
    pub avg_amount_7d: f64,
    pub avg_amount_30d: f64,
    pub max_amount_7d: f64,
    pub txn_count_1h: u64,
    pub txn_count_24h: u64,
    pub txn_count_5min: u64,
    pub days_since_last_txn: f64,
    pub night_txn_ratio: f64,
    pub known_device_set: std::collections::HashSet<String>,
    pub last_known_location: Option<GeoPoint>,
    pub last_known_location_ts: Option<DateTime<Utc>>,
    pub failed_txn_count_7d: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverContext {
    pub reputation_score: f64,
    pub total_transactions: u64,
    pub fraud_count: u64,
    pub is_new_for_this_payer: bool,
    pub payer_receiver_txn_count: u64,
}

pub struct ContextEngine {
    store: Store,
    cache: Arc<dyn Cache>,
    config: AppConfig,
}

impl ContextEngine {
    pub fn new(store: Store, cache: Arc<dyn Cache>, config: AppConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub async fn get_payer_context(&self, payer_id: PayerId) -> AppResult<PayerContext> {
        let cache_key = format!("payer:ctx:{payer_id}");
        let known_device_set = self.get_known_device_set(payer_id).await?;

        if let Some(cached) = self.cache.get::<PayerContext>(&cache_key).await {
            return Ok(PayerContext {
                known_device_set,
                ..cached
            });
        }

        let now = Utc::now();
        let read = tokio::time::timeout(self.config.deadline.store_read(), async {
            let store = self.store.clone();
            tokio::task::spawn_blocking(move || {
                let trust_and_devices = store.get_payer_trust_and_devices(payer_id)?;
                let aggregates = store.get_payer_aggregates(payer_id, now)?;
                let last_location = store.get_last_known_location(payer_id)?;
                anyhow::Ok((trust_and_devices, aggregates, last_location))
            })
            .await
            .map_err(anyhow::Error::from)?
        })
        .await
        .map_err(|_| AppError::StoreReadUnavailable)?
        .map_err(AppError::from)?;

        let (trust_and_devices, aggregates, last_location) = read;
        let (last_known_location, last_known_location_ts) = match last_location {
            Some((point, ts)) => (Some(point), Some(ts)),
            None => (None, None),
        };
        let (trust_score, _) = trust_and_devices.unwrap_or((0, Default::default()));

        let ctx = PayerContext {
            tier: crate::models::Tier::from_trust_score(trust_score),
            trust_score,
            account_age_days: 0.0,
            avg_amount_7d: aggregates.avg_amount_7d,
            avg_amount_30d: aggregates.avg_amount_30d,
            max_amount_7d: aggregates.max_amount_7d,
            txn_count_1h: aggregates.txn_count_1h,
            txn_count_24h: aggregates.txn_count_24h,
            txn_count_5min: aggregates.txn_count_5min,
            days_since_last_txn: aggregates.days_since_last_txn(now),
            night_txn_ratio: aggregates.night_txn_ratio(),
            known_device_set,
            last_known_location,
            last_known_location_ts,
            failed_txn_count_7d: aggregates.failed_txn_count_7d,
        };

        self.cache
            .set(&cache_key, &ctx, Duration::from_secs(self.config.cache_ttl.payer_secs))
            .await;

        Ok(ctx)
    }

    /// Known-device membership gates the DEVICE_CHANGE rule directly, so it
    /// rides its own short-TTL key instead of the long-lived payer context
    /// blob — a stale device set would let a hijacked session slip through.
    async fn get_known_device_set(&self, payer_id: PayerId) -> AppResult<std::collections::HashSet<String>> {
        let cache_key = format!("payer:devices:{payer_id}");
        if let Some(cached) = self.cache.get::<std::collections::HashSet<String>>(&cache_key).await {
            return Ok(cached);
        }

        let store = self.store.clone();
        let devices = tokio::time::timeout(
            self.config.deadline.store_read(),
            tokio::task::spawn_blocking(move || store.get_payer_trust_and_devices(payer_id)),
        )
        .await
        .map_err(|_| AppError::StoreReadUnavailable)?
        .map_err(anyhow::Error::from)?
        .map_err(AppError::from)?
        .map(|(_, devices)| devices)
        .unwrap_or_default();

        self.cache
            .set(
                &cache_key,
                &devices,
                Duration::from_secs(self.config.cache_ttl.blacklist_secs),
            )
            .await;

        Ok(devices)
    }

    pub async fn get_receiver_context(
        &self,
        payer_id: PayerId,
        receiver: &str,
    ) -> AppResult<ReceiverContext> {
        let cache_key = format!("recv:ctx:{receiver}");

        let reputation_score = if let Some(cached) = self.cache.get::<ReceiverGlobalContext>(&cache_key).await {
            cached.reputation_score
        } else {
            let rep = self.fetch_receiver_reputation(receiver).await?;
            let reputation_score = rep.as_ref().map(|r| r.reputation_score()).unwrap_or(0.5);

            self.cache
                .set(
                    &cache_key,
                    &ReceiverGlobalContext { reputation_score },
                    Duration::from_secs(self.config.cache_ttl.receiver_secs),
                )
                .await;

            reputation_score
        };

        // Blacklist status hinges on fraud_count/total_transactions, so those
        // ride the short blacklist TTL rather than the long receiver-context one.
        let (total_transactions, fraud_count) =
            if let Some(cached) = self.cache.get::<BlacklistFacts>(&format!("recv:blacklist:{receiver}")).await {
                (cached.total_transactions, cached.fraud_count)
            } else {
                let rep = self.fetch_receiver_reputation(receiver).await?;
                let facts = BlacklistFacts {
                    total_transactions: rep.as_ref().map(|r| r.total_transactions).unwrap_or(0),
                    fraud_count: rep.as_ref().map(|r| r.fraud_count).unwrap_or(0),
                };

                self.cache
                    .set(
                        &format!("recv:blacklist:{receiver}"),
                        &facts,
                        Duration::from_secs(self.config.cache_ttl.blacklist_secs),
                    )
                    .await;

                (facts.total_transactions, facts.fraud_count)
            };

        let receiver_owned = receiver.to_string();
        let store = self.store.clone();
        let (is_new, payer_receiver_count) = tokio::time::timeout(
            self.config.deadline.store_read(),
            tokio::task::spawn_blocking(move || {
                store.get_payer_receiver_facts(payer_id, &receiver_owned)
            }),
        )
        .await
        .map_err(|_| AppError::StoreReadUnavailable)?
        .map_err(anyhow::Error::from)?
        .map_err(AppError::from)?;

        Ok(ReceiverContext {
            reputation_score,
            total_transactions,
            fraud_count,
            is_new_for_this_payer: is_new,
            payer_receiver_txn_count: payer_receiver_count,
        })
    }

    async fn fetch_receiver_reputation(
        &self,
        receiver: &str,
    ) -> AppResult<Option<crate::models::ReceiverReputation>> {
        let store = self.store.clone();
        let receiver_owned = receiver.to_string();
        tokio::time::timeout(
            self.config.deadline.store_read(),
            tokio::task::spawn_blocking(move || store.get_receiver_reputation(&receiver_owned)),
        )
        .await
        .map_err(|_| AppError::StoreReadUnavailable)?
        .map_err(anyhow::Error::from)?
        .map_err(AppError::from)
    }

    pub fn invalidate_payer(&self, payer_id: PayerId) {
        let cache = self.cache.clone();
        let ctx_key = format!("payer:ctx:{payer_id}");
        let devices_key = format!("payer:devices:{payer_id}");
        tokio::spawn(async move {
            cache.invalidate(&ctx_key).await;
            cache.invalidate(&devices_key).await;
        });
    }

    pub fn invalidate_receiver(&self, receiver: &str) {
        let cache = self.cache.clone();
        let ctx_key = format!("recv:ctx:{receiver}");
        let blacklist_key = format!("recv:blacklist:{receiver}");
        tokio::spawn(async move {
            cache.invalidate(&ctx_key).await;
            cache.invalidate(&blacklist_key).await;
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReceiverGlobalContext {
    reputation_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlacklistFacts {
    total_transactions: u64,
    fraud_count: u64,
}
