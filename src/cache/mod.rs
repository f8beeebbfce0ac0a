//! Hot key/value cache for payer contexts, receiver reputations, and
//! derived stats. Cache-aside: the Context Engine reads through it and
//! falls back to the store on miss; the Trust Updater pushes invalidations.
//!
//! The teacher repo has no generic cache-aside primitive of this shape, so
//! this module is original, built in the same async-trait-over-parking_lot
//! idiom the teacher uses for its other shared-state components.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Self-describing envelope so a cache entry written by an older binary
/// version is treated as a miss rather than deserialized incorrectly.
const CACHE_RECORD_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CacheRecord {
    version: u32,
    payload: serde_json::Value,
}

/// Object-safe core: raw JSON in, raw JSON out. Kept non-generic so
/// `Arc<dyn Cache>` can be threaded through `AppState`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Option<serde_json::Value>;
    async fn set_raw(&self, key: &str, value: serde_json::Value, ttl: Duration);
    async fn invalidate(&self, key: &str);
}

/// Typed convenience wrappers over the object-safe core, usable on any
/// `Cache` trait object via auto-deref.
#[async_trait]
pub trait CacheExt {
    async fn get<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> Option<T>;
    async fn set<T: Serialize + Send + Sync + 'static>(&self, key: &str, value: &T, ttl: Duration);
}

#[async_trait]
impl<C: Cache + ?Sized> CacheExt for C {
    async fn get<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        serde_json::from_value(raw).ok()
    }

    async fn set<T: Serialize + Send + Sync + 'static>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(raw) = serde_json::to_value(value) {
            self.set_raw(key, raw, ttl).await;
        }
    }
}

struct Entry {
    record: CacheRecord,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn into_shared(self) -> Arc<dyn Cache> {
        Arc::new(self)
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_raw(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let entry = entries.get(key)?;
        if entry.expires_at <= now || entry.record.version != CACHE_RECORD_VERSION {
            entries.remove(key);
            return None;
        }

        Some(entry.record.payload.clone())
    }

    async fn set_raw(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let record = CacheRecord {
            version: CACHE_RECORD_VERSION,
            payload: value,
        };
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                record,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrips() {
        let cache = InMemoryCache::new();
        cache.set("k", &Sample { value: 42 }, Duration::from_secs(60)).await;
        let got: Option<Sample> = cache.get("k").await;
        assert_eq!(got, Some(Sample { value: 42 }));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = InMemoryCache::new();
        cache
            .set("k", &Sample { value: 1 }, Duration::from_millis(1))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let got: Option<Sample> = cache.get("k").await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = InMemoryCache::new();
        cache.set("k", &Sample { value: 7 }, Duration::from_secs(60)).await;
        cache.invalidate("k").await;
        let got: Option<Sample> = cache.get("k").await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_missing_key_is_a_miss() {
        let cache = InMemoryCache::new();
        let got: Option<Sample> = cache.get("nope").await;
        assert_eq!(got, None);
    }
}
