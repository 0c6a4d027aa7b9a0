// src/cache_strategy/strategy.rs

//! The Cache Strategy (C4): a category-aware cache facade over the Cache
//! Store Adapter, with LRU admission, warmup, and a statistics snapshot
//! (spec §4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::CacheConfig;
use crate::error::CoreResult;
use crate::metrics::{
    CACHE_EVICTIONS_TOTAL, CACHE_EXPIRED_TOTAL, CACHE_HITS_TOTAL, CACHE_KEY_COUNT,
    CACHE_MISSES_TOTAL, CACHE_RESPONSE_TIME_EMA_SECONDS,
};
use crate::serialization;
use crate::store::CacheStoreAdapter;

use super::categories::CacheCategory;
use super::lru::LruTracker;

/// One item in a [`CacheStrategy::warmup`] batch: a logical key tagged with
/// priority (higher first) and an optional per-item TTL override (spec
/// §4.4: "Warmup").
pub struct WarmupItem {
    pub category: CacheCategory,
    pub key: String,
    pub payload: Vec<u8>,
    pub priority: i32,
    pub ttl: Option<Duration>,
}

/// The result of a warmup batch: how many items were set, and which keys
/// failed.
#[derive(Debug, Clone, Default)]
pub struct WarmupOutcome {
    pub succeeded: usize,
    pub failed_keys: Vec<String>,
}

/// A decoded cache item together with the bookkeeping the caller may want
/// (currently just the raw bytes; TTL lives at the store, not here).
pub struct CacheItem<T> {
    pub value: T,
}

#[derive(Default)]
struct StatsInner {
    total_requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired_count: AtomicU64,
    evicted_count: AtomicU64,
    last_cleanup: Mutex<Option<Instant>>,
    avg_response_secs: Mutex<f64>,
}

/// A point-in-time statistics snapshot (spec §4.4: "Statistics").
#[derive(Debug, Clone)]
pub struct CacheStatistics {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub key_count: u64,
    pub memory_usage_bytes: u64,
    pub expired_count: u64,
    pub evicted_count: u64,
    pub last_cleanup: Option<Instant>,
    pub avg_response_time: Duration,
}

/// The unified cache facade. One instance is shared by the Sync Engine,
/// Conflict Detector, and any direct caller that just wants category-aware
/// get/set with LRU admission.
pub struct CacheStrategy {
    store: CacheStoreAdapter,
    config: CacheConfig,
    lru: LruTracker,
    stats: StatsInner,
}

impl CacheStrategy {
    pub fn new(store: CacheStoreAdapter, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            lru: LruTracker::new(),
            stats: StatsInner::default(),
        }
    }

    fn namespaced_key(category: CacheCategory, key: &str) -> String {
        format!("{}:{}", category.as_str(), key)
    }

    fn ttl_for(&self, category: CacheCategory, override_ttl: Option<Duration>) -> Duration {
        override_ttl
            .or_else(|| self.config.category_ttls.get(&category).map(|s| Duration::from_secs(*s)))
            .unwrap_or_else(|| category.default_ttl())
    }

    fn record_response_time(&self, started: Instant) {
        let sample = started.elapsed().as_secs_f64();
        let mut avg = self.stats.avg_response_secs.lock();
        *avg = 0.9 * *avg + 0.1 * sample;
        CACHE_RESPONSE_TIME_EMA_SECONDS.set(*avg);
    }

    /// Reads and deserializes a single cached value, touching the LRU map
    /// on a hit (spec §4.4).
    pub async fn get<T: DeserializeOwned>(
        &self,
        category: CacheCategory,
        key: &str,
    ) -> CoreResult<Option<T>> {
        let started = Instant::now();
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let namespaced = Self::namespaced_key(category, key);
        let raw = self.store.get(&namespaced).await?;
        self.record_response_time(started);
        match raw {
            Some(bytes) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                CACHE_HITS_TOTAL.inc();
                self.lru.touch(&namespaced);
                Ok(Some(serialization::decode(&bytes)?))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                CACHE_MISSES_TOTAL.inc();
                Ok(None)
            }
        }
    }

    /// Sets a cached value, running LRU admission first if the locally
    /// tracked key count is over threshold (spec §4.4: "Before `set` ...
    /// the strategy evicts the N oldest-accessed keys").
    pub async fn set<T: Serialize>(
        &self,
        category: CacheCategory,
        key: &str,
        value: &T,
        ttl_override: Option<Duration>,
    ) -> CoreResult<()> {
        self.admit_if_over_threshold().await?;
        let namespaced = Self::namespaced_key(category, key);
        let ttl = self.ttl_for(category, ttl_override);
        let bytes = serialization::encode(value)?;
        self.store.set(&namespaced, bytes, Some(ttl)).await?;
        self.lru.touch(&namespaced);
        CACHE_KEY_COUNT.set(self.lru.len() as f64);
        Ok(())
    }

    pub async fn remove(&self, category: CacheCategory, key: &str) -> CoreResult<bool> {
        let namespaced = Self::namespaced_key(category, key);
        let removed = self.store.delete(&namespaced).await?;
        self.lru.remove(&namespaced);
        CACHE_KEY_COUNT.set(self.lru.len() as f64);
        Ok(removed)
    }

    pub async fn exists(&self, category: CacheCategory, key: &str) -> CoreResult<bool> {
        let namespaced = Self::namespaced_key(category, key);
        let exists = self.store.exists(&namespaced).await?;
        if exists {
            self.lru.touch(&namespaced);
        }
        Ok(exists)
    }

    /// Extends a key's TTL back to its category default, without changing
    /// its value.
    pub async fn refresh(&self, category: CacheCategory, key: &str) -> CoreResult<bool> {
        let namespaced = Self::namespaced_key(category, key);
        let ttl = self.ttl_for(category, None);
        let refreshed = self.store.expire(&namespaced, ttl).await?;
        if refreshed {
            self.lru.touch(&namespaced);
        }
        Ok(refreshed)
    }

    /// Batched get; `get_many([])` performs no I/O (spec §8 boundary case).
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        category: CacheCategory,
        keys: &[String],
    ) -> CoreResult<Vec<Option<T>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let namespaced: Vec<String> = keys.iter().map(|k| Self::namespaced_key(category, k)).collect();
        let raw = self.store.get_many(&namespaced).await?;
        let mut out = Vec::with_capacity(raw.len());
        for (key, value) in namespaced.iter().zip(raw.into_iter()) {
            match value {
                Some(bytes) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    self.lru.touch(key);
                    out.push(Some(serialization::decode(&bytes)?));
                }
                None => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    out.push(None);
                }
            }
        }
        self.stats.total_requests.fetch_add(keys.len() as u64, Ordering::Relaxed);
        Ok(out)
    }

    /// Batched set; `set_many({})` performs no I/O (spec §8 boundary case).
    pub async fn set_many<T: Serialize>(
        &self,
        category: CacheCategory,
        items: &[(String, T)],
        ttl_override: Option<Duration>,
    ) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.admit_if_over_threshold().await?;
        let ttl = self.ttl_for(category, ttl_override);
        let mut encoded = Vec::with_capacity(items.len());
        for (key, value) in items {
            let namespaced = Self::namespaced_key(category, key);
            encoded.push((namespaced, serialization::encode(value)?, Some(ttl)));
        }
        self.store.set_many(&encoded).await?;
        for (namespaced, _, _) in &encoded {
            self.lru.touch(namespaced);
        }
        CACHE_KEY_COUNT.set(self.lru.len() as f64);
        Ok(())
    }

    /// Loads an ordered batch of items, highest priority first, and sets
    /// each (spec §4.4: "Warmup"). Calling this twice with identical input
    /// is equivalent to once: values are simply overwritten.
    pub async fn warmup(&self, mut items: Vec<WarmupItem>) -> WarmupOutcome {
        items.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut outcome = WarmupOutcome::default();
        for item in items {
            let namespaced = Self::namespaced_key(item.category, &item.key);
            let ttl = self.ttl_for(item.category, item.ttl);
            match self.store.set(&namespaced, item.payload, Some(ttl)).await {
                Ok(()) => {
                    self.lru.touch(&namespaced);
                    outcome.succeeded += 1;
                }
                Err(_) => outcome.failed_keys.push(item.key),
            }
        }
        CACHE_KEY_COUNT.set(self.lru.len() as f64);
        outcome
    }

    /// Scans the local access map, drops keys whose store-side TTL has
    /// expired, and runs an LRU eviction pass if still over threshold
    /// (spec §4.4: "periodic cleanup task").
    pub async fn cleanup_expired(&self) -> CoreResult<u64> {
        let mut expired = 0u64;
        for key in self.lru.snapshot_keys() {
            if self.store.ttl(&key).await?.is_none() && !self.store.exists(&key).await? {
                self.lru.remove(&key);
                expired += 1;
            }
        }
        if expired > 0 {
            self.stats.expired_count.fetch_add(expired, Ordering::Relaxed);
            CACHE_EXPIRED_TOTAL.inc_by(expired as f64);
        }
        *self.stats.last_cleanup.lock() = Some(Instant::now());
        self.admit_if_over_threshold().await?;
        CACHE_KEY_COUNT.set(self.lru.len() as f64);
        Ok(expired)
    }

    /// Evicts the `n` least-recently-accessed keys, deleting them from the
    /// store and dropping them from the access map.
    pub async fn evict_lru(&self, n: usize) -> CoreResult<u64> {
        let victims = self.lru.oldest(n);
        let mut evicted = 0u64;
        for key in victims {
            if self.store.delete(&key).await? {
                evicted += 1;
            }
            self.lru.remove(&key);
        }
        if evicted > 0 {
            self.stats.evicted_count.fetch_add(evicted, Ordering::Relaxed);
            CACHE_EVICTIONS_TOTAL.inc_by(evicted as f64);
        }
        CACHE_KEY_COUNT.set(self.lru.len() as f64);
        Ok(evicted)
    }

    async fn admit_if_over_threshold(&self) -> CoreResult<()> {
        let threshold = (self.config.max_capacity as f64 * self.config.eviction_threshold) as usize;
        if self.lru.len() > threshold {
            self.evict_lru(self.config.eviction_batch_size).await?;
        }
        Ok(())
    }

    pub async fn statistics(&self) -> CacheStatistics {
        let info = self.store.keyspace_info().await.unwrap_or_default();
        CacheStatistics {
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            key_count: self.lru.len() as u64,
            memory_usage_bytes: info.used_memory_bytes,
            expired_count: self.stats.expired_count.load(Ordering::Relaxed),
            evicted_count: self.stats.evicted_count.load(Ordering::Relaxed),
            last_cleanup: *self.stats.last_cleanup.lock(),
            avg_response_time: Duration::from_secs_f64(*self.stats.avg_response_secs.lock()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cache_adapter::fake::FakeCacheBackend;
    use std::sync::Arc;

    fn strategy(max_capacity: usize, threshold: f64, batch: usize) -> CacheStrategy {
        let backend = Arc::new(FakeCacheBackend::new());
        let store = CacheStoreAdapter::new(backend, "test");
        let mut config = CacheConfig::default();
        config.max_capacity = max_capacity;
        config.eviction_threshold = threshold;
        config.eviction_batch_size = batch;
        CacheStrategy::new(store, config)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let strategy = strategy(100, 0.9, 10);
        strategy
            .set(CacheCategory::PlayerState, "p1", &"hello".to_string(), None)
            .await
            .unwrap();
        let value: Option<String> = strategy.get(CacheCategory::PlayerState, "p1").await.unwrap();
        assert_eq!(value, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn get_many_and_set_many_on_empty_input_do_nothing() {
        let strategy = strategy(100, 0.9, 10);
        let result: Vec<Option<String>> = strategy.get_many(CacheCategory::PlayerState, &[]).await.unwrap();
        assert!(result.is_empty());
        strategy
            .set_many::<String>(CacheCategory::PlayerState, &[], None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn admission_evicts_oldest_keys_over_threshold() {
        let strategy = strategy(4, 0.5, 2);
        for i in 0..3 {
            strategy
                .set(CacheCategory::PlayerState, &format!("k{i}"), &i, None)
                .await
                .unwrap();
        }
        // threshold = floor(4 * 0.5) = 2; after the 3rd set we were over
        // threshold, so the admission pass should have evicted the 2
        // oldest before the key count could run away.
        assert!(strategy.lru.len() <= 3);
    }

    #[tokio::test]
    async fn warmup_twice_is_idempotent() {
        let strategy = strategy(100, 0.9, 10);
        let items = vec![WarmupItem {
            category: CacheCategory::SystemConfig,
            key: "cfg".into(),
            payload: b"v1".to_vec(),
            priority: 1,
            ttl: None,
        }];
        let first = strategy.warmup(items).await;
        assert_eq!(first.succeeded, 1);
        let items_again = vec![WarmupItem {
            category: CacheCategory::SystemConfig,
            key: "cfg".into(),
            payload: b"v1".to_vec(),
            priority: 1,
            ttl: None,
        }];
        let second = strategy.warmup(items_again).await;
        assert_eq!(second.succeeded, 1);
    }
}
