// src/lock/distributed_lock.rs

//! Implements the fenced mutual-exclusion lock over the Cache Store Adapter
//! (spec §4.3).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics::{
    LOCK_ACQUIRE_FAILED_TOTAL, LOCK_ACQUIRE_SUCCESS_TOTAL, LOCK_ACQUIRE_TIMEOUT_TOTAL,
    LOCK_HOLD_SECONDS, LOCK_WAIT_SECONDS,
};
use crate::store::CacheStoreAdapter;

/// What the auto-renewal task needs to know about a lock this process
/// currently holds.
struct ActiveLock {
    token: String,
    acquired_at: Instant,
    expiry: Duration,
}

#[derive(Default)]
struct StatsInner {
    successful: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    wait_total_micros: AtomicU64,
    hold_total_micros: AtomicU64,
    hold_samples: AtomicU64,
}

/// A point-in-time snapshot of lock acquisition statistics (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct LockStatistics {
    pub successful_acquisitions: u64,
    pub failed_acquisitions: u64,
    pub timed_out_acquisitions: u64,
    pub average_wait: Duration,
    pub average_hold: Duration,
}

/// The distributed lock service. One instance is shared by every caller in
/// the process; the owner-token prefix (host + pid) is fixed at
/// construction and a fresh nonce is minted per acquisition (spec §4.3:
/// "host identifier + process identifier + a unique per-acquisition
/// nonce").
pub struct DistributedLock {
    cache: CacheStoreAdapter,
    config: LockConfig,
    owner_prefix: String,
    active: DashMap<String, ActiveLock>,
    stats: StatsInner,
}

impl DistributedLock {
    pub fn new(cache: CacheStoreAdapter, config: LockConfig) -> Arc<Self> {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
        let owner_prefix = format!("{host}:{}", std::process::id());
        Arc::new(Self {
            cache,
            config,
            owner_prefix,
            active: DashMap::new(),
            stats: StatsInner::default(),
        })
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:{key}", self.config.key_prefix)
    }

    fn new_token(&self) -> String {
        format!("{}:{}", self.owner_prefix, Uuid::new_v4())
    }

    /// Atomic "set if absent"; never blocks (spec boundary: `try-acquire`
    /// with wait=0 never blocks, which callers get for free since this
    /// makes a single store round-trip).
    pub async fn try_acquire(self: &Arc<Self>, key: &str, expiry: Duration) -> CoreResult<Option<LockGuard>> {
        let token = self.new_token();
        let full_key = self.lock_key(key);
        let acquired = self
            .cache
            .set_if_absent(&full_key, token.clone().into_bytes(), expiry)
            .await?;

        if acquired {
            self.stats.successful.fetch_add(1, Ordering::Relaxed);
            LOCK_ACQUIRE_SUCCESS_TOTAL.inc();
            self.active.insert(
                key.to_string(),
                ActiveLock {
                    token: token.clone(),
                    acquired_at: Instant::now(),
                    expiry,
                },
            );
            Ok(Some(LockGuard {
                lock: self.clone(),
                key: key.to_string(),
                token,
                acquired_at: Instant::now(),
                released: false,
            }))
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            LOCK_ACQUIRE_FAILED_TOTAL.inc();
            Ok(None)
        }
    }

    /// Retries `try_acquire` at `retry_interval` until success, `wait`
    /// elapses, `cancel` fires, or `max_retries` is exhausted.
    pub async fn acquire(
        self: &Arc<Self>,
        key: &str,
        expiry: Duration,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> CoreResult<LockGuard> {
        let started = Instant::now();
        let deadline = started + wait;
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled(format!("lock acquire for {key} cancelled")));
            }

            if let Some(guard) = self.try_acquire(key, expiry).await? {
                LOCK_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());
                self.stats
                    .wait_total_micros
                    .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
                return Ok(guard);
            }

            attempts += 1;
            if Instant::now() >= deadline || attempts >= self.config.max_retries {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                LOCK_ACQUIRE_TIMEOUT_TOTAL.inc();
                return Err(CoreError::LockContended(key.to_string()));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_interval) => {}
                _ = cancel.cancelled() => {
                    return Err(CoreError::Cancelled(format!("lock acquire for {key} cancelled")));
                }
            }
        }
    }

    /// Conditional delete: only removes the key if its stored value still
    /// equals `token`, so a stale caller can never release a lock it no
    /// longer owns.
    pub async fn release(&self, key: &str, token: &str) -> CoreResult<bool> {
        let full_key = self.lock_key(key);
        let released = self.cache.compare_and_delete(&full_key, token.as_bytes()).await?;
        if released {
            if let Some((_, active)) = self.active.remove(key) {
                LOCK_HOLD_SECONDS.observe(active.acquired_at.elapsed().as_secs_f64());
                self.stats
                    .hold_total_micros
                    .fetch_add(active.acquired_at.elapsed().as_micros() as u64, Ordering::Relaxed);
                self.stats.hold_samples.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(released)
    }

    /// Conditional TTL update: only the owner may renew.
    pub async fn renew(&self, key: &str, token: &str, expiry: Duration) -> CoreResult<bool> {
        let full_key = self.lock_key(key);
        let renewed = self
            .cache
            .compare_and_expire(&full_key, token.as_bytes(), expiry)
            .await?;
        if renewed {
            if let Some(mut active) = self.active.get_mut(key) {
                active.acquired_at = Instant::now();
                active.expiry = expiry;
            }
        } else {
            debug!(key, "lock renewal failed; token no longer owned");
            self.active.remove(key);
        }
        Ok(renewed)
    }

    /// Returns true iff the stored value still equals `token`.
    pub async fn is_valid(&self, key: &str, token: &str) -> CoreResult<bool> {
        let full_key = self.lock_key(key);
        let stored = self.cache.get(&full_key).await?;
        Ok(stored.map(|v| v == token.as_bytes()).unwrap_or(false))
    }

    pub fn statistics(&self) -> LockStatistics {
        let successful = self.stats.successful.load(Ordering::Relaxed);
        let wait_total = self.stats.wait_total_micros.load(Ordering::Relaxed);
        let hold_samples = self.stats.hold_samples.load(Ordering::Relaxed);
        let hold_total = self.stats.hold_total_micros.load(Ordering::Relaxed);
        LockStatistics {
            successful_acquisitions: successful,
            failed_acquisitions: self.stats.failed.load(Ordering::Relaxed),
            timed_out_acquisitions: self.stats.timed_out.load(Ordering::Relaxed),
            average_wait: if successful > 0 {
                Duration::from_micros(wait_total / successful)
            } else {
                Duration::ZERO
            },
            average_hold: if hold_samples > 0 {
                Duration::from_micros(hold_total / hold_samples)
            } else {
                Duration::ZERO
            },
        }
    }

    /// Used by the auto-renewal background task: keys whose elapsed time
    /// exceeds `ratio` of their TTL.
    pub(crate) fn due_for_renewal(&self, ratio: f64) -> Vec<(String, String, Duration)> {
        self.active
            .iter()
            .filter(|entry| entry.acquired_at.elapsed().as_secs_f64() >= entry.expiry.as_secs_f64() * ratio)
            .map(|entry| (entry.key().clone(), entry.token.clone(), entry.expiry))
            .collect()
    }

    pub(crate) fn forget(&self, key: &str) {
        self.active.remove(key);
    }
}

/// An acquired lock. Dropping it without calling [`LockGuard::release`]
/// leaves the key to expire naturally at its TTL; the guard does not
/// auto-release on drop because release is a fallible network call that
/// cannot run from a synchronous destructor.
pub struct LockGuard {
    lock: Arc<DistributedLock>,
    key: String,
    token: String,
    acquired_at: Instant,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub async fn release(mut self) -> CoreResult<bool> {
        self.released = true;
        self.lock.release(&self.key, &self.token).await
    }

    pub async fn renew(&self, expiry: Duration) -> CoreResult<bool> {
        self.lock.renew(&self.key, &self.token, expiry).await
    }

    pub async fn is_valid(&self) -> CoreResult<bool> {
        self.lock.is_valid(&self.key, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            debug!(key = %self.key, "lock guard dropped without explicit release; relying on TTL expiry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cache_adapter::fake::FakeCacheBackend;

    fn test_lock() -> Arc<DistributedLock> {
        let backend = Arc::new(FakeCacheBackend::new());
        let cache = CacheStoreAdapter::new(backend, "test");
        DistributedLock::new(cache, LockConfig::default())
    }

    #[tokio::test]
    async fn fencing_rejects_stale_owner_release() {
        let lock = test_lock();
        let guard_a = lock.try_acquire("room:1", Duration::from_millis(50)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let guard_b = lock.try_acquire("room:1", Duration::from_secs(5)).await.unwrap().unwrap();
        assert_ne!(guard_a.token(), guard_b.token());

        assert!(!lock.release("room:1", guard_a.token()).await.unwrap());
        assert!(lock.release("room:1", guard_b.token()).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_try_acquire_only_one_wins() {
        let lock = test_lock();
        let first = lock.try_acquire("k", Duration::from_secs(5)).await.unwrap();
        let second = lock.try_acquire("k", Duration::from_secs(5)).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_twice_is_a_no_op_second_time() {
        let lock = test_lock();
        let guard = lock.try_acquire("k", Duration::from_secs(5)).await.unwrap().unwrap();
        let token = guard.token().to_string();
        assert!(lock.release("k", &token).await.unwrap());
        assert!(!lock.release("k", &token).await.unwrap());
    }

    #[tokio::test]
    async fn renew_extends_only_for_the_owning_token() {
        let lock = test_lock();
        let guard = lock.try_acquire("k", Duration::from_millis(100)).await.unwrap().unwrap();
        assert!(lock.renew("k", guard.token(), Duration::from_secs(5)).await.unwrap());
        assert!(!lock.renew("k", "not-the-owner", Duration::from_secs(5)).await.unwrap());
    }
}
