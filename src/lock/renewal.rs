// src/lock/renewal.rs

//! Background auto-renewal for the distributed lock (spec §4.3): "when
//! enabled, a background task periodically renews all active tokens whose
//! elapsed time exceeds a configured fraction of their TTL."

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::distributed_lock::DistributedLock;
use crate::config::LockConfig;

/// How often the task wakes up to check which held locks are due for
/// renewal. Independent of any single lock's TTL.
const CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Periodically renews every lock this process currently holds whose
/// elapsed hold time has crossed `auto_renewal_ratio` of its TTL. Tokens
/// that fail renewal are dropped from the local active set by
/// [`DistributedLock::renew`] itself; this task just drives the check.
pub struct LockRenewalTask {
    lock: Arc<DistributedLock>,
    ratio: f64,
}

impl LockRenewalTask {
    pub fn new(lock: Arc<DistributedLock>, config: &LockConfig) -> Self {
        Self {
            lock,
            ratio: config.auto_renewal_ratio,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!("lock auto-renewal task started");
        let mut interval = tokio::time::interval(CHECK_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.renew_due_locks().await;
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("lock auto-renewal task shutting down");
                    return;
                }
            }
        }
    }

    async fn renew_due_locks(&self) {
        for (key, token, expiry) in self.lock.due_for_renewal(self.ratio) {
            match self.lock.renew(&key, &token, expiry).await {
                Ok(true) => debug!(key, "lock auto-renewed"),
                Ok(false) => warn!(key, "lock auto-renewal rejected; token no longer owned"),
                Err(e) => warn!(key, error = %e, "lock auto-renewal request failed; will retry next cycle"),
            }
        }
    }
}
