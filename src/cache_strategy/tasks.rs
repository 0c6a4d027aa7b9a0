// src/cache_strategy/tasks.rs

//! The periodic cleanup task for the Cache Strategy (spec §4.4): "A
//! periodic cleanup task (configurable interval) scans the access map,
//! deletes keys whose store-side TTL has expired, and triggers LRU
//! eviction if still over threshold." Eviction-on-threshold is handled
//! inside [`CacheStrategy::cleanup_expired`] itself; this task just drives
//! the timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::strategy::CacheStrategy;

pub struct CacheCleanupTask {
    strategy: Arc<CacheStrategy>,
    interval: Duration,
}

impl CacheCleanupTask {
    pub fn new(strategy: Arc<CacheStrategy>, interval: Duration) -> Self {
        Self { strategy, interval }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("cache cleanup task started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.strategy.cleanup_expired().await {
                        Ok(expired) if expired > 0 => info!(expired, "cache cleanup removed expired keys"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "cache cleanup cycle failed; will retry next tick"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("cache cleanup task shutting down");
                    return;
                }
            }
        }
    }
}
