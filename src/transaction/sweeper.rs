// src/transaction/sweeper.rs

//! Background timeout sweeper for the Distributed Transaction (spec §4.7:
//! "Cleanup"): rolls back any transaction whose elapsed time exceeds its
//! timeout, so a crashed or stalled caller never holds its locks forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::manager::DistributedTransaction;
use crate::config::TransactionConfig;

/// Periodically asks the transaction manager to sweep out timed-out
/// transactions.
pub struct TransactionSweeperTask {
    manager: Arc<DistributedTransaction>,
    interval: Duration,
}

impl TransactionSweeperTask {
    pub fn new(manager: Arc<DistributedTransaction>, config: &TransactionConfig) -> Self {
        Self {
            manager,
            interval: config.sweeper_interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("transaction sweeper task started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = self.manager.sweep_expired().await;
                    if swept > 0 {
                        warn!(count = swept, "rolled back timed-out transactions");
                    } else {
                        debug!("transaction sweep found nothing to roll back");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("transaction sweeper task shutting down");
                    return;
                }
            }
        }
    }
}
