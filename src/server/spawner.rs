// src/server/spawner.rs

//! Spawns every long-running background task into the server context's
//! JoinSet, each with its own shutdown subscription.

use tracing::info;

use super::context::ServerContext;
use super::metrics_server;
use crate::cache_strategy::CacheCleanupTask;
use crate::lock::LockRenewalTask;
use crate::transaction::TransactionSweeperTask;

pub async fn spawn_all(ctx: &mut ServerContext) {
    let core = ctx.core.clone();
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Distributed Lock auto-renewal ---
    if core.config.lock.enable_auto_renewal {
        let renewal = LockRenewalTask::new(core.lock.clone(), &core.config.lock);
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            renewal.run(shutdown_rx).await;
        });
    }

    // --- Cache Strategy cleanup/eviction ---
    let cleanup = CacheCleanupTask::new(core.cache.clone(), core.config.cache.cleanup_interval);
    let shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        cleanup.run(shutdown_rx).await;
    });

    // --- Sync Engine write-behind flush ---
    let sync = core.sync.clone();
    let shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        sync.run_flush_loop(shutdown_rx).await;
    });

    // --- Distributed Transaction timeout sweeper ---
    let sweeper = TransactionSweeperTask::new(core.transactions.clone(), &core.config.transaction);
    let shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    // --- Session Registry idle cleanup ---
    let sessions = core.sessions.clone();
    let shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        sessions.run_cleanup_loop(shutdown_rx).await;
    });

    // --- Broadcast Router stale-receiver cleanup ---
    let router = core.router.clone();
    let shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        router.run_cleanup_loop(shutdown_rx).await;
    });

    // --- Metrics server ---
    if core.config.metrics.enabled {
        let metrics_core = core.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_core, shutdown_rx).await;
        });
    } else {
        info!("metrics server is disabled in the configuration");
    }

    info!("all background tasks have been spawned");
}
