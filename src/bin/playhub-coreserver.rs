// src/bin/playhub-coreserver.rs

//! Standalone process entry point that wires `playhub-core` up and runs its
//! background tasks until a termination signal arrives. The request/response
//! RPC surface this would sit behind is an external collaborator (spec §1)
//! and is not started here; this binary exists to exercise the core's
//! lifecycle the way a real deployment would.

use std::env;

use anyhow::Result;
use playhub_core::config::AppConfig;
use playhub_core::server::{ServerContext, spawn_all};
use playhub_core::AppCore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("playhub-coreserver {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match AppConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = config_path, error = %e, "failed to load configuration, falling back to defaults");
            AppConfig::default()
        }
    };

    info!(version = VERSION, "starting playhub-core server");

    let core = AppCore::new(config).await?;
    let mut ctx = ServerContext::new(core);
    spawn_all(&mut ctx).await;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    ctx.shutdown().await;
    info!("shutdown complete");
    Ok(())
}
