// src/server/metrics_server.rs

//! A small Axum server exposing `/metrics` (Prometheus text exposition) and
//! `/healthz` (cache + document backend reachability), gated by
//! `MetricsConfig.enabled`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::app::AppCore;
use crate::metrics;

async fn metrics_handler() -> impl IntoResponse {
    let body = metrics::gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

#[derive(Serialize)]
struct HealthReport {
    cache_reachable: bool,
    documents_reachable: bool,
}

async fn healthz_handler(core: Arc<AppCore>) -> impl IntoResponse {
    let (cache_result, document_result) = core.ping_backends().await;
    let cache_reachable = cache_result.is_ok();
    let documents_reachable = document_result.is_ok();

    metrics::BACKEND_REACHABLE
        .with_label_values(&["cache"])
        .set(if cache_reachable { 1.0 } else { 0.0 });
    metrics::BACKEND_REACHABLE
        .with_label_values(&["documents"])
        .set(if documents_reachable { 1.0 } else { 0.0 });

    let report = HealthReport {
        cache_reachable,
        documents_reachable,
    };
    let status = if cache_reachable && documents_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Runs the metrics/health HTTP server until shutdown is broadcast. Binding
/// failures are logged and the task exits without taking down the process.
pub async fn run_metrics_server(core: Arc<AppCore>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = core.config.metrics.port;

    let health_core = core.clone();
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(move || healthz_handler(health_core.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "metrics server listening on /metrics and /healthz");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, port, "failed to bind metrics server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
    {
        error!(error = %e, "metrics server exited with an error");
    }
}
