// src/metrics.rs

//! Registers and exposes Prometheus metrics for every component's §4
//! "Statistics" snapshot, in addition to the in-process stats structs each
//! component keeps for programmatic access.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Session Registry (C8) ---
    pub static ref SESSIONS_ONLINE: Gauge =
        register_gauge!("playhub_sessions_online", "Number of currently online sessions.").unwrap();
    pub static ref SESSIONS_REGISTERED_TOTAL: Counter =
        register_counter!("playhub_sessions_registered_total", "Total sessions registered since startup.").unwrap();
    pub static ref SESSIONS_EXPIRED_TOTAL: Counter =
        register_counter!("playhub_sessions_expired_total", "Total sessions evicted by idle-timeout cleanup.").unwrap();

    // --- Broadcast Router (C9) ---
    pub static ref ROUTER_MESSAGES_PROCESSED_TOTAL: Counter =
        register_counter!("playhub_router_messages_processed_total", "Total routed messages processed.").unwrap();
    pub static ref ROUTER_DELIVERIES_TOTAL: CounterVec =
        register_counter_vec!("playhub_router_deliveries_total", "Deliveries by outcome.", &["outcome"]).unwrap();
    pub static ref ROUTER_DELIVERIES_BY_KIND_TOTAL: CounterVec =
        register_counter_vec!("playhub_router_deliveries_by_kind_total", "Deliveries by target kind.", &["kind"]).unwrap();
    pub static ref ROUTER_LATENCY_EMA_SECONDS: Gauge =
        register_gauge!("playhub_router_latency_ema_seconds", "Exponential moving average delivery latency.").unwrap();
    pub static ref ROUTER_QUEUE_BACKLOG: Gauge =
        register_gauge!("playhub_router_queue_backlog", "Current batch-routing queue backlog.").unwrap();

    // --- Cache Strategy (C4) ---
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("playhub_cache_hits_total", "Total cache hits.").unwrap();
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("playhub_cache_misses_total", "Total cache misses.").unwrap();
    pub static ref CACHE_KEY_COUNT: Gauge =
        register_gauge!("playhub_cache_key_count", "Number of keys tracked by the LRU admission map.").unwrap();
    pub static ref CACHE_EVICTIONS_TOTAL: Counter =
        register_counter!("playhub_cache_evictions_total", "Total keys evicted by LRU admission.").unwrap();
    pub static ref CACHE_EXPIRED_TOTAL: Counter =
        register_counter!("playhub_cache_expired_total", "Total keys removed by the cleanup-expired task.").unwrap();
    pub static ref CACHE_RESPONSE_TIME_EMA_SECONDS: Gauge =
        register_gauge!("playhub_cache_response_time_ema_seconds", "Moving-average cache response time.").unwrap();

    // --- Distributed Lock (C3) ---
    pub static ref LOCK_ACQUIRE_SUCCESS_TOTAL: Counter =
        register_counter!("playhub_lock_acquire_success_total", "Successful lock acquisitions.").unwrap();
    pub static ref LOCK_ACQUIRE_FAILED_TOTAL: Counter =
        register_counter!("playhub_lock_acquire_failed_total", "Failed lock acquisitions.").unwrap();
    pub static ref LOCK_ACQUIRE_TIMEOUT_TOTAL: Counter =
        register_counter!("playhub_lock_acquire_timeout_total", "Lock acquisitions that timed out.").unwrap();
    pub static ref LOCK_WAIT_SECONDS: Histogram =
        register_histogram!("playhub_lock_wait_seconds", "Time spent waiting to acquire a lock.").unwrap();
    pub static ref LOCK_HOLD_SECONDS: Histogram =
        register_histogram!("playhub_lock_hold_seconds", "Time a lock was held before release.").unwrap();

    // --- Sync Engine (C5) ---
    pub static ref SYNC_WRITE_BEHIND_QUEUE_DEPTH: Gauge =
        register_gauge!("playhub_sync_write_behind_queue_depth", "Current write-behind queue depth.").unwrap();
    pub static ref SYNC_WRITE_BEHIND_FLUSH_FAILURES_TOTAL: Counter =
        register_counter!("playhub_sync_write_behind_flush_failures_total", "Failed write-behind flush batches.").unwrap();
    pub static ref SYNC_WRITE_THROUGH_FAILURES_TOTAL: Counter =
        register_counter!("playhub_sync_write_through_failures_total", "Failed write-through operations.").unwrap();

    // --- Conflict Detector (C6) ---
    pub static ref CONFLICT_DETECTED_TOTAL: CounterVec =
        register_counter_vec!("playhub_conflict_detected_total", "Conflicts detected by resolution policy.", &["policy"]).unwrap();

    // --- Distributed Transaction (C7) ---
    pub static ref TRANSACTIONS_STARTED_TOTAL: Counter =
        register_counter!("playhub_transactions_started_total", "Transactions started.").unwrap();
    pub static ref TRANSACTIONS_COMMITTED_TOTAL: Counter =
        register_counter!("playhub_transactions_committed_total", "Transactions committed.").unwrap();
    pub static ref TRANSACTIONS_ROLLED_BACK_TOTAL: Counter =
        register_counter!("playhub_transactions_rolled_back_total", "Transactions rolled back.").unwrap();
    pub static ref TRANSACTIONS_TIMED_OUT_TOTAL: Counter =
        register_counter!("playhub_transactions_timed_out_total", "Transactions rolled back by the timeout sweeper.").unwrap();
    pub static ref TRANSACTIONS_PARTIAL_TOTAL: Counter =
        register_counter!("playhub_transactions_partial_total", "Transactions requiring reconciliation after a partial commit.").unwrap();
    pub static ref TRANSACTIONS_ACTIVE: Gauge =
        register_gauge!("playhub_transactions_active", "Currently active transactions.").unwrap();

    // --- Backend reachability (ambient health surface) ---
    pub static ref BACKEND_REACHABLE: GaugeVec =
        register_gauge_vec!("playhub_backend_reachable", "1 if the named backend answered its health probe.", &["backend"]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text
/// exposition format for the `/metrics` HTTP route.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
