// src/config.rs

//! Typed configuration for every component, loaded once from TOML at
//! startup and validated before any component is constructed. Durations are
//! written as human-readable strings ("30m", "2h") in the config file and
//! parsed with `humantime-serde`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache_strategy::categories::CacheCategory;
use crate::error::{CoreError, CoreResult};
use crate::sync::entity::EntityKind;

/// The top-level configuration for the whole crate, deserialized from a
/// single TOML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Loads and validates configuration from a TOML file on disk.
    pub fn from_file(path: &str) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::InvalidArgument(format!("reading config {path}: {e}")))?;
        let cfg: AppConfig = toml::from_str(&raw)
            .map_err(|e| CoreError::InvalidArgument(format!("parsing config {path}: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates cross-cutting invariants: positive durations, ratios in
    /// `(0, 1)`, non-empty prefixes (spec §9).
    pub fn validate(&self) -> CoreResult<()> {
        if self.store.cache_key_prefix.is_empty() {
            return Err(CoreError::InvalidArgument(
                "store.cache_key_prefix must not be empty".into(),
            ));
        }
        if self.lock.key_prefix.is_empty() {
            return Err(CoreError::InvalidArgument(
                "lock.key_prefix must not be empty".into(),
            ));
        }
        if self.lock.auto_renewal_ratio <= 0.0 || self.lock.auto_renewal_ratio >= 1.0 {
            return Err(CoreError::InvalidArgument(
                "lock.auto_renewal_ratio must be in (0, 1)".into(),
            ));
        }
        if self.cache.eviction_threshold <= 0.0 || self.cache.eviction_threshold >= 1.0 {
            return Err(CoreError::InvalidArgument(
                "cache.eviction_threshold must be in (0, 1)".into(),
            ));
        }
        if self.lock.default_expiry.is_zero() || self.lock.default_timeout.is_zero() {
            return Err(CoreError::InvalidArgument(
                "lock.default_expiry and lock.default_timeout must be positive".into(),
            ));
        }
        if self.transaction.default_timeout.is_zero() {
            return Err(CoreError::InvalidArgument(
                "transaction.default_timeout must be positive".into(),
            ));
        }
        if self.session.max_pool_size == 0 {
            return Err(CoreError::InvalidArgument(
                "session.max_pool_size must be positive".into(),
            ));
        }
        if self.cache.eviction_batch_size == 0 {
            return Err(CoreError::InvalidArgument(
                "cache.eviction_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            lock: LockConfig::default(),
            sync: SyncConfig::default(),
            transaction: TransactionConfig::default(),
            session: SessionConfig::default(),
            router: RouterConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Connection settings for the two backing stores (spec §6: "External
/// Interfaces"). The adapters in `store::` are the only modules that read
/// the connection strings directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_mongo_uri")]
    pub mongo_uri: String,
    #[serde(default = "default_mongo_database")]
    pub mongo_database: String,
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            mongo_uri: default_mongo_uri(),
            mongo_database: default_mongo_database(),
            cache_key_prefix: default_cache_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_mongo_uri() -> String {
    "mongodb://127.0.0.1:27017".to_string()
}
fn default_mongo_database() -> String {
    "playhub".to_string()
}
fn default_cache_key_prefix() -> String {
    "playhub".to_string()
}

/// Configuration for the Cache Strategy (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub default_ttl: Duration,
    /// Per-category TTL overrides, in whole seconds; categories not present
    /// here fall back to the built-in defaults in
    /// `cache_strategy::categories`.
    #[serde(default)]
    pub category_ttls: HashMap<CacheCategory, u64>,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: f64,
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: usize,
    #[serde(with = "humantime_serde", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,
    #[serde(default = "default_true")]
    pub enable_statistics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_cache_ttl(),
            category_ttls: HashMap::new(),
            max_capacity: default_max_capacity(),
            eviction_threshold: default_eviction_threshold(),
            eviction_batch_size: default_eviction_batch_size(),
            cleanup_interval: default_cleanup_interval(),
            enable_statistics: true,
        }
    }
}

fn default_max_capacity() -> usize {
    100_000
}

fn default_eviction_threshold() -> f64 {
    0.9
}

fn default_eviction_batch_size() -> usize {
    256
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_true() -> bool {
    true
}

/// Configuration for the Distributed Lock (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(with = "humantime_serde", default = "default_lock_expiry")]
    pub default_expiry: Duration,
    #[serde(with = "humantime_serde", default = "default_lock_timeout")]
    pub default_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
    #[serde(default = "default_lock_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_true")]
    pub enable_auto_renewal: bool,
    #[serde(default = "default_auto_renewal_ratio")]
    pub auto_renewal_ratio: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_expiry: default_lock_expiry(),
            default_timeout: default_lock_timeout(),
            retry_interval: default_retry_interval(),
            key_prefix: default_lock_prefix(),
            enable_auto_renewal: true,
            auto_renewal_ratio: default_auto_renewal_ratio(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_lock_expiry() -> Duration {
    Duration::from_secs(10)
}
fn default_lock_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_retry_interval() -> Duration {
    Duration::from_millis(50)
}
fn default_lock_prefix() -> String {
    "lock".to_string()
}
fn default_auto_renewal_ratio() -> f64 {
    0.7
}
fn default_max_retries() -> u32 {
    100
}

/// The synchronization strategy a given entity kind or key uses (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
    WriteThrough,
    WriteBehind,
    CacheAside,
}

/// Configuration for the Sync Engine (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub strategy_by_entity: HashMap<EntityKind, SyncStrategy>,
    #[serde(default = "default_sync_strategy")]
    pub default_strategy: SyncStrategy,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
    #[serde(default = "default_max_pending_writes")]
    pub max_pending_writes: usize,
    /// Maps each entity kind to the document-store collection name used to
    /// persist it (spec §4.5/§6: "collection names are configurable per
    /// document type").
    #[serde(default)]
    pub collections: HashMap<EntityKind, String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy_by_entity: HashMap::new(),
            default_strategy: default_sync_strategy(),
            flush_interval_ms: default_flush_interval_ms(),
            flush_batch_size: default_flush_batch_size(),
            max_pending_writes: default_max_pending_writes(),
            collections: HashMap::new(),
        }
    }
}

fn default_sync_strategy() -> SyncStrategy {
    SyncStrategy::CacheAside
}
fn default_flush_interval_ms() -> u64 {
    500
}
fn default_flush_batch_size() -> usize {
    100
}
fn default_max_pending_writes() -> usize {
    10_000
}

/// Configuration for the Distributed Transaction (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    #[serde(with = "humantime_serde", default = "default_tx_timeout")]
    pub default_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_sweeper_interval")]
    pub sweeper_interval: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_tx_timeout(),
            sweeper_interval: default_sweeper_interval(),
        }
    }
}

fn default_tx_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_sweeper_interval() -> Duration {
    Duration::from_secs(5)
}

/// Configuration for the Session Registry (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_session_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            connection_timeout_seconds: default_connection_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
            cleanup_interval_seconds: default_session_cleanup_interval(),
        }
    }
}

fn default_max_pool_size() -> usize {
    50_000
}
fn default_connection_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_session_cleanup_interval() -> u64 {
    60
}

/// Configuration for the Broadcast Router (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
    #[serde(default = "default_receiver_max_age")]
    pub receiver_max_age_seconds: u64,
    #[serde(default = "default_router_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            receiver_max_age_seconds: default_receiver_max_age(),
            cleanup_interval_seconds: default_router_cleanup_interval(),
        }
    }
}

fn default_max_concurrent_deliveries() -> usize {
    10
}
fn default_receiver_max_age() -> u64 {
    24 * 60 * 60
}
fn default_router_cleanup_interval() -> u64 {
    60
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9898
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_empty_prefix() {
        let mut cfg = AppConfig::default();
        cfg.store.cache_key_prefix = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        let mut cfg = AppConfig::default();
        cfg.lock.auto_renewal_ratio = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [store]
            redis_url = "redis://localhost:6379"

            [lock]
            key_prefix = "lk"
            auto_renewal_ratio = 0.5
            "#,
        )
        .unwrap();
        let cfg = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.lock.key_prefix, "lk");
        assert_eq!(cfg.lock.auto_renewal_ratio, 0.5);
    }
}
