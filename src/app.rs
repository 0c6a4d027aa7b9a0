// src/app.rs

//! Wires every component together into one shared core, composed from a
//! single loaded configuration.

use std::sync::Arc;

use tracing::info;

use crate::cache_strategy::CacheStrategy;
use crate::config::AppConfig;
use crate::conflict::ConflictDetector;
use crate::error::CoreResult;
use crate::lock::DistributedLock;
use crate::realtime::{BroadcastRouter, SessionRegistry};
use crate::store::cache_adapter::{CacheStoreAdapter, RedisCacheBackend};
use crate::store::document_adapter::{DocumentStoreAdapter, MongoDocumentBackend};
use crate::sync::entity::GenericPersistenceHandler;
use crate::sync::SyncEngine;
use crate::transaction::DistributedTransaction;

/// The fully-wired set of subsystems a running process needs: both store
/// adapters, the lock, cache strategy, sync engine, conflict detector,
/// transaction manager, and the realtime session/router pair.
pub struct AppCore {
    pub config: AppConfig,
    pub cache_store: CacheStoreAdapter,
    pub documents: DocumentStoreAdapter,
    pub cache: Arc<CacheStrategy>,
    pub lock: Arc<DistributedLock>,
    pub sync: Arc<SyncEngine>,
    pub conflict: Arc<ConflictDetector>,
    pub transactions: Arc<DistributedTransaction>,
    pub sessions: Arc<SessionRegistry>,
    pub router: Arc<BroadcastRouter>,
}

impl AppCore {
    /// Connects to both backing stores and constructs every subsystem
    /// from `config`.
    pub async fn new(config: AppConfig) -> CoreResult<Arc<Self>> {
        let redis_backend = RedisCacheBackend::connect(&config.store.redis_url).await?;
        let cache_store = CacheStoreAdapter::new(Arc::new(redis_backend), config.store.cache_key_prefix.clone());

        let mongo_backend =
            MongoDocumentBackend::connect(&config.store.mongo_uri, config.store.mongo_database.clone()).await?;
        let documents = DocumentStoreAdapter::new(Arc::new(mongo_backend));

        let cache = Arc::new(CacheStrategy::new(cache_store.clone(), config.cache.clone()));
        let lock = DistributedLock::new(cache_store.clone(), config.lock.clone());
        let sync = SyncEngine::new(cache.clone(), documents.clone(), config.sync.clone());

        let mut conflict = ConflictDetector::new(cache_store.clone(), lock.clone());
        conflict.register_handler(Arc::new(GenericPersistenceHandler));
        let conflict = Arc::new(conflict);

        let transactions =
            DistributedTransaction::new(cache_store.clone(), documents.clone(), lock.clone(), config.transaction.clone());

        let sessions = SessionRegistry::new(config.session.clone());
        let router = BroadcastRouter::new(sessions.clone(), config.router.clone());

        info!("core subsystems initialized");

        Ok(Arc::new(Self {
            config,
            cache_store,
            documents,
            cache,
            lock,
            sync,
            conflict,
            transactions,
            sessions,
            router,
        }))
    }

    /// Pings both backing stores; used by the `/healthz` route.
    pub async fn ping_backends(&self) -> (CoreResult<()>, CoreResult<()>) {
        (self.cache_store.ping().await, self.documents.ping().await)
    }
}
