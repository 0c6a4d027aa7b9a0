// tests/integration/test_helpers.rs

//! Shared harness construction for the black-box suite: every subsystem
//! wired together the way `AppCore::new` does, but over the in-memory fake
//! backends so the suite needs neither a Redis nor a MongoDB instance.

use std::sync::Arc;

use playhub_core::cache_strategy::CacheStrategy;
use playhub_core::config::{
    CacheConfig, LockConfig, RouterConfig, SessionConfig, SyncConfig, TransactionConfig,
};
use playhub_core::conflict::ConflictDetector;
use playhub_core::lock::DistributedLock;
use playhub_core::realtime::{BroadcastRouter, SessionRegistry};
use playhub_core::store::cache_adapter::fake::FakeCacheBackend;
use playhub_core::store::document_adapter::fake::FakeDocumentBackend;
use playhub_core::store::{CacheStoreAdapter, DocumentStoreAdapter};
use playhub_core::sync::entity::GenericPersistenceHandler;
use playhub_core::sync::SyncEngine;
use playhub_core::transaction::DistributedTransaction;

/// Every subsystem wired together over fakes, available for a test to pick
/// and choose from rather than going through `AppCore`'s real-backend
/// connect step.
pub struct Harness {
    pub cache_store: CacheStoreAdapter,
    pub documents: DocumentStoreAdapter,
    pub doc_backend: Arc<FakeDocumentBackend>,
    pub cache: Arc<CacheStrategy>,
    pub lock: Arc<DistributedLock>,
    pub sync: Arc<SyncEngine>,
    pub conflict: Arc<ConflictDetector>,
    pub transactions: Arc<DistributedTransaction>,
    pub sessions: Arc<SessionRegistry>,
    pub router: Arc<BroadcastRouter>,
}

impl Harness {
    pub fn new() -> Self {
        let cache_backend = Arc::new(FakeCacheBackend::new());
        let cache_store = CacheStoreAdapter::new(cache_backend, "it");

        let doc_backend = Arc::new(FakeDocumentBackend::new());
        let documents = DocumentStoreAdapter::new(doc_backend.clone());

        let cache = Arc::new(CacheStrategy::new(cache_store.clone(), CacheConfig::default()));
        let lock = DistributedLock::new(cache_store.clone(), LockConfig::default());
        let sync = SyncEngine::new(cache.clone(), documents.clone(), SyncConfig::default());

        let mut conflict = ConflictDetector::new(cache_store.clone(), lock.clone());
        conflict.register_handler(Arc::new(GenericPersistenceHandler));
        let conflict = Arc::new(conflict);

        let transactions = DistributedTransaction::new(
            cache_store.clone(),
            documents.clone(),
            lock.clone(),
            TransactionConfig::default(),
        );

        let sessions = SessionRegistry::new(SessionConfig {
            max_pool_size: 1000,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 3600,
            cleanup_interval_seconds: 60,
        });
        let router = BroadcastRouter::new(
            sessions.clone(),
            RouterConfig {
                max_concurrent_deliveries: 32,
                receiver_max_age_seconds: 3600,
                cleanup_interval_seconds: 60,
            },
        );

        Self {
            cache_store,
            documents,
            doc_backend,
            cache,
            lock,
            sync,
            conflict,
            transactions,
            sessions,
            router,
        }
    }
}
