// src/sync/engine.rs

//! The Sync Engine (C5): mediates between the Cache Strategy and the
//! Document Store Adapter under a per-entity-kind synchronization strategy
//! (spec §4.5).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::{Binary, Bson, doc, spec::BinarySubtype};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cache_strategy::{CacheCategory, CacheStrategy};
use crate::config::{SyncConfig, SyncStrategy};
use crate::error::CoreResult;
use crate::metrics::{
    SYNC_WRITE_BEHIND_FLUSH_FAILURES_TOTAL, SYNC_WRITE_BEHIND_QUEUE_DEPTH,
    SYNC_WRITE_THROUGH_FAILURES_TOTAL,
};
use crate::serialization;
use crate::store::DocumentStoreAdapter;
use crate::store::document_adapter::UpsertOp;

use super::entity::EntityKind;
use super::write_behind::{WriteBehindItem, WriteBehindQueue};

/// Mediates cache/document writes under the configured per-entity-kind
/// strategy (write-through, write-behind, cache-aside).
pub struct SyncEngine {
    cache: Arc<CacheStrategy>,
    documents: DocumentStoreAdapter,
    config: SyncConfig,
    queue: WriteBehindQueue,
    flush_notify: Notify,
}

impl SyncEngine {
    pub fn new(cache: Arc<CacheStrategy>, documents: DocumentStoreAdapter, config: SyncConfig) -> Arc<Self> {
        let queue = WriteBehindQueue::new(config.max_pending_writes);
        Arc::new(Self {
            cache,
            documents,
            config,
            queue,
            flush_notify: Notify::new(),
        })
    }

    fn collection_for(&self, entity: &EntityKind) -> String {
        self.config
            .collections
            .get(entity)
            .cloned()
            .unwrap_or_else(|| entity.as_str().to_string())
    }

    fn strategy_for(&self, entity: &EntityKind) -> SyncStrategy {
        self.config
            .strategy_by_entity
            .get(entity)
            .copied()
            .unwrap_or(self.config.default_strategy)
    }

    fn document_for(key: &str, payload: &[u8]) -> mongodb::bson::Document {
        doc! {
            "payload": Bson::Binary(Binary { subtype: BinarySubtype::Generic, bytes: payload.to_vec() }),
            "_logical_key": key,
        }
    }

    /// Writes `value` under `entity`'s configured strategy. Write-through
    /// updates cache and document concurrently and fails if either does;
    /// write-behind updates cache immediately and queues the document
    /// write; cache-aside treats the document store as authoritative and
    /// updates the cache afterward so later reads are warm (spec §4.5
    /// defines cache-aside only for reads; this crate extends it
    /// symmetrically for writes rather than leaving the path undefined).
    pub async fn write<T: Serialize>(
        &self,
        entity: EntityKind,
        category: CacheCategory,
        key: &str,
        value: &T,
    ) -> CoreResult<()> {
        match self.strategy_for(&entity) {
            SyncStrategy::WriteThrough => {
                let collection = self.collection_for(&entity);
                let encoded = serialization::encode(value)?;
                let doc_body = Self::document_for(key, &encoded);
                let cache_fut = self.cache.set(category, key, value, None);
                let doc_fut = self.documents.upsert(&collection, doc! {"_id": key}, doc_body);
                let (cache_result, doc_result) = tokio::join!(cache_fut, doc_fut);
                if let Err(e) = &cache_result {
                    SYNC_WRITE_THROUGH_FAILURES_TOTAL.inc();
                    warn!(key, error = %e, "write-through cache phase failed");
                }
                if let Err(e) = &doc_result {
                    SYNC_WRITE_THROUGH_FAILURES_TOTAL.inc();
                    warn!(key, error = %e, "write-through document phase failed");
                }
                cache_result?;
                doc_result?;
                Ok(())
            }
            SyncStrategy::WriteBehind => {
                self.cache.set(category, key, value, None).await?;

                // Spec §8 boundary: a queue that is exactly full triggers an
                // immediate flush, and the new item is admitted only if that
                // flush actually freed space.
                if self.queue.is_full() {
                    let _ = self.flush_once().await;
                    if self.queue.is_full() {
                        return Err(crate::error::CoreError::PoolFull(format!(
                            "write-behind queue at capacity ({})",
                            self.config.max_pending_writes
                        )));
                    }
                }

                let payload = serialization::encode(value)?;
                let was_full = self.queue.push(WriteBehindItem {
                    key: key.to_string(),
                    entity,
                    payload,
                    enqueued_at: std::time::Instant::now(),
                });
                SYNC_WRITE_BEHIND_QUEUE_DEPTH.set(self.queue.len() as f64);
                if was_full || self.queue.is_full() {
                    self.flush_notify.notify_one();
                }
                Ok(())
            }
            SyncStrategy::CacheAside => {
                let collection = self.collection_for(&entity);
                let encoded = serialization::encode(value)?;
                self.documents
                    .upsert(&collection, doc! {"_id": key}, Self::document_for(key, &encoded))
                    .await?;
                self.cache.set(category, key, value, None).await?;
                Ok(())
            }
        }
    }

    /// Cache-aside read: returns the cached value if present, otherwise
    /// invokes `loader` and backfills the cache with the default-category
    /// TTL (spec §4.5).
    pub async fn read_cache_aside<T, F, Fut>(
        &self,
        category: CacheCategory,
        key: &str,
        loader: F,
    ) -> CoreResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        if let Some(value) = self.cache.get::<T>(category, key).await? {
            return Ok(value);
        }
        let value = loader().await?;
        self.cache.set(category, key, &value, None).await?;
        Ok(value)
    }

    /// Removes `key` from the cache and from the collection tagged for
    /// `entity` (spec §4.5: "Delete").
    pub async fn delete(&self, entity: EntityKind, category: CacheCategory, key: &str) -> CoreResult<()> {
        self.cache.remove(category, key).await?;
        let collection = self.collection_for(&entity);
        self.documents.delete(&collection, doc! {"_id": key}).await?;
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Drains up to `flush_batch_size` items, groups by entity kind, and
    /// upserts each group through the document store. On failure the
    /// whole batch is re-enqueued and the failure counter incremented
    /// (spec §4.5).
    pub async fn flush_once(&self) -> CoreResult<usize> {
        let batch = self.queue.drain_batch(self.config.flush_batch_size);
        if batch.is_empty() {
            return Ok(0);
        }
        let flushed = batch.len();

        let mut by_entity: HashMap<EntityKind, Vec<UpsertOp>> = HashMap::new();
        for item in &batch {
            let collection = self.collection_for(&item.entity);
            by_entity.entry(item.entity.clone()).or_default().push(UpsertOp {
                collection,
                filter: doc! {"_id": &item.key},
                update: Self::document_for(&item.key, &item.payload),
            });
        }

        let mut ops = Vec::new();
        for group in by_entity.into_values() {
            ops.extend(group);
        }

        if let Err(e) = self.documents.bulk_upsert(ops).await {
            SYNC_WRITE_BEHIND_FLUSH_FAILURES_TOTAL.inc();
            warn!(error = %e, count = flushed, "write-behind flush batch failed; re-enqueuing");
            self.queue.requeue_front(batch);
            SYNC_WRITE_BEHIND_QUEUE_DEPTH.set(self.queue.len() as f64);
            return Err(e);
        }

        SYNC_WRITE_BEHIND_QUEUE_DEPTH.set(self.queue.len() as f64);
        Ok(flushed)
    }

    /// Runs a bounded number of flush passes until the queue is empty or
    /// the bound is exhausted, used for the final flush on shutdown (spec
    /// §4.5: "Shutdown").
    pub async fn dispose(&self) -> CoreResult<()> {
        const MAX_PASSES: usize = 50;
        for _ in 0..MAX_PASSES {
            if self.queue.is_empty() {
                break;
            }
            if self.flush_once().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Drives the write-behind flush loop: a fixed interval tick, plus an
    /// immediate wake-up when a write pushes the queue over capacity.
    pub async fn run_flush_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("sync engine flush loop started");
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.flush_interval_ms));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.flush_once().await;
                }
                _ = self.flush_notify.notified() => {
                    let _ = self.flush_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("sync engine flush loop shutting down; running final flush");
                    let _ = self.dispose().await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::cache_adapter::fake::FakeCacheBackend;
    use crate::store::document_adapter::fake::FakeDocumentBackend;
    use crate::store::{CacheStoreAdapter, DocumentStoreAdapter};

    fn test_engine(strategy: SyncStrategy) -> Arc<SyncEngine> {
        let cache_backend = Arc::new(FakeCacheBackend::new());
        let cache = Arc::new(CacheStrategy::new(
            CacheStoreAdapter::new(cache_backend, "test"),
            CacheConfig::default(),
        ));
        let documents = DocumentStoreAdapter::new(Arc::new(FakeDocumentBackend::new()));
        let mut config = SyncConfig::default();
        config.default_strategy = strategy;
        SyncEngine::new(cache, documents, config)
    }

    #[tokio::test]
    async fn write_behind_is_cache_visible_before_flush() {
        let engine = test_engine(SyncStrategy::WriteBehind);
        engine
            .write(EntityKind::player(), CacheCategory::PlayerState, "p:42", &"V".to_string())
            .await
            .unwrap();
        let cached: Option<String> = engine.cache.get(CacheCategory::PlayerState, "p:42").await.unwrap();
        assert_eq!(cached, Some("V".to_string()));
        assert_eq!(engine.queue_depth(), 1);
    }

    #[tokio::test]
    async fn write_behind_flush_persists_and_drains_queue() {
        let engine = test_engine(SyncStrategy::WriteBehind);
        engine
            .write(EntityKind::player(), CacheCategory::PlayerState, "p:42", &"V".to_string())
            .await
            .unwrap();
        let flushed = engine.flush_once().await.unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(engine.queue_depth(), 0);
    }

    #[tokio::test]
    async fn write_behind_flushes_and_admits_when_queue_was_exactly_full() {
        let cache_backend = Arc::new(FakeCacheBackend::new());
        let cache = Arc::new(CacheStrategy::new(
            CacheStoreAdapter::new(cache_backend, "test"),
            CacheConfig::default(),
        ));
        let documents = DocumentStoreAdapter::new(Arc::new(FakeDocumentBackend::new()));
        let mut config = SyncConfig::default();
        config.default_strategy = SyncStrategy::WriteBehind;
        config.max_pending_writes = 1;
        let engine = SyncEngine::new(cache, documents, config);

        engine
            .write(EntityKind::player(), CacheCategory::PlayerState, "p:1", &"A".to_string())
            .await
            .unwrap();
        assert_eq!(engine.queue_depth(), 1);

        // Queue is exactly full; the write-behind path must flush it
        // in-line (the fake document backend always succeeds) and then
        // admit the new item rather than reject it.
        engine
            .write(EntityKind::player(), CacheCategory::PlayerState, "p:2", &"B".to_string())
            .await
            .unwrap();
        assert_eq!(engine.queue_depth(), 1);
    }

    #[tokio::test]
    async fn write_through_updates_both_stores() {
        let engine = test_engine(SyncStrategy::WriteThrough);
        engine
            .write(EntityKind::room(), CacheCategory::RoomState, "r:1", &"state".to_string())
            .await
            .unwrap();
        let cached: Option<String> = engine.cache.get(CacheCategory::RoomState, "r:1").await.unwrap();
        assert_eq!(cached, Some("state".to_string()));
    }

    #[tokio::test]
    async fn cache_aside_loads_on_miss_and_backfills() {
        let engine = test_engine(SyncStrategy::CacheAside);
        let mut calls = 0;
        let value = engine
            .read_cache_aside(CacheCategory::PlayerState, "p:1", || async {
                calls += 1;
                Ok::<_, crate::error::CoreError>("loaded".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "loaded");
        let cached: Option<String> = engine.cache.get(CacheCategory::PlayerState, "p:1").await.unwrap();
        assert_eq!(cached, Some("loaded".to_string()));
    }
}
