// src/store/document_adapter.rs

//! The Document Store Adapter (C2): typed collection access, session-scoped
//! transactions, and bulk upserts over the authoritative document store.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::Document;
use mongodb::{Client, ClientSession};
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};

/// One upsert in a bulk write: the filter selecting the target document and
/// its replacement/merge body.
pub struct UpsertOp {
    pub collection: String,
    pub filter: Document,
    pub update: Document,
}

/// The operations the Sync Engine and Distributed Transaction need from a
/// document store: filtered reads, upserts, bulk writes, and session-scoped
/// transactions (spec §4.2).
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn find_one(&self, collection: &str, filter: Document) -> CoreResult<Option<Document>>;
    async fn upsert(&self, collection: &str, filter: Document, update: Document) -> CoreResult<()>;
    async fn bulk_upsert(&self, ops: Vec<UpsertOp>) -> CoreResult<()>;
    async fn delete(&self, collection: &str, filter: Document) -> CoreResult<bool>;

    /// Opens a new session-scoped handle, used by the Distributed
    /// Transaction (C7) to run a multi-document ACID transaction.
    async fn start_session(&self) -> CoreResult<DocumentSession>;

    /// Ensures the index needed for a bulk query path exists; a no-op if it
    /// already does.
    async fn ensure_index(&self, collection: &str, keys: Document) -> CoreResult<()>;

    async fn ping(&self) -> CoreResult<()>;
}

/// A document-store backed by MongoDB.
pub struct MongoDocumentBackend {
    client: Client,
    database: String,
}

impl MongoDocumentBackend {
    pub async fn connect(uri: &str, database: impl Into<String>) -> CoreResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| CoreError::DocumentUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            database: database.into(),
        })
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.client.database(&self.database).collection(name)
    }
}

#[async_trait]
impl DocumentBackend for MongoDocumentBackend {
    async fn find_one(&self, collection: &str, filter: Document) -> CoreResult<Option<Document>> {
        Ok(self
            .collection(collection)
            .find_one(filter)
            .await?)
    }

    async fn upsert(&self, collection: &str, filter: Document, update: Document) -> CoreResult<()> {
        self.collection(collection)
            .update_one(filter, mongodb::bson::doc! { "$set": update })
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn bulk_upsert(&self, ops: Vec<UpsertOp>) -> CoreResult<()> {
        for op in ops {
            self.upsert(&op.collection, op.filter, op.update).await?;
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: Document) -> CoreResult<bool> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count > 0)
    }

    async fn start_session(&self) -> CoreResult<DocumentSession> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| CoreError::DocumentUnavailable(e.to_string()))?;
        session
            .start_transaction()
            .await
            .map_err(|e| CoreError::DocumentUnavailable(e.to_string()))?;
        Ok(DocumentSession::new(Arc::new(MongoSessionBackend {
            client: self.client.clone(),
            database: self.database.clone(),
            session: Mutex::new(session),
        })))
    }

    async fn ensure_index(&self, collection: &str, keys: Document) -> CoreResult<()> {
        use mongodb::IndexModel;
        self.collection(collection)
            .create_index(IndexModel::builder().keys(keys).build())
            .await?;
        Ok(())
    }

    async fn ping(&self) -> CoreResult<()> {
        self.client
            .database(&self.database)
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await?;
        Ok(())
    }
}

/// The operations the Distributed Transaction (C7) needs from an open,
/// transaction-scoped document-store session: document operations plus
/// commit/abort. A trait seam, mirroring [`CacheBackend`]/[`DocumentBackend`],
/// so tests can run the transaction manager against an in-memory fake
/// rather than a live replica-set transaction.
#[async_trait]
pub trait DocumentSessionBackend: Send + Sync {
    async fn upsert(&self, collection: &str, filter: Document, update: Document) -> CoreResult<()>;
    async fn find_one(&self, collection: &str, filter: Document) -> CoreResult<Option<Document>>;
    async fn commit(&self) -> CoreResult<()>;
    async fn abort(&self) -> CoreResult<()>;
}

/// A handle to an open document-store session with an active transaction,
/// used by the Distributed Transaction (C7) to group document operations
/// under a single commit/abort.
#[derive(Clone)]
pub struct DocumentSession {
    backend: Arc<dyn DocumentSessionBackend>,
}

impl DocumentSession {
    pub fn new(backend: Arc<dyn DocumentSessionBackend>) -> Self {
        Self { backend }
    }

    pub async fn upsert(&self, collection: &str, filter: Document, update: Document) -> CoreResult<()> {
        self.backend.upsert(collection, filter, update).await
    }

    pub async fn find_one(&self, collection: &str, filter: Document) -> CoreResult<Option<Document>> {
        self.backend.find_one(collection, filter).await
    }

    pub async fn commit(self) -> CoreResult<()> {
        self.backend.commit().await
    }

    pub async fn abort(self) -> CoreResult<()> {
        self.backend.abort().await
    }
}

/// [`DocumentSessionBackend`] over a real MongoDB `ClientSession`.
struct MongoSessionBackend {
    client: Client,
    database: String,
    session: Mutex<ClientSession>,
}

#[async_trait]
impl DocumentSessionBackend for MongoSessionBackend {
    async fn upsert(&self, collection: &str, filter: Document, update: Document) -> CoreResult<()> {
        let coll = self.client.database(&self.database).collection::<Document>(collection);
        let mut session = self.session.lock().await;
        coll.update_one(filter, mongodb::bson::doc! { "$set": update })
            .upsert(true)
            .session(&mut *session)
            .await?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: Document) -> CoreResult<Option<Document>> {
        let coll = self.client.database(&self.database).collection::<Document>(collection);
        let mut session = self.session.lock().await;
        Ok(coll.find_one(filter).session(&mut *session).await?)
    }

    async fn commit(&self) -> CoreResult<()> {
        let mut session = self.session.lock().await;
        session
            .commit_transaction()
            .await
            .map_err(|e| CoreError::DocumentUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn abort(&self) -> CoreResult<()> {
        let mut session = self.session.lock().await;
        session
            .abort_transaction()
            .await
            .map_err(|e| CoreError::DocumentUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Thin namespacing wrapper matching the shape of `CacheStoreAdapter`, kept
/// for symmetry and so callers depend on one adapter type per store rather
/// than the raw backend trait object.
#[derive(Clone)]
pub struct DocumentStoreAdapter {
    backend: Arc<dyn DocumentBackend>,
}

impl DocumentStoreAdapter {
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self { backend }
    }

    pub async fn find_one(&self, collection: &str, filter: Document) -> CoreResult<Option<Document>> {
        self.backend.find_one(collection, filter).await
    }

    pub async fn upsert(&self, collection: &str, filter: Document, update: Document) -> CoreResult<()> {
        self.backend.upsert(collection, filter, update).await
    }

    pub async fn bulk_upsert(&self, ops: Vec<UpsertOp>) -> CoreResult<()> {
        self.backend.bulk_upsert(ops).await
    }

    pub async fn delete(&self, collection: &str, filter: Document) -> CoreResult<bool> {
        self.backend.delete(collection, filter).await
    }

    pub async fn start_session(&self) -> CoreResult<DocumentSession> {
        self.backend.start_session().await
    }

    pub async fn ensure_index(&self, collection: &str, keys: Document) -> CoreResult<()> {
        self.backend.ensure_index(collection, keys).await
    }

    pub async fn ping(&self) -> CoreResult<()> {
        self.backend.ping().await
    }
}

/// An in-memory `DocumentBackend` used by component tests.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub struct FakeDocumentBackend {
        collections: Arc<SyncMutex<HashMap<String, Vec<Document>>>>,
        /// When set, the next session opened against this backend fails
        /// its `commit()` call exactly once, then clears itself. Lets
        /// tests exercise the Distributed Transaction's partial-commit and
        /// rollback paths without a real replica set.
        fail_next_commit: Arc<AtomicBool>,
    }

    impl FakeDocumentBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Arranges for the next session's `commit()` to fail.
        pub fn fail_next_commit(&self) {
            self.fail_next_commit.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DocumentBackend for FakeDocumentBackend {
        async fn find_one(&self, collection: &str, filter: Document) -> CoreResult<Option<Document>> {
            let collections = self.collections.lock();
            let docs = collections.get(collection);
            Ok(docs
                .and_then(|docs| docs.iter().find(|d| matches_filter(d, &filter)).cloned()))
        }

        async fn upsert(&self, collection: &str, filter: Document, update: Document) -> CoreResult<()> {
            let mut collections = self.collections.lock();
            let docs = collections.entry(collection.to_string()).or_default();
            if let Some(existing) = docs.iter_mut().find(|d| matches_filter(d, &filter)) {
                for (k, v) in update.iter() {
                    existing.insert(k.clone(), v.clone());
                }
            } else {
                let mut merged = filter.clone();
                for (k, v) in update.iter() {
                    merged.insert(k.clone(), v.clone());
                }
                docs.push(merged);
            }
            Ok(())
        }

        async fn bulk_upsert(&self, ops: Vec<UpsertOp>) -> CoreResult<()> {
            for op in ops {
                self.upsert(&op.collection, op.filter, op.update).await?;
            }
            Ok(())
        }

        async fn delete(&self, collection: &str, filter: Document) -> CoreResult<bool> {
            let mut collections = self.collections.lock();
            if let Some(docs) = collections.get_mut(collection) {
                let before = docs.len();
                docs.retain(|d| !matches_filter(d, &filter));
                return Ok(docs.len() != before);
            }
            Ok(false)
        }

        async fn start_session(&self) -> CoreResult<DocumentSession> {
            let should_fail = self.fail_next_commit.swap(false, Ordering::SeqCst);
            Ok(DocumentSession::new(Arc::new(FakeSessionBackend {
                collections: self.collections.clone(),
                staged: SyncMutex::new(Vec::new()),
                fail_commit: should_fail,
            })))
        }

        async fn ensure_index(&self, _collection: &str, _keys: Document) -> CoreResult<()> {
            Ok(())
        }

        async fn ping(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    fn matches_filter(doc: &Document, filter: &Document) -> bool {
        filter.iter().all(|(k, v)| doc.get(k) == Some(v))
    }

    /// A fake transaction-scoped session. Writes are staged locally and
    /// only applied to the shared collection map on `commit()`, giving the
    /// transaction-rollback tests real isolation without a Mongo replica
    /// set.
    struct FakeSessionBackend {
        collections: Arc<SyncMutex<HashMap<String, Vec<Document>>>>,
        staged: SyncMutex<Vec<UpsertOp>>,
        fail_commit: bool,
    }

    #[async_trait]
    impl DocumentSessionBackend for FakeSessionBackend {
        async fn upsert(&self, collection: &str, filter: Document, update: Document) -> CoreResult<()> {
            self.staged.lock().push(UpsertOp {
                collection: collection.to_string(),
                filter,
                update,
            });
            Ok(())
        }

        async fn find_one(&self, collection: &str, filter: Document) -> CoreResult<Option<Document>> {
            // Reads inside the fake transaction see committed state plus
            // anything already staged by this same session.
            let staged = self.staged.lock();
            if let Some(op) = staged
                .iter()
                .rev()
                .find(|op| op.collection == collection && matches_filter(&op.filter, &filter))
            {
                let mut merged = op.filter.clone();
                for (k, v) in op.update.iter() {
                    merged.insert(k.clone(), v.clone());
                }
                return Ok(Some(merged));
            }
            drop(staged);
            let collections = self.collections.lock();
            Ok(collections
                .get(collection)
                .and_then(|docs| docs.iter().find(|d| matches_filter(d, &filter)).cloned()))
        }

        async fn commit(&self) -> CoreResult<()> {
            if self.fail_commit {
                return Err(CoreError::DocumentUnavailable(
                    "simulated commit failure".into(),
                ));
            }
            let staged = self.staged.lock();
            let mut collections = self.collections.lock();
            for op in staged.iter() {
                let docs = collections.entry(op.collection.clone()).or_default();
                if let Some(existing) = docs.iter_mut().find(|d| matches_filter(d, &op.filter)) {
                    for (k, v) in op.update.iter() {
                        existing.insert(k.clone(), v.clone());
                    }
                } else {
                    let mut merged = op.filter.clone();
                    for (k, v) in op.update.iter() {
                        merged.insert(k.clone(), v.clone());
                    }
                    docs.push(merged);
                }
            }
            Ok(())
        }

        async fn abort(&self) -> CoreResult<()> {
            self.staged.lock().clear();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeDocumentBackend;
    use super::*;
    use mongodb::bson::doc;

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let backend = Arc::new(FakeDocumentBackend::new());
        let adapter = DocumentStoreAdapter::new(backend);
        adapter
            .upsert("players", doc! {"_id": "p1"}, doc! {"name": "Ada"})
            .await
            .unwrap();
        let found = adapter.find_one("players", doc! {"_id": "p1"}).await.unwrap();
        assert_eq!(found.unwrap().get_str("name").unwrap(), "Ada");
    }

    #[tokio::test]
    async fn delete_removes_matching_documents() {
        let backend = Arc::new(FakeDocumentBackend::new());
        let adapter = DocumentStoreAdapter::new(backend);
        adapter
            .upsert("players", doc! {"_id": "p1"}, doc! {"name": "Ada"})
            .await
            .unwrap();
        assert!(adapter.delete("players", doc! {"_id": "p1"}).await.unwrap());
        assert!(adapter.find_one("players", doc! {"_id": "p1"}).await.unwrap().is_none());
    }
}
