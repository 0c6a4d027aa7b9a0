// src/transaction/manager.rs

//! The Distributed Transaction (C7): multi-key lock acquisition, a
//! document-store session transaction, and compensating cache operations
//! (spec §4.7).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::config::TransactionConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::{DistributedLock, LockGuard};
use crate::metrics::{
    TRANSACTIONS_ACTIVE, TRANSACTIONS_COMMITTED_TOTAL, TRANSACTIONS_PARTIAL_TOTAL,
    TRANSACTIONS_ROLLED_BACK_TOTAL, TRANSACTIONS_STARTED_TOTAL, TRANSACTIONS_TIMED_OUT_TOTAL,
};
use crate::store::document_adapter::DocumentSession;
use crate::store::{CacheStoreAdapter, DocumentStoreAdapter};

/// One of the four cache operations a transaction may register (spec
/// §4.7: "Allowed ops: set, delete, hash-set, hash-delete").
#[derive(Debug, Clone)]
pub enum CacheOp {
    Set { key: String, value: Vec<u8>, ttl: Option<Duration> },
    Delete { key: String },
    HashSet { key: String, field: String, value: Vec<u8> },
    HashDelete { key: String, field: String },
}

impl CacheOp {
    pub fn key(&self) -> &str {
        match self {
            CacheOp::Set { key, .. }
            | CacheOp::Delete { key }
            | CacheOp::HashSet { key, .. }
            | CacheOp::HashDelete { key, .. } => key,
        }
    }
}

/// A registered cache op together with what was there before it, captured
/// at registration time so the op can be reverse-applied on failure (spec
/// §4.7: "During").
#[derive(Debug, Clone)]
struct CapturedOp {
    op: CacheOp,
    previous_value: Option<Vec<u8>>,
    previous_ttl: Option<Duration>,
}

/// The transaction's lifecycle state (spec §3 "Transaction Record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

async fn apply_cache_op(cache: &CacheStoreAdapter, op: &CacheOp) -> CoreResult<()> {
    match op {
        CacheOp::Set { key, value, ttl } => cache.set(key, value.clone(), *ttl).await,
        CacheOp::Delete { key } => cache.delete(key).await.map(|_| ()),
        CacheOp::HashSet { key, field, value } => cache.hash_set(key, field, value.clone()).await,
        CacheOp::HashDelete { key, field } => cache.hash_delete(key, field).await.map(|_| ()),
    }
}

async fn capture_previous(cache: &CacheStoreAdapter, op: &CacheOp) -> CoreResult<CapturedOp> {
    let (previous_value, previous_ttl) = match op {
        CacheOp::Set { key, .. } | CacheOp::Delete { key } => {
            (cache.get(key).await?, cache.ttl(key).await?)
        }
        CacheOp::HashSet { key, field, .. } | CacheOp::HashDelete { key, field } => {
            (cache.hash_get(key, field).await?, None)
        }
    };
    Ok(CapturedOp {
        op: op.clone(),
        previous_value,
        previous_ttl,
    })
}

async fn compensate(cache: &CacheStoreAdapter, captured: &CapturedOp) -> CoreResult<()> {
    match &captured.op {
        CacheOp::Set { key, .. } | CacheOp::Delete { key } => match &captured.previous_value {
            Some(bytes) => cache.set(key, bytes.clone(), captured.previous_ttl).await,
            None => cache.delete(key).await.map(|_| ()),
        },
        CacheOp::HashSet { key, field, .. } | CacheOp::HashDelete { key, field } => {
            match &captured.previous_value {
                Some(bytes) => cache.hash_set(key, field, bytes.clone()).await,
                None => cache.hash_delete(key, field).await.map(|_| ()),
            }
        }
    }
}

struct TxState {
    locks: Vec<LockGuard>,
    document: Option<DocumentSession>,
    pending: Vec<CapturedOp>,
    cache: CacheStoreAdapter,
    start: Instant,
    timeout: Duration,
    status: TransactionStatus,
}

#[derive(Default)]
struct StatsInner {
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    timed_out: AtomicU64,
}

/// A point-in-time statistics snapshot (spec §4.7: "Statistics").
#[derive(Debug, Clone, Default)]
pub struct TransactionStatistics {
    pub started: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub timed_out: u64,
    pub active_count: u64,
    pub success_rate: f64,
}

/// Coordinates multi-key atomicity across the document store and the
/// cache. One instance is shared by every caller that needs a
/// cross-entity transaction.
pub struct DistributedTransaction {
    cache: CacheStoreAdapter,
    documents: DocumentStoreAdapter,
    lock: Arc<DistributedLock>,
    config: TransactionConfig,
    active: DashMap<String, Arc<AsyncMutex<TxState>>>,
    stats: StatsInner,
}

impl DistributedTransaction {
    pub fn new(
        cache: CacheStoreAdapter,
        documents: DocumentStoreAdapter,
        lock: Arc<DistributedLock>,
        config: TransactionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            documents,
            lock,
            config,
            active: DashMap::new(),
            stats: StatsInner::default(),
        })
    }

    /// Begins a transaction over `keys` with the configured default
    /// timeout.
    pub async fn begin(self: &Arc<Self>, keys: &[String]) -> CoreResult<TransactionHandle> {
        self.begin_with_timeout(keys, self.config.default_timeout).await
    }

    /// Begins a transaction over `keys`: sorts them lexicographically,
    /// acquires one lock per key in that order (spec §4.7: "fixed order
    /// prevents deadlocks"), opens a document-store session/transaction,
    /// and creates an Active Transaction Record.
    pub async fn begin_with_timeout(
        self: &Arc<Self>,
        keys: &[String],
        timeout: Duration,
    ) -> CoreResult<TransactionHandle> {
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        TRANSACTIONS_STARTED_TOTAL.inc();

        let mut sorted: Vec<String> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let lock_expiry = timeout + Duration::from_secs(5);
        let lock_wait = timeout.min(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            match self.lock.acquire(&format!("tx:{key}"), lock_expiry, lock_wait, &cancel).await {
                Ok(guard) => guards.push(guard),
                Err(e) => {
                    for guard in guards {
                        let _ = guard.release().await;
                    }
                    return Err(e);
                }
            }
        }

        let document = match self.documents.start_session().await {
            Ok(session) => session,
            Err(e) => {
                for guard in guards {
                    let _ = guard.release().await;
                }
                return Err(e);
            }
        };

        let id = Uuid::new_v4().to_string();
        let state = Arc::new(AsyncMutex::new(TxState {
            locks: guards,
            document: Some(document),
            pending: Vec::new(),
            cache: self.cache.clone(),
            start: Instant::now(),
            timeout,
            status: TransactionStatus::Active,
        }));
        self.active.insert(id.clone(), state.clone());
        TRANSACTIONS_ACTIVE.inc();

        Ok(TransactionHandle {
            id,
            manager: self.clone(),
            state,
        })
    }

    /// Rolls back every transaction whose elapsed time exceeds its
    /// timeout (spec §4.7: "Cleanup"). Driven by [`TransactionSweeperTask`].
    pub async fn sweep_expired(self: &Arc<Self>) -> usize {
        let mut expired_ids = Vec::new();
        for entry in self.active.iter() {
            if let Ok(state) = entry.value().try_lock() {
                if state.start.elapsed() > state.timeout {
                    expired_ids.push(entry.key().clone());
                }
            }
        }

        let mut swept = 0;
        for id in expired_ids {
            if let Some((_, state)) = self.active.remove(&id) {
                let handle = TransactionHandle {
                    id: id.clone(),
                    manager: self.clone(),
                    state,
                };
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                TRANSACTIONS_TIMED_OUT_TOTAL.inc();
                match handle.rollback().await {
                    Ok(()) => swept += 1,
                    Err(e) => warn!(transaction = %id, error = %e, "timeout rollback failed"),
                }
            }
        }
        swept
    }

    pub fn statistics(&self) -> TransactionStatistics {
        let committed = self.stats.committed.load(Ordering::Relaxed);
        let rolled_back = self.stats.rolled_back.load(Ordering::Relaxed);
        let started = self.stats.started.load(Ordering::Relaxed);
        let terminal = committed + rolled_back;
        TransactionStatistics {
            started,
            committed,
            rolled_back,
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            active_count: self.active.len() as u64,
            success_rate: if terminal > 0 {
                committed as f64 / terminal as f64
            } else {
                0.0
            },
        }
    }
}

/// A handle to one in-flight transaction. Consumed by [`TransactionHandle::commit`]
/// or [`TransactionHandle::rollback`] so a transaction cannot be resolved
/// twice from the same handle.
pub struct TransactionHandle {
    id: String,
    manager: Arc<DistributedTransaction>,
    state: Arc<AsyncMutex<TxState>>,
}

impl TransactionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn status(&self) -> TransactionStatus {
        self.state.lock().await.status
    }

    /// A clone of the open document-store session, for the caller to run
    /// its own document operations against (spec §4.7: "During").
    pub async fn document(&self) -> CoreResult<DocumentSession> {
        self.state
            .lock()
            .await
            .document
            .clone()
            .ok_or_else(|| CoreError::Internal(format!("transaction {} has no open document session", self.id)))
    }

    /// Registers a cache op to be applied at commit time, capturing the
    /// key's current value and TTL for compensation (spec §4.7).
    pub async fn register_cache_op(&self, op: CacheOp) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        if state.status != TransactionStatus::Active {
            return Err(CoreError::TransactionAborted(
                self.id.clone(),
                "cannot register a cache op on a non-active transaction".into(),
            ));
        }
        let captured = capture_previous(&state.cache, &op).await?;
        state.pending.push(captured);
        Ok(())
    }

    /// Commits the document transaction, then applies the registered
    /// cache operations. If the cache phase fails after the document
    /// commit, already-applied cache ops are compensated and a
    /// [`CoreError::TransactionPartial`] is returned (spec §4.7: "Commit").
    pub async fn commit(self) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        state.status = TransactionStatus::Committing;

        let document = state
            .document
            .take()
            .ok_or_else(|| CoreError::Internal(format!("transaction {} has no document session", self.id)))?;

        if let Err(e) = document.commit().await {
            warn!(transaction = %self.id, error = %e, "document commit failed; treating transaction as rolled back");
            state.status = TransactionStatus::RolledBack;
            drop(state);
            self.cleanup().await;
            self.manager.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
            TRANSACTIONS_ROLLED_BACK_TOTAL.inc();
            return Err(CoreError::TransactionAborted(
                self.id.clone(),
                format!("document commit failed: {e}"),
            ));
        }

        let mut applied = Vec::new();
        let mut failure: Option<CoreError> = None;
        for captured in state.pending.clone() {
            match apply_cache_op(&state.cache, &captured.op).await {
                Ok(()) => applied.push(captured),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            for captured in applied.iter().rev() {
                if let Err(ce) = compensate(&state.cache, captured).await {
                    warn!(transaction = %self.id, error = %ce, "cache compensation failed; manual reconciliation required");
                }
            }
            let keys: Vec<String> = state.pending.iter().map(|c| c.op.key().to_string()).collect();
            state.status = TransactionStatus::Failed;
            drop(state);
            self.cleanup().await;
            TRANSACTIONS_PARTIAL_TOTAL.inc();
            warn!(transaction = %self.id, error = %e, "cache phase failed after document commit");
            return Err(CoreError::TransactionPartial {
                transaction_id: self.id.clone(),
                keys,
            });
        }

        state.status = TransactionStatus::Committed;
        drop(state);
        self.cleanup().await;
        self.manager.stats.committed.fetch_add(1, Ordering::Relaxed);
        TRANSACTIONS_COMMITTED_TOTAL.inc();
        Ok(())
    }

    /// Aborts the document transaction. Since cache ops are only applied
    /// at commit time (never eagerly), a pre-commit rollback has nothing
    /// to compensate.
    pub async fn rollback(self) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        state.status = TransactionStatus::RollingBack;
        if let Some(document) = state.document.take() {
            if let Err(e) = document.abort().await {
                warn!(transaction = %self.id, error = %e, "document abort failed");
            }
        }
        state.status = TransactionStatus::RolledBack;
        drop(state);
        self.cleanup().await;
        self.manager.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
        TRANSACTIONS_ROLLED_BACK_TOTAL.inc();
        Ok(())
    }

    async fn cleanup(&self) {
        self.manager.active.remove(&self.id);
        TRANSACTIONS_ACTIVE.dec();
        let locks = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.locks)
        };
        for guard in locks {
            let _ = guard.release().await;
        }
    }
}
