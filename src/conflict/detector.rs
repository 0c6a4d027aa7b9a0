// src/conflict/detector.rs

//! Optimistic concurrency checks and resolution policies over logical
//! entities (spec §4.6). A [`ConflictDetector`] reads and writes a
//! [`VersionRecord`] per key under `version:<logical-key>` (spec §6),
//! serializing the read-modify-write through the same [`DistributedLock`]
//! every other multi-step mutation in this crate uses (spec §4.6:
//! "concurrent callers serialize through the same distributed lock").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::CoreResult;
use crate::lock::DistributedLock;
use crate::metrics::CONFLICT_DETECTED_TOTAL;
use crate::serialization;
use crate::store::CacheStoreAdapter;
use crate::sync::entity::{EntityKind, PersistenceHandler};

use super::version::VersionRecord;

/// The resolution policy a caller selects for a version-checked write
/// (spec §4.6 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    OptimisticLock,
    LastWriteWins,
    FirstWriteWins,
    Merge,
    UserChoice,
}

impl ConflictPolicy {
    fn label(self) -> &'static str {
        match self {
            ConflictPolicy::OptimisticLock => "optimistic-lock",
            ConflictPolicy::LastWriteWins => "last-write-wins",
            ConflictPolicy::FirstWriteWins => "first-write-wins",
            ConflictPolicy::Merge => "merge",
            ConflictPolicy::UserChoice => "user-choice",
        }
    }
}

/// What actually happened to the stored value after a check (the outcome
/// discriminator spec §9 asks callers to see instead of an exception).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// No conflict: the caller's expected version matched (or nothing was
    /// stored yet); the write was applied as-is.
    Applied,
    /// `OptimisticLock`, or `Merge` falling back to it: the write was
    /// rejected; the caller must reload and retry.
    Rejected,
    /// `LastWriteWins`: the caller's payload overwrote the stored one.
    Overwrite,
    /// `FirstWriteWins`: the stored payload was kept; the caller's write
    /// was discarded.
    KeptStored,
    /// `Merge` succeeded: a type-specific merge produced a new payload.
    Merged,
    /// `UserChoice`: both payloads are returned for the caller to decide
    /// later; nothing was written.
    UserChoicePending,
}

/// The result of [`ConflictDetector::check_and_write`].
#[derive(Debug, Clone)]
pub struct ConflictOutcome {
    pub has_conflict: bool,
    pub resolution: ConflictResolution,
    pub version: u64,
    /// The payload now stored for this key (unchanged from before the call
    /// for `Rejected`/`KeptStored`/`UserChoicePending`).
    pub stored_payload: Vec<u8>,
    /// The payload the caller originally submitted; only distinct from
    /// `stored_payload` when the resolution didn't apply it.
    pub caller_payload: Vec<u8>,
}

fn version_key(key: &str) -> String {
    format!("version:{key}")
}

fn payload_key(key: &str) -> String {
    format!("version-payload:{key}")
}

/// Optimistic-concurrency checker. One instance is shared by every caller
/// that writes version-tracked entities.
pub struct ConflictDetector {
    cache: CacheStoreAdapter,
    lock: Arc<DistributedLock>,
    handlers: HashMap<EntityKind, Arc<dyn PersistenceHandler>>,
    lock_expiry: Duration,
    lock_wait: Duration,
}

impl ConflictDetector {
    pub fn new(cache: CacheStoreAdapter, lock: Arc<DistributedLock>) -> Self {
        Self {
            cache,
            lock,
            handlers: HashMap::new(),
            lock_expiry: Duration::from_secs(5),
            lock_wait: Duration::from_secs(2),
        }
    }

    /// Registers a per-entity-kind merge handler (spec §9: "a pluggable
    /// callback"). Kinds with no registered handler fall back to the
    /// default `PersistenceHandler::merge` (always succeeds, favoring the
    /// incoming payload).
    pub fn register_handler(&mut self, handler: Arc<dyn PersistenceHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    async fn read_record(&self, key: &str) -> CoreResult<Option<VersionRecord>> {
        match self.cache.get(&version_key(key)).await? {
            Some(bytes) => Ok(Some(serialization::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_payload(&self, key: &str) -> CoreResult<Vec<u8>> {
        Ok(self.cache.get(&payload_key(key)).await?.unwrap_or_default())
    }

    async fn store(&self, key: &str, record: &VersionRecord, payload: &[u8]) -> CoreResult<()> {
        let encoded = serialization::encode(record)?;
        self.cache.set(&version_key(key), encoded, None).await?;
        self.cache.set(&payload_key(key), payload.to_vec(), None).await?;
        Ok(())
    }

    /// Checks `expected_version` against the stored [`VersionRecord`] for
    /// `key` and applies `policy` on mismatch. The whole read-modify-write
    /// is serialized under a distributed lock so two concurrent callers
    /// for the same key never race: the version returned by each
    /// successful resolution is always strictly greater than the one
    /// before it.
    pub async fn check_and_write(
        &self,
        entity: EntityKind,
        key: &str,
        expected_version: u64,
        payload: Vec<u8>,
        writer_id: &str,
        policy: ConflictPolicy,
    ) -> CoreResult<ConflictOutcome> {
        let cancel = CancellationToken::new();
        let guard = self
            .lock
            .acquire(&format!("conflict:{key}"), self.lock_expiry, self.lock_wait, &cancel)
            .await?;

        let result = self
            .resolve(entity, key, expected_version, payload, writer_id, policy)
            .await;

        let _ = guard.release().await;
        result
    }

    async fn resolve(
        &self,
        entity: EntityKind,
        key: &str,
        expected_version: u64,
        payload: Vec<u8>,
        writer_id: &str,
        policy: ConflictPolicy,
    ) -> CoreResult<ConflictOutcome> {
        let stored = self.read_record(key).await?;
        let stored_version = stored.as_ref().map(|r| r.version).unwrap_or(0);

        if stored_version == expected_version {
            let new_version = stored_version + 1;
            let digest = serialization::digest(&payload);
            let record = VersionRecord::new(key, new_version, digest, writer_id);
            self.store(key, &record, &payload).await?;
            return Ok(ConflictOutcome {
                has_conflict: false,
                resolution: ConflictResolution::Applied,
                version: new_version,
                stored_payload: payload.clone(),
                caller_payload: payload,
            });
        }

        CONFLICT_DETECTED_TOTAL.with_label_values(&[policy.label()]).inc();
        let stored_payload = self.read_payload(key).await?;

        match policy {
            ConflictPolicy::OptimisticLock => Ok(ConflictOutcome {
                has_conflict: true,
                resolution: ConflictResolution::Rejected,
                version: stored_version,
                stored_payload: stored_payload.clone(),
                caller_payload: payload,
            }),
            ConflictPolicy::LastWriteWins => {
                let new_version = stored_version + 1;
                let digest = serialization::digest(&payload);
                let record = VersionRecord::new(key, new_version, digest, writer_id);
                self.store(key, &record, &payload).await?;
                Ok(ConflictOutcome {
                    has_conflict: true,
                    resolution: ConflictResolution::Overwrite,
                    version: new_version,
                    stored_payload: payload.clone(),
                    caller_payload: payload,
                })
            }
            ConflictPolicy::FirstWriteWins => Ok(ConflictOutcome {
                has_conflict: true,
                resolution: ConflictResolution::KeptStored,
                version: stored_version,
                stored_payload: stored_payload.clone(),
                caller_payload: payload,
            }),
            ConflictPolicy::Merge => {
                let handler = self.handlers.get(&entity);
                let merged = match handler {
                    Some(h) => h.merge(&stored_payload, &payload),
                    None => crate::sync::entity::GenericPersistenceHandler.merge(&stored_payload, &payload),
                };
                match merged {
                    Some(merged_payload) => {
                        let new_version = stored_version + 1;
                        let digest = serialization::digest(&merged_payload);
                        let record = VersionRecord::new(key, new_version, digest, writer_id);
                        self.store(key, &record, &merged_payload).await?;
                        Ok(ConflictOutcome {
                            has_conflict: true,
                            resolution: ConflictResolution::Merged,
                            version: new_version,
                            stored_payload: merged_payload,
                            caller_payload: payload,
                        })
                    }
                    None => {
                        warn!(key, "merge failed; falling back to optimistic-lock rejection");
                        Ok(ConflictOutcome {
                            has_conflict: true,
                            resolution: ConflictResolution::Rejected,
                            version: stored_version,
                            stored_payload: stored_payload.clone(),
                            caller_payload: payload,
                        })
                    }
                }
            }
            ConflictPolicy::UserChoice => Ok(ConflictOutcome {
                has_conflict: true,
                resolution: ConflictResolution::UserChoicePending,
                version: stored_version,
                stored_payload,
                caller_payload: payload,
            }),
        }
    }
}
