// src/conflict/version.rs

//! The Version Record (spec §3): one per tracked logical entity, kept by
//! the Conflict Detector under key `version:<logical-key>` (spec §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version bookkeeping for one logical entity. The digest is a fingerprint
/// of the serialized payload (spec §3); the payload itself is stored
/// separately so policies that need to compare against it (FirstWriteWins,
/// Merge) have something to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub logical_key: String,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub digest: [u8; 32],
    pub writer_id: String,
}

impl VersionRecord {
    pub fn new(logical_key: impl Into<String>, version: u64, digest: [u8; 32], writer_id: impl Into<String>) -> Self {
        Self {
            logical_key: logical_key.into(),
            version,
            last_modified: Utc::now(),
            digest,
            writer_id: writer_id.into(),
        }
    }
}
