// src/error.rs

//! The primary error type for the entire crate.
//!
//! `thiserror` gives each variant a stable, human-readable message and the
//! automatic `From` impls needed to propagate lower-level failures with `?`.
//! This taxonomy is a direct implementation of spec §7's error list.

use std::sync::Arc;
use thiserror::Error;

use crate::conflict::ConflictPolicy;

/// The main error enum, covering every failure mode named in spec §7.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// The cache store was not reachable after the configured retry budget.
    #[error("cache store unavailable: {0}")]
    CacheUnavailable(String),

    /// The document store was not reachable after the configured retry budget.
    #[error("document store unavailable: {0}")]
    DocumentUnavailable(String),

    /// `try_acquire` failed because another owner holds the lock and the
    /// configured wait was exhausted.
    #[error("lock contended for key {0}")]
    LockContended(String),

    /// An operation was attempted under a token that is no longer owned
    /// (renewal failed, or the TTL elapsed and another owner took the key).
    #[error("lock lost for key {0}: {1}")]
    LockLost(String, String),

    /// The conflict detector observed mismatched versions.
    #[error("version conflict on {key}: stored={stored_version}, expected={expected_version}, resolution={resolution:?}")]
    VersionConflict {
        key: String,
        stored_version: u64,
        expected_version: u64,
        resolution: ConflictPolicy,
    },

    /// A transaction was rolled back (timeout, conflict, or explicit abort).
    #[error("transaction {0} aborted: {1}")]
    TransactionAborted(String, String),

    /// A transaction's document phase committed but cache compensation
    /// failed; the affected keys require reconciliation.
    #[error("transaction {transaction_id} partially committed; keys require reconciliation: {keys:?}")]
    TransactionPartial {
        transaction_id: String,
        keys: Vec<String>,
    },

    /// A bounded resource (session pool, write-behind queue) is at capacity.
    #[error("pool full: {0}")]
    PoolFull(String),

    /// The caller's principal does not match the session's claim, or the
    /// credential is expired/invalid.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A routed message violates a routing constraint (hop count, deadline,
    /// malformed target).
    #[error("invalid route: {0}")]
    RouteInvalid(String),

    /// A required argument was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The calling operation was cancelled or exceeded its deadline.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// An invariant the crate relies on was violated; this should never
    /// happen in correct operation and is distinct from recoverable faults.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// Wraps an I/O error from the underlying store clients. Boxed in an
    /// `Arc` so the enum as a whole can stay `Clone`.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(Arc::new(e))
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::CacheUnavailable(e.to_string())
    }
}

impl From<mongodb::error::Error> for CoreError {
    fn from(e: mongodb::error::Error) -> Self {
        CoreError::DocumentUnavailable(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
