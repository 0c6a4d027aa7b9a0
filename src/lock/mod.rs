// src/lock/mod.rs

//! The Distributed Lock (C3): a fenced mutual-exclusion primitive over the
//! Cache Store Adapter, with optional background auto-renewal.

pub mod distributed_lock;
pub mod renewal;

pub use distributed_lock::{DistributedLock, LockGuard, LockStatistics};
pub use renewal::LockRenewalTask;
