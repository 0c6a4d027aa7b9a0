// src/cache_strategy/mod.rs

//! The Cache Strategy (C4): a unified, category-aware cache facade over the
//! Cache Store Adapter, with LRU admission and periodic expiry cleanup.

pub mod categories;
pub mod lru;
pub mod strategy;
pub mod tasks;

pub use categories::CacheCategory;
pub use strategy::{CacheItem, CacheStatistics, CacheStrategy, WarmupOutcome, WarmupItem};
pub use tasks::CacheCleanupTask;
