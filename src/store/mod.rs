// src/store/mod.rs

//! The Cache Store Adapter (C1) and Document Store Adapter (C2): typed
//! facades over the two backing stores, plus the trait seams
//! (`CacheBackend`/`DocumentBackend`) that let the rest of the crate stay
//! agnostic of which concrete client library is behind them.

pub mod cache_adapter;
pub mod document_adapter;

pub use cache_adapter::{CacheStoreAdapter, HashFieldValue};
pub use document_adapter::{DocumentSession, DocumentStoreAdapter};
