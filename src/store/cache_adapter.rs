// src/store/cache_adapter.rs

//! The Cache Store Adapter (C1): a typed facade over a key-value store.
//!
//! [`CacheBackend`] is the trait seam; production code runs on
//! [`RedisCacheBackend`], and tests can supply an in-memory fake instead of
//! standing up a real Redis instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::{CoreError, CoreResult};

/// A single hash field and its serialized value, used by batched hash
/// operations.
pub type HashFieldValue = (String, Vec<u8>);

/// Coarse keyspace statistics, surfaced as part of the Cache Strategy's
/// statistics snapshot (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct KeyspaceInfo {
    pub approximate_key_count: u64,
    pub used_memory_bytes: u64,
}

/// The operations the Cache Strategy, Distributed Lock, and Conflict
/// Detector need from a key-value store: plain get/set with TTL, hash
/// operations, and the two compare-and-* primitives that give the lock its
/// fencing discipline (spec §4.1, §4.3).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()>;
    async fn delete(&self, key: &str) -> CoreResult<bool>;
    async fn exists(&self, key: &str) -> CoreResult<bool>;
    async fn ttl(&self, key: &str) -> CoreResult<Option<Duration>>;
    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<bool>;

    async fn hash_get(&self, key: &str, field: &str) -> CoreResult<Option<Vec<u8>>>;
    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> CoreResult<()>;
    async fn hash_delete(&self, key: &str, field: &str) -> CoreResult<bool>;

    async fn get_many(&self, keys: &[String]) -> CoreResult<Vec<Option<Vec<u8>>>>;
    async fn set_many(&self, items: &[(String, Vec<u8>, Option<Duration>)]) -> CoreResult<()>;

    /// Atomic "set if absent" used by the lock's `try-acquire`.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<bool>;

    /// Scripted compare-and-delete: deletes `key` only if its stored value
    /// equals `expected`. Backs the lock's `release`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CoreResult<bool>;

    /// Scripted compare-and-expire: updates `key`'s TTL only if its stored
    /// value equals `expected`. Backs the lock's `renew`.
    async fn compare_and_expire(&self, key: &str, expected: &[u8], ttl: Duration) -> CoreResult<bool>;

    async fn keyspace_info(&self) -> CoreResult<KeyspaceInfo>;

    /// Cheap reachability probe for `/healthz`.
    async fn ping(&self) -> CoreResult<()>;
}

const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

const COMPARE_AND_EXPIRE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// A `CacheBackend` backed by a real Redis (or Redis-compatible) server,
/// using a multiplexed [`ConnectionManager`] that reconnects automatically.
pub struct RedisCacheBackend {
    conn: ConnectionManager,
    compare_and_delete: redis::Script,
    compare_and_expire: redis::Script,
}

impl RedisCacheBackend {
    /// Connects to `redis_url`, building the `ConnectionManager` that
    /// handles multiplexing and automatic reconnection for every call site
    /// sharing this adapter (spec §4.1: "connection multiplexing, automatic
    /// reconnection").
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;
        Ok(Self {
            conn,
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
            compare_and_expire: redis::Script::new(COMPARE_AND_EXPIRE_SCRIPT),
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn ttl(&self, key: &str) -> CoreResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let seconds: i64 = conn.ttl(key).await?;
        Ok(if seconds >= 0 {
            Some(Duration::from_secs(seconds as u64))
        } else {
            None
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.expire(key, ttl.as_secs().max(1) as i64).await?)
    }

    async fn hash_get(&self, key: &str, field: &str) -> CoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.hdel(key, field).await?;
        Ok(deleted > 0)
    }

    async fn get_many(&self, keys: &[String]) -> CoreResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }
        Ok(pipe.query_async(&mut conn).await?)
    }

    async fn set_many(&self, items: &[(String, Vec<u8>, Option<Duration>)]) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (key, value, ttl) in items {
            match ttl {
                Some(ttl) => {
                    pipe.set_ex(key, value.clone(), ttl.as_secs().max(1));
                }
                None => {
                    pipe.set(key, value.clone());
                }
            }
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn compare_and_expire(&self, key: &str, expected: &[u8], ttl: Duration) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .compare_and_expire
            .key(key)
            .arg(expected)
            .arg(ttl.as_millis().max(1) as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn keyspace_info(&self) -> CoreResult<KeyspaceInfo> {
        let mut conn = self.conn.clone();
        let raw: String = redis::cmd("INFO")
            .arg("keyspace")
            .arg("memory")
            .query_async(&mut conn)
            .await?;
        Ok(parse_info(&raw))
    }

    async fn ping(&self) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

fn parse_info(raw: &str) -> KeyspaceInfo {
    let mut info = KeyspaceInfo::default();
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("used_memory:") {
            info.used_memory_bytes = value.trim().parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("db0:") {
            if let Some(keys_part) = rest.split(',').next() {
                if let Some(count) = keys_part.strip_prefix("keys=") {
                    info.approximate_key_count = count.trim().parse().unwrap_or(0);
                }
            }
        }
    }
    info
}

/// Thin namespacing wrapper the rest of the crate talks to; holds a shared
/// backend and the configured global key prefix (spec §6: key prefixes are
/// configurable).
#[derive(Clone)]
pub struct CacheStoreAdapter {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
}

impl CacheStoreAdapter {
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Selects a logical sub-database by namespacing every key under it,
    /// mirroring the `database(index)` selector of spec §4.1 without
    /// requiring the backend to support Redis's `SELECT`.
    pub fn database(&self, index: u32) -> Self {
        Self {
            backend: self.backend.clone(),
            prefix: format!("{}:db{index}", self.prefix),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        self.backend.get(&self.namespaced(key)).await
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        self.backend.set(&self.namespaced(key), value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> CoreResult<bool> {
        self.backend.delete(&self.namespaced(key)).await
    }

    pub async fn exists(&self, key: &str) -> CoreResult<bool> {
        self.backend.exists(&self.namespaced(key)).await
    }

    pub async fn ttl(&self, key: &str) -> CoreResult<Option<Duration>> {
        self.backend.ttl(&self.namespaced(key)).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<bool> {
        self.backend.expire(&self.namespaced(key), ttl).await
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> CoreResult<Option<Vec<u8>>> {
        self.backend.hash_get(&self.namespaced(key), field).await
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> CoreResult<()> {
        self.backend.hash_set(&self.namespaced(key), field, value).await
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> CoreResult<bool> {
        self.backend.hash_delete(&self.namespaced(key), field).await
    }

    pub async fn get_many(&self, keys: &[String]) -> CoreResult<Vec<Option<Vec<u8>>>> {
        let namespaced: Vec<String> = keys.iter().map(|k| self.namespaced(k)).collect();
        self.backend.get_many(&namespaced).await
    }

    pub async fn set_many(&self, items: &[(String, Vec<u8>, Option<Duration>)]) -> CoreResult<()> {
        let namespaced: Vec<(String, Vec<u8>, Option<Duration>)> = items
            .iter()
            .map(|(k, v, ttl)| (self.namespaced(k), v.clone(), *ttl))
            .collect();
        self.backend.set_many(&namespaced).await
    }

    pub async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<bool> {
        self.backend.set_if_absent(&self.namespaced(key), value, ttl).await
    }

    pub async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CoreResult<bool> {
        self.backend.compare_and_delete(&self.namespaced(key), expected).await
    }

    pub async fn compare_and_expire(&self, key: &str, expected: &[u8], ttl: Duration) -> CoreResult<bool> {
        self.backend
            .compare_and_expire(&self.namespaced(key), expected, ttl)
            .await
    }

    pub async fn keyspace_info(&self) -> CoreResult<KeyspaceInfo> {
        self.backend.keyspace_info().await
    }

    pub async fn ping(&self) -> CoreResult<()> {
        self.backend.ping().await
    }
}

/// An in-memory `CacheBackend` used by component tests so they don't need a
/// real Redis instance (grounded on the pack's preference for trait-seamed
/// adapters over external services in test code).
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;
    use std::time::Instant;

    #[derive(Default)]
    pub struct FakeCacheBackend {
        entries: Mutex<StdHashMap<String, (Vec<u8>, Option<Instant>)>>,
    }

    impl FakeCacheBackend {
        pub fn new() -> Self {
            Self::default()
        }

        fn is_live(value: &(Vec<u8>, Option<Instant>)) -> bool {
            value.1.map(|deadline| deadline > Instant::now()).unwrap_or(true)
        }
    }

    #[async_trait]
    impl CacheBackend for FakeCacheBackend {
        async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(key) {
                if Self::is_live(entry) {
                    return Ok(Some(entry.0.clone()));
                }
                entries.remove(key);
            }
            Ok(None)
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
            let deadline = ttl.map(|d| Instant::now() + d);
            self.entries.lock().insert(key.to_string(), (value, deadline));
            Ok(())
        }

        async fn delete(&self, key: &str) -> CoreResult<bool> {
            Ok(self.entries.lock().remove(key).is_some())
        }

        async fn exists(&self, key: &str) -> CoreResult<bool> {
            Ok(self.get(key).await?.is_some())
        }

        async fn ttl(&self, key: &str) -> CoreResult<Option<Duration>> {
            let entries = self.entries.lock();
            Ok(entries.get(key).and_then(|(_, deadline)| {
                deadline.map(|d| d.saturating_duration_since(Instant::now()))
            }))
        }

        async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<bool> {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(key) {
                entry.1 = Some(Instant::now() + ttl);
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn hash_get(&self, key: &str, field: &str) -> CoreResult<Option<Vec<u8>>> {
            self.get(&format!("{key}:{field}")).await
        }

        async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> CoreResult<()> {
            self.set(&format!("{key}:{field}"), value, None).await
        }

        async fn hash_delete(&self, key: &str, field: &str) -> CoreResult<bool> {
            self.delete(&format!("{key}:{field}")).await
        }

        async fn get_many(&self, keys: &[String]) -> CoreResult<Vec<Option<Vec<u8>>>> {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                out.push(self.get(key).await?);
            }
            Ok(out)
        }

        async fn set_many(&self, items: &[(String, Vec<u8>, Option<Duration>)]) -> CoreResult<()> {
            for (key, value, ttl) in items {
                self.set(key, value.clone(), *ttl).await?;
            }
            Ok(())
        }

        async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<bool> {
            let mut entries = self.entries.lock();
            if entries.get(key).map(Self::is_live).unwrap_or(false) {
                return Ok(false);
            }
            entries.insert(key.to_string(), (value, Some(Instant::now() + ttl)));
            Ok(true)
        }

        async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CoreResult<bool> {
            let mut entries = self.entries.lock();
            if entries.get(key).map(|(v, _)| v.as_slice() == expected).unwrap_or(false) {
                entries.remove(key);
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn compare_and_expire(&self, key: &str, expected: &[u8], ttl: Duration) -> CoreResult<bool> {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(key) {
                if entry.0.as_slice() == expected {
                    entry.1 = Some(Instant::now() + ttl);
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn keyspace_info(&self) -> CoreResult<KeyspaceInfo> {
            Ok(KeyspaceInfo {
                approximate_key_count: self.entries.lock().len() as u64,
                used_memory_bytes: 0,
            })
        }

        async fn ping(&self) -> CoreResult<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeCacheBackend;
    use super::*;

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let backend = FakeCacheBackend::new();
        assert!(
            backend
                .set_if_absent("k", b"a".to_vec(), Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert!(
            !backend
                .set_if_absent("k", b"b".to_vec(), Duration::from_secs(10))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn compare_and_delete_only_matches_owner() {
        let backend = FakeCacheBackend::new();
        backend.set("k", b"owner-a".to_vec(), None).await.unwrap();
        assert!(!backend.compare_and_delete("k", b"owner-b").await.unwrap());
        assert!(backend.compare_and_delete("k", b"owner-a").await.unwrap());
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adapter_namespaces_keys() {
        let backend = Arc::new(FakeCacheBackend::new());
        let adapter = CacheStoreAdapter::new(backend.clone(), "playhub");
        adapter.set("room:1", b"v".to_vec(), None).await.unwrap();
        assert!(backend.get("playhub:room:1").await.unwrap().is_some());
    }
}
