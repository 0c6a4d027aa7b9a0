// src/cache_strategy/lru.rs

//! The per-key last-access map the Cache Strategy uses for LRU admission
//! (spec §4.4): "the strategy maintains a per-key last-access timestamp
//! map. On `set` and on any successful `get`/`exists`, the map is updated."

use std::time::Instant;

use dashmap::DashMap;

/// Tracks the last-access instant for every key the Cache Strategy has
/// touched locally. This is an in-process admission hint, not a source of
/// truth: the cache store itself owns TTL expiry.
#[derive(Default)]
pub struct LruTracker {
    last_access: DashMap<String, Instant>,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, key: &str) {
        self.last_access.insert(key.to_string(), Instant::now());
    }

    pub fn remove(&self, key: &str) {
        self.last_access.remove(key);
    }

    pub fn len(&self) -> usize {
        self.last_access.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_access.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.last_access.contains_key(key)
    }

    /// Returns every tracked key, used by the cleanup task to probe the
    /// store-side TTL of each.
    pub fn snapshot_keys(&self) -> Vec<String> {
        self.last_access.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns the `n` keys with the oldest last-access instant, used by
    /// both `evict_lru` and the periodic admission check in `set`.
    pub fn oldest(&self, n: usize) -> Vec<String> {
        if n == 0 {
            return Vec::new();
        }
        let mut entries: Vec<(String, Instant)> =
            self.last_access.iter().map(|e| (e.key().clone(), *e.value())).collect();
        entries.sort_by_key(|(_, instant)| *instant);
        entries.into_iter().take(n).map(|(key, _)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn oldest_returns_keys_in_ascending_access_order() {
        let tracker = LruTracker::new();
        tracker.touch("a");
        sleep(Duration::from_millis(5));
        tracker.touch("b");
        sleep(Duration::from_millis(5));
        tracker.touch("c");

        assert_eq!(tracker.oldest(2), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn touch_then_remove_updates_len() {
        let tracker = LruTracker::new();
        tracker.touch("k");
        assert_eq!(tracker.len(), 1);
        tracker.remove("k");
        assert_eq!(tracker.len(), 0);
    }
}
