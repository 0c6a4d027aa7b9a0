// src/sync/write_behind.rs

//! The write-behind queue (spec §3 "Write-Behind Item", §4.5): items are
//! enqueued on write, drained in FIFO within a type group, and re-enqueued
//! exactly once per flush cycle on persistence failure.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use super::entity::EntityKind;

/// One queued deferred write.
#[derive(Clone)]
pub struct WriteBehindItem {
    pub key: String,
    pub entity: EntityKind,
    pub payload: Vec<u8>,
    pub enqueued_at: Instant,
}

/// A bounded FIFO queue of [`WriteBehindItem`]s. Producers are any code
/// path using the write-behind strategy; a single flush worker drains it
/// in batches (spec §5: "a single flush worker drains in batches").
#[derive(Default)]
pub struct WriteBehindQueue {
    items: Mutex<VecDeque<WriteBehindItem>>,
    max_pending: usize,
}

impl WriteBehindQueue {
    pub fn new(max_pending: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_pending,
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_pending
    }

    /// Appends an item, returning `true` if the queue had to make room
    /// (was already at capacity) right before admitting it — the caller
    /// uses this as the "trigger an immediate flush" signal from spec §8:
    /// "write-behind with the queue exactly full triggers an immediate
    /// flush and admits the new item iff space frees."
    pub fn push(&self, item: WriteBehindItem) -> bool {
        let mut items = self.items.lock();
        let was_full = items.len() >= self.max_pending;
        items.push_back(item);
        was_full
    }

    /// Removes and returns up to `n` items from the front of the queue.
    pub fn drain_batch(&self, n: usize) -> Vec<WriteBehindItem> {
        let mut items = self.items.lock();
        let drain_count = n.min(items.len());
        items.drain(..drain_count).collect()
    }

    /// Puts a previously drained batch back at the front, preserving FIFO
    /// order, used when a flush attempt fails and the batch must be
    /// retried next cycle.
    pub fn requeue_front(&self, batch: Vec<WriteBehindItem>) {
        let mut items = self.items.lock();
        for item in batch.into_iter().rev() {
            items.push_front(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str) -> WriteBehindItem {
        WriteBehindItem {
            key: key.to_string(),
            entity: EntityKind::generic(),
            payload: vec![1, 2, 3],
            enqueued_at: Instant::now(),
        }
    }

    #[test]
    fn drain_batch_respects_fifo_order() {
        let queue = WriteBehindQueue::new(10);
        queue.push(item("a"));
        queue.push(item("b"));
        let batch = queue.drain_batch(10);
        assert_eq!(batch[0].key, "a");
        assert_eq!(batch[1].key, "b");
    }

    #[test]
    fn push_signals_when_queue_was_already_full() {
        let queue = WriteBehindQueue::new(1);
        assert!(!queue.push(item("a")));
        assert!(queue.push(item("b")));
    }

    #[test]
    fn requeue_front_preserves_order_for_retry() {
        let queue = WriteBehindQueue::new(10);
        queue.push(item("c"));
        let batch = queue.drain_batch(10);
        queue.requeue_front(batch);
        let redrained = queue.drain_batch(10);
        assert_eq!(redrained[0].key, "c");
    }
}
