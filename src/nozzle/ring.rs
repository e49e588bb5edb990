//! Overwrite-on-full ring buffer for envelope handoff.
//!
//! The ingestion path must never block on a slow consumer: when the
//! ring is full, pushing displaces the oldest unread item and fires the
//! drop alert. Single producer, single consumer, O(1) operations.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback invoked with the cumulative drop count each time a push
/// displaces an unread item.
pub type DropAlert = Box<dyn Fn(u64) + Send + Sync>;

/// Lock-free ring buffer that drops the oldest item when full.
pub struct OverwriteRing<T> {
    queue: ArrayQueue<T>,
    dropped: AtomicU64,
    alert: Option<DropAlert>,
}

impl<T> OverwriteRing<T> {
    /// Create a ring with the given capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
            alert: None,
        }
    }

    /// Create a ring that fires `alert` with the cumulative drop count
    /// whenever a push displaces an unread item.
    pub fn with_alert(capacity: usize, alert: impl Fn(u64) + Send + Sync + 'static) -> Self {
        let mut ring = Self::new(capacity);
        ring.alert = Some(Box::new(alert));
        ring
    }

    /// Push an item, displacing the oldest unread item when full.
    pub fn push(&self, item: T) {
        if self.queue.force_push(item).is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(alert) = &self.alert {
                alert(dropped);
            }
        }
    }

    /// Pop the oldest item, or `None` when empty.
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Number of unread items.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the ring holds no unread items.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Cumulative count of displaced items.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain up to `count` items from the ring.
    pub fn drain(&self, count: usize) -> Vec<T> {
        let mut result = Vec::new();
        for _ in 0..count {
            match self.pop() {
                Some(item) => result.push(item),
                None => break,
            }
        }
        result
    }
}
