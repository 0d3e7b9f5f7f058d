//! Drop-oldest bounded buffer between telemetry producers and a sender

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-capacity FIFO that evicts its oldest item instead of blocking
///
/// Safe for many producers and one draining consumer.
pub struct BoundedChannel<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> BoundedChannel<T> {
    /// Capacity below 1 is raised to 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Insert, evicting the oldest item when full; never blocks
    pub fn offer(&self, item: T) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(item);
    }

    /// Remove and return everything buffered, oldest first
    pub fn drain_all(&self) -> Vec<T> {
        let drained = std::mem::take(&mut *self.items.lock());
        drained.into()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
