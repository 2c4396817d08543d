//! Bounded FIFO queue for one-shot work.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// FIFO queue with a hard capacity.
///
/// Items enqueued from one thread drain in submission order; no ordering is
/// promised between concurrent producers. The queue never grows past its
/// capacity: a full queue rejects instead of blocking.
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> TaskQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Enqueue `item` without blocking.
    ///
    /// Returns `Ok(was_empty)` on success, reporting whether this insertion
    /// took the queue from empty to non-empty, or gives `item` back as
    /// `Err` when the queue is full.
    pub fn try_enqueue(&self, item: T) -> Result<bool, T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        let was_empty = items.is_empty();
        items.push_back(item);
        Ok(was_empty)
    }

    /// Detach and return the entire contents, leaving the queue empty.
    ///
    /// The swap happens under one lock acquisition, so the caller executes
    /// the drained items with no lock held.
    pub fn drain_all(&self) -> VecDeque<T> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Capacity the queue was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
