//! Bounded FIFO of actions waiting for the session to come back.
//!
//! When the sensor is unreachable, user actions (acknowledge an alert, rename
//! a device, ...) are parked here and replayed once the session reaches
//! `live`.  The queue never grows past its capacity: when full, the *oldest*
//! entry is dropped to make room, on the assumption that the most recent
//! intent matters most.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Default number of actions retained while offline.
pub const DEFAULT_CAPACITY: usize = 100;

/// A thread-safe, capacity-limited, drop-oldest FIFO.
#[derive(Debug)]
pub struct ActionQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> ActionQueue<T> {
    /// Creates a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends `item`.  Returns the oldest entry if it had to be dropped.
    pub fn enqueue(&self, item: T) -> Option<T> {
        let mut items = self.lock();
        items.push_back(item);
        if items.len() > self.capacity {
            let dropped = items.pop_front();
            warn!(capacity = self.capacity, "action queue full; dropped oldest action");
            dropped
        } else {
            None
        }
    }

    /// Removes and returns every queued item in FIFO order.
    ///
    /// The swap happens under the lock, so a concurrent `enqueue` lands either
    /// in the returned batch or in the now-empty queue, never in neither.
    pub fn dequeue_all(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock()).into()
    }

    /// Discards everything without returning it.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panic while holding the lock cannot leave a VecDeque half-updated.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for ActionQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
