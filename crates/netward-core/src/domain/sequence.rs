//! Id allocation for alerts generated on the client.
//!
//! # Why negative ids? (for beginners)
//!
//! The sensor numbers its alerts 1, 2, 3, ...  When the client raises an alert
//! of its own (the sensor has been unreachable for five minutes) it must not
//! reuse an id the sensor might later send, or the two would overwrite each
//! other in the alert list.  Counting *downwards* from -1 gives ids that can
//! never collide with the sensor's.
//!
//! # Thread safety
//!
//! The counter is an `AtomicI64`, so concurrent sessions in one process each
//! receive a distinct id without taking a lock.

use std::sync::atomic::{AtomicI64, Ordering};

/// A thread-safe, strictly decreasing counter of negative ids.
///
/// ```rust
/// use netward_core::domain::sequence::SyntheticIdSequence;
///
/// let ids = SyntheticIdSequence::new();
/// assert_eq!(ids.next(), -1);
/// assert_eq!(ids.next(), -2);
/// ```
pub struct SyntheticIdSequence {
    inner: AtomicI64,
}

impl SyntheticIdSequence {
    /// Creates a sequence whose first id is `-1`.
    pub const fn new() -> Self {
        Self {
            inner: AtomicI64::new(-1),
        }
    }

    /// Returns the next id and moves the counter one step down.
    ///
    /// Once `i64::MIN` has been handed out the counter stays there rather
    /// than wrapping into positive ids.
    pub fn next(&self) -> i64 {
        match self
            .inner
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
        {
            Ok(previous) => previous,
            Err(exhausted) => exhausted,
        }
    }

    /// The id the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> i64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SyntheticIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

static PROCESS_SEQUENCE: SyntheticIdSequence = SyntheticIdSequence::new();

/// Allocates an id from the process-wide sequence.
///
/// Ids are unique across every session manager in the process.
pub fn next_synthetic_alert_id() -> i64 {
    PROCESS_SEQUENCE.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_starts_at_minus_one() {
        // Arrange
        let ids = SyntheticIdSequence::new();

        // Act
        let first = ids.next();

        // Assert
        assert_eq!(first, -1);
    }

    #[test]
    fn test_sequence_decreases_strictly() {
        let ids = SyntheticIdSequence::new();
        let values: Vec<i64> = (0..50).map(|_| ids.next()).collect();
        for window in values.windows(2) {
            assert!(window[1] < window[0]);
        }
    }

    #[test]
    fn test_sequence_saturates_at_minimum() {
        // Arrange – counter already at the floor
        let ids = SyntheticIdSequence {
            inner: AtomicI64::new(i64::MIN),
        };

        // Act
        let a = ids.next();
        let b = ids.next();

        // Assert
        assert_eq!(a, i64::MIN);
        assert_eq!(b, i64::MIN);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let ids = SyntheticIdSequence::new();
        ids.next();
        assert_eq!(ids.peek(), -2);
        assert_eq!(ids.next(), -2);
    }

    #[test]
    fn test_sequence_is_unique_across_threads() {
        // Arrange
        let ids = Arc::new(SyntheticIdSequence::new());

        // Act
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..500).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
        assert!(all.iter().all(|&id| id < 0));
    }

    #[test]
    fn test_process_ids_are_negative_and_distinct() {
        let a = next_synthetic_alert_id();
        let b = next_synthetic_alert_id();
        assert!(a < 0 && b < 0);
        assert_ne!(a, b);
    }
}
