// src/load_balancer/round_robin.rs
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared rotation counter owned by a single pool.
///
/// Every `next_index` call gets a distinct sequence value, so concurrent
/// callers start their scan at different slots.
#[derive(Debug, Default)]
pub struct RoundRobinCursor {
    counter: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the cursor at `value`. The first `next_index` yields `value + 1`.
    #[cfg(test)]
    pub(crate) fn starting_at(value: usize) -> Self {
        Self {
            counter: AtomicUsize::new(value),
        }
    }

    /// Increment and return the new value reduced modulo `len`.
    ///
    /// `len` must be non-zero.
    pub fn next_index(&self, len: usize) -> usize {
        debug_assert!(len > 0, "round robin over an empty set");
        let next = self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        next % len
    }

    /// Move the cursor onto `index` after a scan skipped dead slots.
    ///
    /// Plain store: two racing skips may overwrite each other, which only
    /// costs a later caller a re-scan of the same dead slots.
    pub fn advance_to(&self, index: usize) {
        self.counter.store(index, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_next_index_wraps() {
        let cursor = RoundRobinCursor::new();
        let seen: Vec<usize> = (0..4).map(|_| cursor.next_index(3)).collect();
        assert_eq!(seen, vec![1, 2, 0, 1]);
        assert_eq!(cursor.current(), 4);
    }

    #[test]
    fn test_advance_to_resumes_after_index() {
        let cursor = RoundRobinCursor::new();
        cursor.next_index(5);
        cursor.advance_to(3);
        assert_eq!(cursor.next_index(5), 4);
    }

    #[test]
    fn test_next_index_survives_counter_overflow() {
        let cursor = RoundRobinCursor::starting_at(usize::MAX);
        assert_eq!(cursor.next_index(3), 0);
        assert!(cursor.next_index(3) < 3);
    }

    #[test]
    fn test_concurrent_increments_are_unique() {
        let cursor = Arc::new(RoundRobinCursor::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cursor = cursor.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        cursor.next_index(7);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cursor.current(), 8000);
    }
}
