//! Thread-safe request-id counter for host commands.
//!
//! Every command the agent sends carries a request id; the host echoes it in
//! the reply so a stale or misrouted reply is detected instead of being
//! credited to the wrong command.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter for request ids.
///
/// Ids start at 1 so that 0 never appears on the wire; a zeroed header is
/// then always recognisable as garbage.  The counter wraps from `u64::MAX`
/// back to 1 without panicking.
///
/// # Examples
///
/// ```rust
/// use keyhold_core::protocol::RequestCounter;
///
/// let counter = RequestCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct RequestCounter {
    inner: AtomicU64,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next request id and atomically advances the counter.
    pub fn next(&self) -> u64 {
        // Relaxed: ids only need to be unique, not ordered against other memory.
        let id = self.inner.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            // Wrapped past u64::MAX; skip the reserved value.
            self.inner.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }

    /// Returns the id the next call to [`next`](Self::next) would hand out.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for RequestCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_request_counter_starts_at_one() {
        let counter = RequestCounter::new();
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_request_counter_skips_zero_on_wrap() {
        // Arrange – start one step before overflow
        let counter = RequestCounter {
            inner: AtomicU64::new(u64::MAX),
        };

        // Act
        let before_wrap = counter.next();
        let after_wrap = counter.next();

        // Assert
        assert_eq!(before_wrap, u64::MAX);
        assert_eq!(after_wrap, 1, "0 is reserved and must be skipped");
    }

    #[test]
    fn test_current_does_not_increment() {
        let counter = RequestCounter::new();
        counter.next();

        assert_eq!(counter.current(), 2);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn test_request_counter_is_unique_across_threads() {
        // Arrange
        let counter = Arc::new(RequestCounter::new());
        let thread_count = 8;
        let per_thread = 1000;

        // Act
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..per_thread).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), thread_count * per_thread);
    }
}
