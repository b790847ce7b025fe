//! Monotonic timestamp identifiers.
//!
//! Version identifiers in protoshelf are the creation time in milliseconds
//! since the Unix epoch. When two identifiers are minted within the same
//! millisecond (or the wall clock steps backwards) the later one is bumped
//! past its predecessor, so the sequence stays strictly increasing.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Generator of strictly increasing, time-derived identifiers.
#[derive(Debug, Default)]
pub struct TimestampIds {
    last: AtomicI64,
}

impl TimestampIds {
    /// Create a generator with no history.
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Record an identifier issued elsewhere (e.g. loaded from disk).
    ///
    /// Every identifier minted afterwards is greater than `id`.
    pub fn observe(&self, id: i64) {
        self.last.fetch_max(id, Ordering::SeqCst);
    }

    /// Mint the next identifier for an event happening at `now`.
    pub fn next(&self, now: DateTime<Utc>) -> i64 {
        let candidate = now.timestamp_millis();
        let mut previous = self.last.load(Ordering::SeqCst);

        loop {
            let next = candidate.max(previous + 1);
            match self
                .last
                .compare_exchange_weak(previous, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }

    /// The most recently minted or observed identifier.
    pub fn last(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_id_is_creation_millis() {
        let ids = TimestampIds::new();
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(ids.next(now), 1_700_000_000_123);
    }

    #[test]
    fn test_same_millisecond_is_bumped() {
        let ids = TimestampIds::new();
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let first = ids.next(now);
        let second = ids.next(now);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_clock_going_backwards_still_increases() {
        let ids = TimestampIds::new();
        let later = Utc.timestamp_millis_opt(2_000).unwrap();
        let earlier = Utc.timestamp_millis_opt(1_000).unwrap();
        let a = ids.next(later);
        let b = ids.next(earlier);
        assert!(b > a);
    }

    #[test]
    fn test_observe_moves_floor() {
        let ids = TimestampIds::new();
        ids.observe(5_000);
        let now = Utc.timestamp_millis_opt(1_000).unwrap();
        assert_eq!(ids.next(now), 5_001);

        // Observing something older is a no-op.
        ids.observe(10);
        assert_eq!(ids.last(), 5_001);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let ids = Arc::new(TimestampIds::new());
        let now = Utc::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..250).map(|_| ids.next(now)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
