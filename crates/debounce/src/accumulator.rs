//! Lock-free trigger accumulator
//!
//! One `AtomicI64` biased by -1. The fast path is a single `fetch_add`;
//! only the trigger that moves the counter off `IDLE` has to take the
//! engine lock. The engine reconciles the counter with its own state
//! exclusively through [`TriggerCounter::take`] and [`TriggerCounter::park`].

use std::sync::atomic::{AtomicI64, Ordering};

/// Nothing unfolded and the engine is not watching the counter
pub(crate) const IDLE: i64 = -1;

/// Written on disposal. Far enough below zero that racing increments
/// never reach the valid range again.
pub(crate) const DISPOSED: i64 = i64::MIN / 2;

/// Outcome of recording one trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recorded {
    /// The engine is already watching; nothing else to do
    Tracked,
    /// First trigger since idle; the caller must record it under the lock
    FirstSinceIdle,
    /// The counter carries the disposed sentinel
    Disposed,
}

/// Outcome of trying to stop watching the counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parked {
    /// The counter is idle (or disposed); the next trigger takes the slow path
    Idle,
    /// A fast-path trigger slipped in and still needs folding
    Raced,
}

#[derive(Debug)]
pub(crate) struct TriggerCounter(AtomicI64);

impl TriggerCounter {
    pub(crate) fn new() -> Self {
        Self(AtomicI64::new(IDLE))
    }

    #[inline]
    pub(crate) fn increment(&self) -> Recorded {
        let now = self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        if now > 0 {
            Recorded::Tracked
        } else if now == 0 {
            Recorded::FirstSinceIdle
        } else {
            // Keep the sentinel from drifting
            self.0.store(DISPOSED, Ordering::Release);
            Recorded::Disposed
        }
    }

    /// Move every unfolded trigger out, leaving the counter watched and empty
    pub(crate) fn take(&self) -> u64 {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| (v > 0).then_some(0))
            .map_or(0, |v| v as u64)
    }

    /// Unfolded triggers are waiting
    pub(crate) fn has_pending(&self) -> bool {
        self.0.load(Ordering::Acquire) > 0
    }

    /// The counter is watched and holds nothing unfolded
    pub(crate) fn is_watched_empty(&self) -> bool {
        self.0.load(Ordering::Acquire) == 0
    }

    pub(crate) fn park(&self) -> Parked {
        match self
            .0
            .compare_exchange(0, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Parked::Idle,
            Err(v) if v > 0 => Parked::Raced,
            Err(_) => Parked::Idle,
        }
    }

    /// Install the disposed sentinel, returning what was still unfolded
    pub(crate) fn dispose(&self) -> u64 {
        let previous = self.0.swap(DISPOSED, Ordering::AcqRel);
        previous.max(0) as u64
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.0.load(Ordering::Acquire) < IDLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_trigger_takes_slow_path() {
        let counter = TriggerCounter::new();
        assert_eq!(counter.increment(), Recorded::FirstSinceIdle);
        assert_eq!(counter.increment(), Recorded::Tracked);
        assert_eq!(counter.increment(), Recorded::Tracked);

        // The slow-path trigger accounts for itself; two remain unfolded.
        assert_eq!(counter.take(), 2);
        assert_eq!(counter.take(), 0);
        assert!(counter.is_watched_empty());
    }

    #[test]
    fn test_take_leaves_idle_alone() {
        let counter = TriggerCounter::new();
        assert_eq!(counter.take(), 0);
        assert!(!counter.is_watched_empty());
        assert_eq!(counter.increment(), Recorded::FirstSinceIdle);
    }

    #[test]
    fn test_park() {
        let counter = TriggerCounter::new();
        counter.increment();
        assert_eq!(counter.park(), Parked::Idle);
        assert_eq!(counter.increment(), Recorded::FirstSinceIdle);

        counter.increment();
        assert_eq!(counter.park(), Parked::Raced);
        assert!(counter.has_pending());
    }

    #[test]
    fn test_disposed_never_resurrects() {
        let counter = TriggerCounter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.dispose(), 1);

        for _ in 0..1000 {
            assert_eq!(counter.increment(), Recorded::Disposed);
        }
        assert!(counter.is_disposed());
        assert_eq!(counter.take(), 0);
        assert_eq!(counter.park(), Parked::Idle);
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        let counter = Arc::new(TriggerCounter::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let mut first = 0u64;
                    for _ in 0..10_000 {
                        if counter.increment() == Recorded::FirstSinceIdle {
                            first += 1;
                        }
                    }
                    first
                })
            })
            .collect();

        let first: u64 = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(first, 1);
        assert_eq!(counter.take() + first, 80_000);
    }
}
