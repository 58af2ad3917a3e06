//! Monotonic stopwatches used by the reschedule engine

use std::time::Duration;
use tokio::time::Instant;

/// A stopwatch that is either stopped or running since an instant
///
/// A stopped stopwatch counts as infinitely elapsed, so a constraint
/// measured from it is always satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Stopwatch(Option<Instant>);

impl Stopwatch {
    pub(crate) fn restart(&mut self, now: Instant) {
        self.0 = Some(now);
    }

    /// Start only if stopped
    pub(crate) fn start(&mut self, now: Instant) {
        self.0.get_or_insert(now);
    }

    pub(crate) fn stop(&mut self) {
        self.0 = None;
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.0.is_some()
    }

    pub(crate) fn elapsed(&self, now: Instant) -> Duration {
        match self.0 {
            Some(started) => now.saturating_duration_since(started),
            None => Duration::MAX,
        }
    }

    /// Time left until `span` has elapsed (zero once it has)
    pub(crate) fn remaining(&self, span: Duration, now: Instant) -> Duration {
        span.saturating_sub(self.elapsed(now))
    }
}
