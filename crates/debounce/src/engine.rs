//! Reschedule engine, dispatch and disposal
//!
//! All scheduling state lives in [`EngineState`] behind one mutex, the
//! engine lock. The only state touched without it is the
//! [`TriggerCounter`], which the engine folds into `accumulated` under the
//! lock. The lock is held for bookkeeping only, never across a handler.

use crate::accumulator::{Parked, Recorded, TriggerCounter};
use crate::clock::Stopwatch;
use crate::debouncer::DebouncerHandle;
use crate::error::{DebounceError, Result};
use crate::settings::Settings;
use crate::timer::Timer;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, trace};

/// What one dispatch (or reset) hands over
#[derive(Debug)]
pub(crate) struct Batch<T> {
    pub count: u64,
    pub payloads: Vec<T>,
}

impl<T> Batch<T> {
    fn empty() -> Self {
        Self {
            count: 0,
            payloads: Vec::new(),
        }
    }
}

/// Consumer callback, already adapted to the public event type
pub(crate) type Deliver<T> = Box<dyn Fn(Batch<T>, DebouncerHandle<T>) + Send + Sync>;

/// State guarded by the engine lock
#[derive(Debug)]
pub(crate) struct EngineState<T> {
    /// Folded triggers awaiting dispatch
    accumulated: u64,
    first_trigger: Stopwatch,
    last_trigger: Stopwatch,
    last_handler_start: Stopwatch,
    last_handler_finish: Stopwatch,
    settings: Settings,
    /// A handler invocation is outstanding
    dispatching: bool,
    timer_armed: bool,
    disposed: bool,
    payloads: Vec<T>,
    payload_limit: usize,
}

impl<T> EngineState<T> {
    fn new(settings: Settings, payload_limit: usize) -> Self {
        Self {
            accumulated: 0,
            first_trigger: Stopwatch::default(),
            last_trigger: Stopwatch::default(),
            last_handler_start: Stopwatch::default(),
            last_handler_finish: Stopwatch::default(),
            settings,
            dispatching: false,
            timer_armed: false,
            disposed: false,
            payloads: Vec::new(),
            payload_limit,
        }
    }

    fn record(&mut self, count: u64, now: Instant) {
        self.first_trigger.start(now);
        self.last_trigger.restart(now);
        self.accumulated = self.accumulated.saturating_add(count);
    }

    fn at_capacity(&self) -> bool {
        self.payloads.len() >= self.payload_limit
    }

    fn may_dispatch(&self, now: Instant) -> bool {
        let s = &self.settings;
        self.last_handler_start.elapsed(now) >= s.event_spacing
            && self.last_handler_finish.elapsed(now) >= s.handler_spacing
            && (self.last_trigger.elapsed(now) >= s.debounce_window
                || (s.has_timeout() && self.first_trigger.elapsed(now) >= s.debounce_timeout))
    }

    /// Earliest moment from `now` at which dispatch could become legal
    fn due_time(&self, now: Instant) -> Duration {
        let s = &self.settings;
        let mut due = self.last_trigger.remaining(s.debounce_window, now);
        if s.has_timeout() {
            due = due.min(self.first_trigger.remaining(s.debounce_timeout, now));
        }
        due.max(self.last_handler_start.remaining(s.event_spacing, now))
            .max(self.last_handler_finish.remaining(s.handler_spacing, now))
    }
}

pub(crate) struct Engine<T> {
    counter: TriggerCounter,
    state: Mutex<EngineState<T>>,
    timer: Timer,
    runtime: Handle,
    deliver: Deliver<T>,
}

impl<T: Send + 'static> Engine<T> {
    pub(crate) fn new(
        runtime: Handle,
        settings: Settings,
        payload_limit: usize,
        deliver: Deliver<T>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let timer = Timer::spawn(&runtime, move || {
                if let Some(engine) = weak.upgrade() {
                    engine.on_timer();
                }
            });

            Self {
                counter: TriggerCounter::new(),
                state: Mutex::new(EngineState::new(settings, payload_limit)),
                timer,
                runtime,
                deliver,
            }
        })
    }

    /// Monotonic time as seen by the timer, from any thread
    fn now(&self) -> Instant {
        let _context = self.runtime.enter();
        Instant::now()
    }

    pub(crate) fn handle(self: &Arc<Self>) -> DebouncerHandle<T> {
        DebouncerHandle::new(Arc::downgrade(self))
    }

    /// Record one trigger without payload
    #[inline]
    pub(crate) fn trigger(self: &Arc<Self>) -> Result<()> {
        match self.counter.increment() {
            Recorded::Tracked => Ok(()),
            Recorded::Disposed => Err(DebounceError::Disposed),
            Recorded::FirstSinceIdle => {
                let mut st = self.state.lock();
                if st.disposed {
                    // Raced a dispose that had not yet written the sentinel
                    return Ok(());
                }
                let now = self.now();
                st.record(1, now);
                self.reschedule(&mut st, now);
                Ok(())
            }
        }
    }

    /// Record one trigger carrying `data`
    pub(crate) fn trigger_with(self: &Arc<Self>, data: T) -> Result<()> {
        let mut st = self.state.lock();
        if st.disposed {
            return Err(DebounceError::Disposed);
        }
        if st.dispatching && st.at_capacity() {
            return Err(DebounceError::AtCapacity {
                limit: st.payload_limit,
            });
        }

        st.payloads.push(data);
        let now = self.now();
        let first = match self.counter.increment() {
            Recorded::Tracked => false,
            Recorded::FirstSinceIdle => {
                st.record(1, now);
                true
            }
            Recorded::Disposed => {
                st.payloads.pop();
                return Err(DebounceError::Disposed);
            }
        };

        if first || st.at_capacity() {
            self.reschedule(&mut st, now);
        }
        Ok(())
    }

    /// Take everything accumulated without dispatching it
    pub(crate) fn reset(self: &Arc<Self>) -> Batch<T> {
        let mut st = self.state.lock();
        if st.disposed {
            return Batch::empty();
        }

        let now = self.now();
        self.fold(&mut st, now);
        let batch = Batch {
            count: std::mem::take(&mut st.accumulated),
            payloads: std::mem::take(&mut st.payloads),
        };
        st.first_trigger.stop();
        st.last_trigger.stop();

        self.reschedule(&mut st, now);
        debug!(count = batch.count, "debouncer reset");
        batch
    }

    pub(crate) fn settings(&self) -> Settings {
        self.state.lock().settings
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.state.lock().payload_limit
    }

    /// Apply a settings change atomically and reschedule
    ///
    /// Leaves the state untouched if the result does not validate.
    pub(crate) fn update_settings(self: &Arc<Self>, change: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut st = self.state.lock();
        if st.disposed {
            return Err(DebounceError::Disposed);
        }

        let mut next = st.settings;
        change(&mut next);
        next.validate()?;
        st.settings = next;

        let now = self.now();
        self.reschedule(&mut st, now);
        Ok(())
    }

    /// Change the payload limit; an already-full buffer dispatches now
    pub(crate) fn set_payload_limit(self: &Arc<Self>, limit: usize) -> Result<()> {
        let limit = crate::settings::payload_limit(limit)?;
        let mut st = self.state.lock();
        if st.disposed {
            return Err(DebounceError::Disposed);
        }
        st.payload_limit = limit;

        let now = self.now();
        self.reschedule(&mut st, now);
        Ok(())
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.counter.is_disposed() || self.state.lock().disposed
    }

    /// Terminal; safe from any thread, including from inside the handler
    pub(crate) fn dispose(&self) {
        let unfolded = self.counter.dispose();

        let mut st = self.state.lock();
        if st.disposed {
            return;
        }
        st.disposed = true;

        let discarded = st.accumulated.saturating_add(unfolded);
        st.accumulated = 0;
        st.payloads.clear();
        st.first_trigger.stop();
        st.last_trigger.stop();
        st.timer_armed = false;
        self.timer.shutdown();

        debug!(discarded, in_flight = st.dispatching, "debouncer disposed");
    }

    fn on_timer(self: &Arc<Self>) {
        let mut st = self.state.lock();
        // A reschedule may have re-armed it since the expiry
        st.timer_armed = self.timer.is_armed();
        let now = self.now();
        trace!("debounce timer expired");
        self.reschedule(&mut st, now);
    }

    /// Park the counter; triggers that raced the park open the next batch
    fn park_folding(&self, st: &mut EngineState<T>, now: Instant) {
        while self.counter.park() == Parked::Raced {
            let raced = self.counter.take();
            if raced > 0 {
                st.record(raced, now);
            }
        }
    }

    fn fold(&self, st: &mut EngineState<T>, now: Instant) {
        let taken = self.counter.take();
        if taken > 0 {
            st.record(taken, now);
        }
    }

    /// Decide between dispatching now, arming the timer, or going idle
    fn reschedule(self: &Arc<Self>, st: &mut EngineState<T>, now: Instant) {
        if st.disposed {
            return;
        }
        let granularity = st.settings.timing_granularity;

        if st.last_trigger.elapsed(now) >= granularity {
            self.fold(st, now);
        }

        // Watching: fast-path triggers may still arrive unfolded, so the
        // engine has to come back within the granularity.
        let watching = if self.counter.has_pending() {
            true
        } else if self.counter.is_watched_empty()
            && !granularity.is_zero()
            && st.last_trigger.elapsed(now) < granularity
        {
            true
        } else {
            self.counter.park() == Parked::Raced
        };

        if st.accumulated == 0 && st.payloads.is_empty() && !watching {
            self.cancel_timer(st);
            return;
        }

        let coalesce_due = st.last_trigger.remaining(granularity, now);

        if st.dispatching {
            // Completion reschedules; only keep folding meanwhile
            if watching {
                self.arm_timer(st, now, coalesce_due);
            } else {
                self.cancel_timer(st);
            }
            return;
        }

        if st.at_capacity() || (st.accumulated > 0 && st.may_dispatch(now)) {
            self.dispatch(st, now);
            return;
        }

        if st.accumulated == 0 {
            // Only triggers that slipped in after the fold
            self.arm_timer(st, now, coalesce_due);
            return;
        }

        let mut due = st.due_time(now);
        if watching {
            due = due.min(coalesce_due);
        }
        self.arm_timer(st, now, due);
    }

    fn dispatch(self: &Arc<Self>, st: &mut EngineState<T>, now: Instant) {
        self.fold(st, now);
        let batch = Batch {
            count: std::mem::take(&mut st.accumulated),
            payloads: std::mem::take(&mut st.payloads),
        };
        st.first_trigger.stop();
        st.last_trigger.stop();
        self.park_folding(st, now);

        st.dispatching = true;
        st.last_handler_start.restart(now);
        self.cancel_timer(st);

        debug!(
            count = batch.count,
            payloads = batch.payloads.len(),
            "dispatching debounced event"
        );

        let engine = Arc::clone(self);
        self.runtime.spawn_blocking(move || engine.invoke(batch));
    }

    fn invoke(self: Arc<Self>, batch: Batch<T>) {
        let source = self.handle();
        if panic::catch_unwind(AssertUnwindSafe(|| (self.deliver)(batch, source))).is_err() {
            error!("debounce handler panicked; continuing");
        }
        self.complete();
    }

    fn complete(self: &Arc<Self>) {
        let mut st = self.state.lock();
        let now = self.now();
        st.last_handler_finish.restart(now);
        st.dispatching = false;
        self.reschedule(&mut st, now);
    }

    fn arm_timer(&self, st: &mut EngineState<T>, now: Instant, due: Duration) {
        st.timer_armed = true;
        self.timer.arm(now, due);
        trace!(?due, "debounce timer armed");
    }

    fn cancel_timer(&self, st: &mut EngineState<T>) {
        if st.timer_armed {
            st.timer_armed = false;
            self.timer.cancel();
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (u64, bool, bool) {
        let st = self.state.lock();
        (st.accumulated, st.dispatching, st.timer_armed)
    }
}
