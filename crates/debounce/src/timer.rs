//! Single-shot rearmable timer backed by one tokio task

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Largest delay handed to the timer in one arm (about 49.7 days)
///
/// Longer dues are reached by re-arming on each expiry.
pub const MAX_TIMER_DELAY: Duration = Duration::from_millis(u32::MAX as u64 - 1);

struct Shared {
    deadline: Mutex<Option<Instant>>,
    notify: Notify,
    shutdown: AtomicBool,
}

/// Rearmable timer
///
/// Arming replaces any pending deadline. The expiry callback runs on a
/// runtime worker thread, never while a deadline lock is held.
pub(crate) struct Timer {
    shared: Arc<Shared>,
}

impl Timer {
    /// Spawn the timer task on `runtime`
    pub(crate) fn spawn<F>(runtime: &Handle, on_expiry: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            deadline: Mutex::new(None),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        runtime.spawn(run(Arc::clone(&shared), on_expiry));

        Self { shared }
    }

    /// Fire once after `delay` (clamped to [`MAX_TIMER_DELAY`])
    pub(crate) fn arm(&self, now: Instant, delay: Duration) {
        let at = now + delay.min(MAX_TIMER_DELAY);
        *self.shared.deadline.lock() = Some(at);
        self.shared.notify.notify_one();
    }

    pub(crate) fn cancel(&self) {
        if self.shared.deadline.lock().take().is_some() {
            self.shared.notify.notify_one();
        }
    }

    /// Stop the task; no expiry fires afterwards
    pub(crate) fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.deadline.lock().take();
        self.shared.notify.notify_one();
    }

    /// A deadline is pending
    pub(crate) fn is_armed(&self) -> bool {
        self.shared.deadline.lock().is_some()
    }
}

async fn run<F: Fn()>(shared: Arc<Shared>, on_expiry: F) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let deadline = *shared.deadline.lock();
        let Some(at) = deadline else {
            shared.notify.notified().await;
            continue;
        };

        tokio::select! {
            _ = tokio::time::sleep_until(at) => {
                // Only fire if nobody re-armed or cancelled meanwhile
                let fire = {
                    let mut current = shared.deadline.lock();
                    if *current == Some(at) {
                        *current = None;
                        true
                    } else {
                        false
                    }
                };
                if fire && !shared.shutdown.load(Ordering::Acquire) {
                    on_expiry();
                }
            }
            _ = shared.notify.notified() => {}
        }
    }

    tracing::trace!("timer task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_timer() -> (Timer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timer = Timer::spawn(&Handle::current(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (timer, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let (timer, fired) = counting_timer();
        timer.arm(Instant::now(), Duration::from_millis(100));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let (timer, fired) = counting_timer();
        timer.arm(Instant::now(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.arm(Instant::now(), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_shutdown() {
        let (timer, fired) = counting_timer();
        timer.arm(Instant::now(), Duration::from_millis(10));
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        timer.arm(Instant::now(), Duration::from_millis(10));
        timer.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_clamped() {
        let (timer, _fired) = counting_timer();
        let now = Instant::now();
        timer.arm(now, Duration::MAX);
        assert_eq!(*timer.shared.deadline.lock(), Some(now + MAX_TIMER_DELAY));
        timer.shutdown();
    }
}
