//! Load generator: many threads triggering one debouncer

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use debounce::{BufferedDebouncer, BufferedEvent, DebounceError, Debouncer, DebouncerHandle, Settings};
use indicatif::ProgressBar;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Progress is reported in chunks to keep the bar off the hot path
const PROGRESS_CHUNK: u64 = 1_000;

/// One benchmark run
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Triggering OS threads
    pub threads: usize,
    /// Triggers issued by each thread
    pub triggers_per_thread: u64,
    /// Upper bound of the random pause between two triggers of one thread
    pub pause: Duration,
    /// Simulated handler latency
    pub handler_work: Duration,
    pub settings: Settings,
    /// Use the buffered variant with this payload limit
    pub payload_limit: Option<usize>,
    /// How long to wait for the last dispatch after triggering stops
    pub settle_timeout: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            triggers_per_thread: 100_000,
            pause: Duration::ZERO,
            handler_work: Duration::ZERO,
            settings: Settings::default(),
            payload_limit: None,
            settle_timeout: Duration::from_secs(30),
        }
    }
}

/// What a run observed
#[derive(Debug, Clone, Default, Serialize)]
pub struct BenchReport {
    pub threads: usize,
    /// Triggers accepted by the debouncer
    pub triggers: u64,
    /// `AtCapacity` rejections that were retried
    pub rejected: u64,
    /// Sum of the counts delivered to the handler
    pub delivered: u64,
    pub delivered_payloads: u64,
    pub dispatches: u64,
    pub largest_batch: u64,
    pub max_concurrency: usize,
    pub trigger_elapsed_ms: f64,
    pub total_elapsed_ms: f64,
    pub triggers_per_sec: f64,
}

impl BenchReport {
    /// Fail unless every trigger was delivered exactly once, serially
    pub fn verify(&self) -> Result<()> {
        if self.delivered != self.triggers {
            anyhow::bail!(
                "delivered count {} does not match {} triggers",
                self.delivered,
                self.triggers
            );
        }
        if self.payload_mode() && self.delivered_payloads != self.triggers {
            anyhow::bail!(
                "delivered {} payloads for {} triggers",
                self.delivered_payloads,
                self.triggers
            );
        }
        if self.max_concurrency > 1 {
            anyhow::bail!("handler ran {} times concurrently", self.max_concurrency);
        }
        Ok(())
    }

    fn payload_mode(&self) -> bool {
        self.delivered_payloads > 0
    }
}

/// Handler-side counters
#[derive(Default)]
struct Probe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delivered: AtomicU64,
}

/// Per-dispatch record sent from the handler
struct Dispatch {
    count: u64,
    payloads: usize,
}

impl Probe {
    fn observe(&self, work: Duration, count: u64, payloads: usize, tx: &Sender<Dispatch>) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !work.is_zero() {
            thread::sleep(work);
        }
        // Sent before `in_flight` drops
        let _ = tx.send(Dispatch { count, payloads });
        self.delivered.fetch_add(count, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Either flavour of debouncer behind one trigger call
enum Target {
    Plain(Debouncer, DebouncerHandle),
    Buffered(BufferedDebouncer<u64>, DebouncerHandle<u64>),
}

#[derive(Clone)]
enum Trigger {
    Plain(DebouncerHandle),
    Buffered(DebouncerHandle<u64>),
}

impl Trigger {
    fn fire(&self, value: u64) -> debounce::Result<()> {
        match self {
            Trigger::Plain(handle) => handle.trigger(),
            Trigger::Buffered(handle) => handle.trigger_with(value),
        }
    }
}

impl Target {
    fn build(config: &BenchConfig, probe: &Arc<Probe>, tx: Sender<Dispatch>) -> Result<Self> {
        let builder = Debouncer::builder().settings(config.settings);
        let work = config.handler_work;
        let probe = Arc::clone(probe);

        let target = match config.payload_limit {
            None => {
                let debouncer = builder
                    .build(move |event| probe.observe(work, event.count, 0, &tx))
                    .context("Failed to build debouncer")?;
                let handle = debouncer.handle();
                Target::Plain(debouncer, handle)
            }
            Some(limit) => {
                let debouncer = builder
                    .payload_limit(limit)
                    .build_buffered(move |event: BufferedEvent<u64>| {
                        probe.observe(work, event.count, event.payloads.len(), &tx)
                    })
                    .context("Failed to build buffered debouncer")?;
                let handle = debouncer.handle();
                Target::Buffered(debouncer, handle)
            }
        };
        Ok(target)
    }

    fn trigger(&self) -> Trigger {
        match self {
            Target::Plain(_, handle) => Trigger::Plain(handle.clone()),
            Target::Buffered(_, handle) => Trigger::Buffered(handle.clone()),
        }
    }

    fn dispose(&self) {
        match self {
            Target::Plain(debouncer, _) => debouncer.dispose(),
            Target::Buffered(debouncer, _) => debouncer.dispose(),
        }
    }
}

/// Run the load generator to completion
///
/// Must be called inside a tokio runtime; the debouncer uses it for its
/// timer and handler invocations.
pub async fn run(config: &BenchConfig, progress: Option<ProgressBar>) -> Result<BenchReport> {
    if config.threads == 0 {
        anyhow::bail!("at least one triggering thread is required");
    }

    let probe = Arc::new(Probe::default());
    let (tx, rx) = unbounded();
    let target = Target::build(config, &probe, tx)?;

    info!(
        threads = config.threads,
        per_thread = config.triggers_per_thread,
        buffered = config.payload_limit.is_some(),
        "starting benchmark"
    );

    let started = Instant::now();
    let accepted = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(config.threads));

    let workers: Vec<_> = (0..config.threads)
        .map(|index| {
            let trigger = target.trigger();
            let accepted = Arc::clone(&accepted);
            let rejected = Arc::clone(&rejected);
            let barrier = Arc::clone(&barrier);
            let progress = progress.clone();
            let per_thread = config.triggers_per_thread;
            let pause = config.pause;

            thread::Builder::new()
                .name(format!("trigger-{index}"))
                .spawn(move || -> debounce::Result<()> {
                    let mut rng = rand::thread_rng();
                    barrier.wait();
                    for i in 0..per_thread {
                        let value = index as u64 * per_thread + i;
                        loop {
                            match trigger.fire(value) {
                                Ok(()) => break,
                                Err(DebounceError::AtCapacity { .. }) => {
                                    rejected.fetch_add(1, Ordering::Relaxed);
                                    thread::yield_now();
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        accepted.fetch_add(1, Ordering::Relaxed);

                        if !pause.is_zero() {
                            thread::sleep(rng.gen_range(Duration::ZERO..=pause));
                        }
                        if (i + 1) % PROGRESS_CHUNK == 0 {
                            if let Some(bar) = &progress {
                                bar.inc(PROGRESS_CHUNK);
                            }
                        }
                    }
                    Ok(())
                })
                .context("Failed to spawn trigger thread")
        })
        .collect::<Result<_>>()?;

    let joined = tokio::task::spawn_blocking(move || {
        workers
            .into_iter()
            .map(|worker| match worker.join() {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(_) => Err(anyhow::anyhow!("trigger thread panicked")),
            })
            .collect::<Result<Vec<_>>>()
    })
    .await
    .context("Failed to join trigger threads")?;
    joined?;

    let trigger_elapsed = started.elapsed();
    let triggers = accepted.load(Ordering::SeqCst);
    if let Some(bar) = &progress {
        bar.finish_with_message("triggers issued");
    }
    debug!(triggers, elapsed = ?trigger_elapsed, "triggering finished");

    settle(&probe, triggers, config.settle_timeout).await;
    target.dispose();
    let total_elapsed = started.elapsed();

    let mut report = summarize(&rx);
    report.threads = config.threads;
    report.triggers = triggers;
    report.rejected = rejected.load(Ordering::SeqCst);
    report.max_concurrency = probe.max_in_flight.load(Ordering::SeqCst);
    report.trigger_elapsed_ms = trigger_elapsed.as_secs_f64() * 1_000.0;
    report.total_elapsed_ms = total_elapsed.as_secs_f64() * 1_000.0;
    report.triggers_per_sec = if trigger_elapsed.is_zero() {
        0.0
    } else {
        triggers as f64 / trigger_elapsed.as_secs_f64()
    };
    Ok(report)
}

/// Wait until the handler has seen `expected` triggers or time runs out
async fn settle(probe: &Probe, expected: u64, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let delivered = probe.delivered.load(Ordering::SeqCst);
        if delivered >= expected && probe.in_flight.load(Ordering::SeqCst) == 0 {
            return;
        }
        if Instant::now() >= deadline {
            warn!(delivered, expected, "gave up waiting for the final dispatch");
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn summarize(rx: &Receiver<Dispatch>) -> BenchReport {
    let mut report = BenchReport::default();
    for dispatch in rx.try_iter() {
        report.dispatches += 1;
        report.delivered += dispatch.count;
        report.delivered_payloads += dispatch.payloads as u64;
        report.largest_batch = report.largest_batch.max(dispatch.count);
    }
    report
}
