//! Public debouncer types

use crate::buffered::{BufferedDebouncer, BufferedEvent};
use crate::engine::Engine;
use crate::error::{DebounceError, Result};
use crate::settings::{self, DebouncerSettings, Settings};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

/// Aggregated notification delivered to the handler
#[derive(Debug, Clone)]
pub struct DebouncedEvent {
    /// Triggers coalesced into this event (saturates at `u64::MAX`)
    pub count: u64,
    /// The debouncer that raised the event
    pub source: DebouncerHandle,
}

/// Coalesces concurrent triggers into serialized handler invocations
///
/// `trigger()` is lock-free on the common path and never waits for the
/// handler. The handler runs on the runtime's blocking pool, one
/// invocation at a time. Dropping the debouncer disposes it.
///
/// ```no_run
/// # async fn demo() -> debounce::Result<()> {
/// use debounce::Debouncer;
/// use std::time::Duration;
///
/// let debouncer = Debouncer::builder()
///     .debounce_window(Duration::from_millis(200))
///     .build(|event| println!("{} changes", event.count))?;
///
/// debouncer.trigger()?;
/// debouncer.trigger()?;
/// # Ok(())
/// # }
/// ```
pub struct Debouncer {
    engine: Arc<Engine<()>>,
}

impl Debouncer {
    /// Create a debouncer with default settings on the ambient runtime
    pub fn new<F>(handler: F) -> Result<Self>
    where
        F: Fn(DebouncedEvent) + Send + Sync + 'static,
    {
        Self::builder().build(handler)
    }

    pub fn builder() -> DebouncerBuilder {
        DebouncerBuilder::default()
    }

    /// Record one trigger
    ///
    /// Fails with [`DebounceError::Disposed`] once disposed.
    #[inline]
    pub fn trigger(&self) -> Result<()> {
        self.engine.trigger()
    }

    /// Discard the pending batch, returning how many triggers it held
    ///
    /// Returns 0 when idle or disposed.
    pub fn reset(&self) -> u64 {
        self.engine.reset().count
    }

    pub fn debounce_window(&self) -> Duration {
        self.engine.settings().debounce_window
    }

    pub fn set_debounce_window(&self, value: Duration) -> Result<()> {
        self.engine.update_settings(|s| s.debounce_window = value)
    }

    pub fn debounce_timeout(&self) -> Duration {
        self.engine.settings().debounce_timeout
    }

    /// Accepts [`INFINITE`](crate::INFINITE) to disable the timeout
    pub fn set_debounce_timeout(&self, value: Duration) -> Result<()> {
        self.engine.update_settings(|s| s.debounce_timeout = value)
    }

    pub fn event_spacing(&self) -> Duration {
        self.engine.settings().event_spacing
    }

    pub fn set_event_spacing(&self, value: Duration) -> Result<()> {
        self.engine.update_settings(|s| s.event_spacing = value)
    }

    pub fn handler_spacing(&self) -> Duration {
        self.engine.settings().handler_spacing
    }

    pub fn set_handler_spacing(&self, value: Duration) -> Result<()> {
        self.engine.update_settings(|s| s.handler_spacing = value)
    }

    pub fn timing_granularity(&self) -> Duration {
        self.engine.settings().timing_granularity
    }

    pub fn set_timing_granularity(&self, value: Duration) -> Result<()> {
        self.engine.update_settings(|s| s.timing_granularity = value)
    }

    /// Snapshot of all five timing properties
    pub fn settings(&self) -> Settings {
        self.engine.settings()
    }

    /// Replace all five timing properties at once
    pub fn set_settings(&self, value: Settings) -> Result<()> {
        self.engine.update_settings(|s| *s = value)
    }

    /// Weak handle for use from handlers and other threads
    pub fn handle(&self) -> DebouncerHandle {
        self.engine.handle()
    }

    /// Stop all scheduling; idempotent
    ///
    /// A handler that is already running completes, but nothing is
    /// dispatched afterwards.
    pub fn dispose(&self) {
        self.engine.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.engine.is_disposed()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.engine.dispose();
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("settings", &self.engine.settings())
            .field("disposed", &self.engine.is_disposed())
            .finish()
    }
}

/// Cloneable weak reference to a debouncer
///
/// Does not keep the debouncer alive; once it is dropped every call
/// behaves as if it were disposed.
pub struct DebouncerHandle<T = ()> {
    engine: Weak<Engine<T>>,
}

impl<T: Send + 'static> DebouncerHandle<T> {
    pub(crate) fn new(engine: Weak<Engine<T>>) -> Self {
        Self { engine }
    }

    fn engine(&self) -> Result<Arc<Engine<T>>> {
        self.engine.upgrade().ok_or(DebounceError::Disposed)
    }

    /// Record one trigger carrying `data`
    ///
    /// Always takes the engine lock. On a plain `DebouncerHandle<()>` use
    /// [`DebouncerHandle::trigger`], which stays on the lock-free path.
    pub fn trigger_with(&self, data: T) -> Result<()> {
        self.engine()?.trigger_with(data)
    }

    pub fn dispose(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.engine.upgrade().map_or(true, |engine| engine.is_disposed())
    }
}

impl DebouncerHandle<()> {
    #[inline]
    pub fn trigger(&self) -> Result<()> {
        self.engine()?.trigger()
    }
}

impl<T> Clone for DebouncerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            engine: Weak::clone(&self.engine),
        }
    }
}

impl<T> fmt::Debug for DebouncerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebouncerHandle")
            .field("alive", &(self.engine.strong_count() > 0))
            .finish()
    }
}

/// Builder for [`Debouncer`] and [`BufferedDebouncer`]
///
/// Every value is validated with the same rules as the setters.
#[derive(Debug, Clone)]
pub struct DebouncerBuilder {
    settings: Settings,
    payload_limit: usize,
    runtime: Option<Handle>,
}

impl Default for DebouncerBuilder {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            payload_limit: usize::MAX,
            runtime: None,
        }
    }
}

impl DebouncerBuilder {
    pub fn debounce_window(mut self, value: Duration) -> Self {
        self.settings.debounce_window = value;
        self
    }

    pub fn debounce_timeout(mut self, value: Duration) -> Self {
        self.settings.debounce_timeout = value;
        self
    }

    pub fn event_spacing(mut self, value: Duration) -> Self {
        self.settings.event_spacing = value;
        self
    }

    pub fn handler_spacing(mut self, value: Duration) -> Self {
        self.settings.handler_spacing = value;
        self
    }

    pub fn timing_granularity(mut self, value: Duration) -> Self {
        self.settings.timing_granularity = value;
        self
    }

    pub fn settings(mut self, value: Settings) -> Self {
        self.settings = value;
        self
    }

    /// Apply a loaded settings file
    pub fn file_settings(mut self, value: &DebouncerSettings) -> Result<Self> {
        self.settings = value.to_settings()?;
        if let Some(limit) = value.payload_limit {
            self.payload_limit = limit;
        }
        Ok(self)
    }

    /// Only used by [`BufferedDebouncer`]
    pub fn payload_limit(mut self, value: usize) -> Self {
        self.payload_limit = value;
        self
    }

    /// Runtime that drives timers and handlers (default: the ambient one)
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    fn resolve(self) -> Result<(Handle, Settings, usize)> {
        self.settings.validate()?;
        let limit = settings::payload_limit(self.payload_limit)?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| DebounceError::NoRuntime)?,
        };
        Ok((runtime, self.settings, limit))
    }

    pub fn build<F>(self, handler: F) -> Result<Debouncer>
    where
        F: Fn(DebouncedEvent) + Send + Sync + 'static,
    {
        let (runtime, settings, _) = self.resolve()?;
        let engine = Engine::new(
            runtime,
            settings,
            usize::MAX,
            Box::new(move |batch, source| {
                handler(DebouncedEvent {
                    count: batch.count,
                    source,
                })
            }),
        );
        Ok(Debouncer { engine })
    }

    pub fn build_buffered<T, F>(self, handler: F) -> Result<BufferedDebouncer<T>>
    where
        T: Send + 'static,
        F: Fn(BufferedEvent<T>) + Send + Sync + 'static,
    {
        let (runtime, settings, limit) = self.resolve()?;
        let engine = Engine::new(
            runtime,
            settings,
            limit,
            Box::new(move |batch, source| {
                handler(BufferedEvent {
                    count: batch.count,
                    payloads: batch.payloads,
                    source,
                })
            }),
        );
        Ok(BufferedDebouncer::from_engine(engine))
    }
}
