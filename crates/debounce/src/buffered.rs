//! Debouncer that also collects the payload of every trigger
//!
//! Payloads live inside the engine state, so the payloads and the count
//! delivered by one dispatch are always taken together.

use crate::debouncer::{DebouncerBuilder, DebouncerHandle};
use crate::engine::Engine;
use crate::error::Result;
use crate::settings::Settings;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Aggregated notification with the payloads in trigger order
#[derive(Debug)]
pub struct BufferedEvent<T> {
    pub count: u64,
    pub payloads: Vec<T>,
    pub source: DebouncerHandle<T>,
}

/// Payload-carrying debouncer
///
/// Reaching the payload limit forces an immediate dispatch. While a
/// handler is running a full buffer rejects further triggers with
/// [`DebounceError::AtCapacity`](crate::DebounceError::AtCapacity).
pub struct BufferedDebouncer<T: Send + 'static> {
    engine: Arc<Engine<T>>,
}

impl<T: Send + 'static> BufferedDebouncer<T> {
    /// Default settings, unbounded payload buffer, ambient runtime
    pub fn new<F>(handler: F) -> Result<Self>
    where
        F: Fn(BufferedEvent<T>) + Send + Sync + 'static,
    {
        DebouncerBuilder::default().build_buffered(handler)
    }

    pub(crate) fn from_engine(engine: Arc<Engine<T>>) -> Self {
        Self { engine }
    }

    /// Append `data` and record one trigger
    pub fn trigger(&self, data: T) -> Result<()> {
        self.engine.trigger_with(data)
    }

    /// Discard the pending batch, returning its count and payloads
    pub fn reset(&self) -> (u64, Vec<T>) {
        let batch = self.engine.reset();
        (batch.count, batch.payloads)
    }

    pub fn payload_limit(&self) -> usize {
        self.engine.payload_limit()
    }

    /// Must be at least 1; a buffer already at the new limit dispatches
    /// before this returns
    pub fn set_payload_limit(&self, value: usize) -> Result<()> {
        self.engine.set_payload_limit(value)
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

    pub fn settings(&self) -> Settings {
        self.engine.settings()
    }

    pub fn set_settings(&self, value: Settings) -> Result<()> {
        self.engine.update_settings(|s| *s = value)
    }

    pub fn handle(&self) -> DebouncerHandle<T> {
        self.engine.handle()
    }

    pub fn dispose(&self) {
        self.engine.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.engine.is_disposed()
    }
}

impl<T: Send + 'static> Drop for BufferedDebouncer<T> {
    fn drop(&mut self) {
        self.engine.dispose();
    }
}

impl<T: Send + 'static> fmt::Debug for BufferedDebouncer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedDebouncer")
            .field("settings", &self.engine.settings())
            .field("payload_limit", &self.engine.payload_limit())
            .field("disposed", &self.engine.is_disposed())
            .finish()
    }
}
