//! Concurrent event coalescing
//!
//! This crate provides a debouncer that:
//! - Accepts triggers from any number of threads on a lock-free fast path
//! - Delivers one aggregated event per batch to a consumer handler
//! - Never runs the handler concurrently with itself
//! - Honours five timing constraints: debounce window, debounce timeout,
//!   event spacing, handler spacing and timing granularity
//! - Optionally collects a payload per trigger ([`BufferedDebouncer`])
//!
//! Timers and handler invocations are driven by a tokio runtime.

mod accumulator;
mod clock;
mod engine;
mod timer;

pub mod buffered;
pub mod debouncer;
pub mod error;
pub mod settings;

// Re-exports
pub use buffered::{BufferedDebouncer, BufferedEvent};
pub use debouncer::{DebouncedEvent, Debouncer, DebouncerBuilder, DebouncerHandle};
pub use error::{DebounceError, Result};
pub use settings::{DebouncerSettings, Settings, INFINITE};
pub use timer::MAX_TIMER_DELAY;
