//! Error types for debouncer operations

use thiserror::Error;

/// Errors reported synchronously to callers of a debouncer
///
/// None of these are retried by the debouncer itself; the caller decides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebounceError {
    /// A property was given a value it does not accept
    #[error("invalid value for {property}: {reason}")]
    InvalidConfiguration {
        /// Name of the rejected property
        property: &'static str,
        /// Why the value was rejected
        reason: &'static str,
    },

    /// The debouncer has been disposed
    #[error("debouncer has been disposed")]
    Disposed,

    /// The payload buffer is full while a handler is still running
    #[error("payload buffer at capacity ({limit} items) while a handler is dispatching")]
    AtCapacity {
        /// Configured payload limit
        limit: usize,
    },

    /// No tokio runtime was available to drive timers and handlers
    #[error("no tokio runtime available; construct inside a runtime or pass a handle")]
    NoRuntime,

    /// A settings file could not be read or parsed
    #[error("invalid settings file: {0}")]
    Config(String),
}

/// Result type for debouncer operations
pub type Result<T> = std::result::Result<T, DebounceError>;
