//! Timing properties, validation and the TOML settings file

use crate::error::{DebounceError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Marker for an unbounded duration
///
/// Only `debounce_timeout` accepts it; it disables the timeout clause.
pub const INFINITE: Duration = Duration::MAX;

/// The five timing constraints of a debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Quiet period required after the last trigger
    pub debounce_window: Duration,
    /// Longest a batch may wait after its first trigger (`INFINITE` disables)
    pub debounce_timeout: Duration,
    /// Minimum time between two handler starts
    pub event_spacing: Duration,
    /// Minimum time between a handler finishing and the next one starting
    pub handler_spacing: Duration,
    /// Maximum staleness of the last-trigger clock under fast-path triggering
    pub timing_granularity: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debounce_window: Duration::ZERO,
            debounce_timeout: INFINITE,
            event_spacing: Duration::ZERO,
            handler_spacing: Duration::ZERO,
            timing_granularity: Duration::ZERO,
        }
    }
}

impl Settings {
    /// Check every property against its own rule
    ///
    /// There are deliberately no cross-field ordering rules.
    pub fn validate(&self) -> Result<()> {
        finite("debounce_window", self.debounce_window)?;
        finite("event_spacing", self.event_spacing)?;
        finite("handler_spacing", self.handler_spacing)?;
        finite("timing_granularity", self.timing_granularity)?;
        Ok(())
    }

    /// Whether the timeout clause participates in scheduling
    pub fn has_timeout(&self) -> bool {
        self.debounce_timeout != INFINITE
    }
}

/// Reject `INFINITE` for a property that does not permit it
pub(crate) fn finite(property: &'static str, value: Duration) -> Result<Duration> {
    if value == INFINITE {
        return Err(DebounceError::InvalidConfiguration {
            property,
            reason: "infinite is not permitted",
        });
    }
    Ok(value)
}

/// Validate a payload limit
pub(crate) fn payload_limit(value: usize) -> Result<usize> {
    if value == 0 {
        return Err(DebounceError::InvalidConfiguration {
            property: "payload_limit",
            reason: "must be at least 1",
        });
    }
    Ok(value)
}

/// On-disk settings, e.g. `debounce.toml`
///
/// ```toml
/// debounce_window_ms = 200
/// debounce_timeout_ms = 2000   # omit for no timeout
/// event_spacing_ms = 0
/// handler_spacing_ms = 50
/// timing_granularity_ms = 10
/// payload_limit = 1000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebouncerSettings {
    pub debounce_window_ms: u64,
    /// `None` means no timeout
    pub debounce_timeout_ms: Option<u64>,
    pub event_spacing_ms: u64,
    pub handler_spacing_ms: u64,
    pub timing_granularity_ms: u64,
    /// Only used by the buffered variant
    pub payload_limit: Option<usize>,
}

impl DebouncerSettings {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| DebounceError::Config(e.to_string()))?;
        settings.to_settings()?;
        if let Some(limit) = settings.payload_limit {
            payload_limit(limit)?;
        }
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DebounceError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| DebounceError::Config(e.to_string()))
    }

    /// Convert to validated timing settings
    pub fn to_settings(&self) -> Result<Settings> {
        let settings = Settings {
            debounce_window: Duration::from_millis(self.debounce_window_ms),
            debounce_timeout: self
                .debounce_timeout_ms
                .map_or(INFINITE, Duration::from_millis),
            event_spacing: Duration::from_millis(self.event_spacing_ms),
            handler_spacing: Duration::from_millis(self.handler_spacing_ms),
            timing_granularity: Duration::from_millis(self.timing_granularity_ms),
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.debounce_window, Duration::ZERO);
        assert_eq!(settings.debounce_timeout, INFINITE);
        assert!(!settings.has_timeout());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_infinite_only_for_timeout() {
        let settings = Settings {
            debounce_timeout: INFINITE,
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());

        let settings = Settings {
            handler_spacing: INFINITE,
            ..Settings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(DebounceError::InvalidConfiguration {
                property: "handler_spacing",
                reason: "infinite is not permitted",
            })
        );
    }

    #[test]
    fn test_no_cross_field_ordering() {
        // granularity > window > timeout is allowed
        let settings = Settings {
            debounce_window: Duration::from_millis(100),
            debounce_timeout: Duration::from_millis(10),
            timing_granularity: Duration::from_millis(500),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_payload_limit_rule() {
        assert!(payload_limit(0).is_err());
        assert_eq!(payload_limit(1), Ok(1));
    }

    #[test]
    fn test_parse_toml() {
        let parsed = DebouncerSettings::from_toml_str(
            "debounce_window_ms = 200\nhandler_spacing_ms = 50\npayload_limit = 16\n",
        )
        .unwrap();
        let settings = parsed.to_settings().unwrap();

        assert_eq!(settings.debounce_window, Duration::from_millis(200));
        assert_eq!(settings.handler_spacing, Duration::from_millis(50));
        assert_eq!(settings.debounce_timeout, INFINITE);
        assert_eq!(parsed.payload_limit, Some(16));
    }

    #[test]
    fn test_parse_rejects_unknown_and_invalid() {
        assert!(matches!(
            DebouncerSettings::from_toml_str("window = 5\n"),
            Err(DebounceError::Config(_))
        ));
        assert!(matches!(
            DebouncerSettings::from_toml_str("payload_limit = 0\n"),
            Err(DebounceError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("debounce.toml");

        let original = DebouncerSettings {
            debounce_window_ms: 25,
            debounce_timeout_ms: Some(400),
            ..DebouncerSettings::default()
        };
        fs::write(&path, original.to_toml_string().unwrap()).unwrap();

        let loaded = DebouncerSettings::load(&path).unwrap();
        assert_eq!(loaded, original);

        let missing = DebouncerSettings::load(&temp_dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(DebounceError::Config(_))));
    }
}
