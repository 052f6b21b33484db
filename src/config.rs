//! Session configuration.
//!
//! `SessionConfig` holds the tuning knobs of the engine (chunk size, poll rate,
//! progress throttling, queue bounds). `OpenOptions` carries the per-session
//! parameters of [`Session::open`](crate::Session::open).
//!
//! With the `config` feature enabled, a `SessionConfig` can be read from a TOML
//! file; every field is optional there and falls back to its default.

use crate::error::{LogtailError, Result};
use crate::extract::Severity;
use std::time::Duration;

/// Default cap applied by `get_text` in abbreviate mode
pub const DEFAULT_MAX_LINE_LENGTH: usize = 100_000;

/// Tuning parameters for a session
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct SessionConfig {
    /// Bytes read per scanner syscall
    pub chunk_size: usize,
    /// Interval between metadata polls of a watched file, in milliseconds
    pub poll_interval_ms: u64,
    /// Minimum interval between two progress events of one file, in milliseconds
    pub progress_interval_ms: u64,
    /// Per-subscriber event queue bound
    pub event_queue_capacity: usize,
    /// Abbreviation cap used when a caller does not pass one
    pub max_line_length: usize,
    /// Number of decoded lines kept in the text cache
    pub text_cache_lines: usize,
    /// Bytes of each line handed to the timestamp recognizer
    pub timestamp_probe_bytes: usize,
    /// Global lines evaluated per filter batch before re-checking the predicate generation
    pub filter_batch_lines: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            poll_interval_ms: 250,
            progress_interval_ms: 100,
            event_queue_capacity: 256,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            text_cache_lines: 1024,
            timestamp_probe_bytes: 4096,
            filter_batch_lines: 4096,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(LogtailError::config("chunk_size must be greater than zero"));
        }
        if self.event_queue_capacity == 0 {
            return Err(LogtailError::config(
                "event_queue_capacity must be greater than zero",
            ));
        }
        if self.filter_batch_lines == 0 {
            return Err(LogtailError::config(
                "filter_batch_lines must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Parse a configuration from TOML text
    #[cfg(feature = "config")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SessionConfig =
            toml::from_str(text).map_err(|e| LogtailError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    #[cfg(feature = "config")]
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LogtailError::file_access(path, "Failed to read configuration file", e)
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `<config_dir>/logtail/config.toml`, or defaults when it does not exist
    #[cfg(feature = "config")]
    pub fn load_default() -> Result<Self> {
        match dirs::config_dir().map(|dir| dir.join("logtail").join("config.toml")) {
            Some(path) if path.is_file() => {
                log::debug!("loading configuration from {}", path.display());
                Self::load_from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// Parameters of a single `open` call
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Keep only the newest `max_lines` lines of the initial merge
    pub max_lines: Option<u64>,
    /// Minimum severity a line needs to pass the filter
    pub min_level: Option<Severity>,
    /// Whether the session may follow appended content
    pub can_tail: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            max_lines: None,
            min_level: None,
            can_tail: true,
        }
    }
}

impl OpenOptions {
    /// Build options from the loosely typed arguments a front end collects.
    pub fn new(max_lines: Option<u64>, min_level: Option<&str>, can_tail: bool) -> Result<Self> {
        let min_level = min_level.map(str::parse::<Severity>).transpose()?;
        Ok(Self {
            max_lines,
            min_level,
            can_tail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_line_length, 100_000);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = SessionConfig {
            chunk_size: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LogtailError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_open_options_parse_level() {
        let options = OpenOptions::new(Some(10), Some("warning"), false).unwrap();
        assert_eq!(options.min_level, Some(Severity::Warn));
        assert_eq!(options.max_lines, Some(10));
        assert!(!options.can_tail);

        assert!(matches!(
            OpenOptions::new(None, Some("loud"), true),
            Err(LogtailError::InvalidArgument { .. })
        ));
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SessionConfig::from_toml_str("poll_interval_ms = 50\n").unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.chunk_size, SessionConfig::default().chunk_size);
    }
}
