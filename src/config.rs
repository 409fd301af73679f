//! Engine configuration using Figment
//!
//! Configuration is layered, highest precedence last:
//! 1. Built-in defaults ([`EngineConfig::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `ACQENG_`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! ACQENG_HARDWARE_RETRIES=10
//! ACQENG_IMAGE_QUEUE_CAPACITY=64
//! ACQENG_DEBUG_MODE=true
//! ACQENG_LOG_LEVEL=debug
//! ```
//!
//! Nested keys, if any are added, are separated with `__`.
//!
//! # Example
//!
//! ```no_run
//! use rust_acqeng::config::EngineConfig;
//!
//! let config = EngineConfig::load_from("config/acqeng.toml")?;
//! println!("Queue capacity: {}", config.image_queue_capacity);
//! # Ok::<(), rust_acqeng::error::AcqError>(())
//! ```

use crate::error::{AcqError, AcqResult};
use crate::error_recovery::RetryPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the engine and its pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per hardware command before giving up
    #[serde(default = "default_hardware_retries")]
    pub hardware_retries: u32,
    /// Delay between hardware command attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Capacity of each bounded image queue
    #[serde(default = "default_queue_capacity")]
    pub image_queue_capacity: usize,
    /// Poll interval while paused
    #[serde(default = "default_pause_poll")]
    pub pause_poll_ms: u64,
    /// Poll interval while waiting for an event's minimum start time
    #[serde(default = "default_fast_poll")]
    pub start_time_poll_ms: u64,
    /// Poll interval while a device reports busy
    #[serde(default = "default_fast_poll")]
    pub device_poll_ms: u64,
    /// Poll interval while waiting for frames
    #[serde(default = "default_fast_poll")]
    pub frame_poll_ms: u64,
    /// Poll interval while waiting for a burst to stop
    #[serde(default = "default_sequence_stop_poll")]
    pub sequence_stop_poll_ms: u64,
    /// Notification backlog that triggers a slow-listener warning
    #[serde(default = "default_backlog_warning")]
    pub notification_backlog_warning: usize,
    /// Frame timeout for events that do not set their own
    #[serde(default)]
    pub default_frame_timeout_ms: Option<u64>,
    /// Trace every event through both workers
    #[serde(default)]
    pub debug_mode: bool,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_hardware_retries() -> u32 {
    6
}

fn default_retry_delay() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    30
}

fn default_pause_poll() -> u64 {
    5
}

fn default_fast_poll() -> u64 {
    1
}

fn default_sequence_stop_poll() -> u64 {
    2
}

fn default_backlog_warning() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hardware_retries: default_hardware_retries(),
            retry_delay_ms: default_retry_delay(),
            image_queue_capacity: default_queue_capacity(),
            pause_poll_ms: default_pause_poll(),
            start_time_poll_ms: default_fast_poll(),
            device_poll_ms: default_fast_poll(),
            frame_poll_ms: default_fast_poll(),
            sequence_stop_poll_ms: default_sequence_stop_poll(),
            notification_backlog_warning: default_backlog_warning(),
            default_frame_timeout_ms: None,
            debug_mode: false,
            log_level: default_log_level(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl EngineConfig {
    /// Defaults overridden by `ACQENG_` environment variables.
    pub fn load() -> AcqResult<Self> {
        Self::extract(Self::base_figment())
    }

    /// Defaults, then the TOML file at `path` (skipped if missing), then
    /// environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AcqResult<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(EngineConfig::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("ACQENG_").split("__")),
        )
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Env::prefixed("ACQENG_").split("__"))
    }

    fn extract(figment: Figment) -> AcqResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges after loading.
    ///
    /// # Errors
    ///
    /// Returns `AcqError::Configuration` for zero retries, a zero queue
    /// capacity, a zero backlog threshold or an unknown log level.
    pub fn validate(&self) -> AcqResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(AcqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.hardware_retries == 0 {
            return Err(AcqError::Configuration(
                "hardware_retries must be at least 1".to_string(),
            ));
        }
        if self.image_queue_capacity == 0 {
            return Err(AcqError::Configuration(
                "image_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.notification_backlog_warning == 0 {
            return Err(AcqError::Configuration(
                "notification_backlog_warning must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy for hardware commands.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.hardware_retries,
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    /// Poll interval while paused.
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    /// Poll interval while waiting for an event's start time.
    pub fn start_time_poll(&self) -> Duration {
        Duration::from_millis(self.start_time_poll_ms)
    }

    /// Poll interval while a device is busy.
    pub fn device_poll(&self) -> Duration {
        Duration::from_millis(self.device_poll_ms)
    }

    /// Poll interval while waiting for frames.
    pub fn frame_poll(&self) -> Duration {
        Duration::from_millis(self.frame_poll_ms)
    }

    /// Poll interval while a burst winds down.
    pub fn sequence_stop_poll(&self) -> Duration {
        Duration::from_millis(self.sequence_stop_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policy().max_attempts, 6);
        assert_eq!(config.image_queue_capacity, 30);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "image_queue_capacity = 4").unwrap();
        writeln!(file, "debug_mode = true").unwrap();
        writeln!(file, "default_frame_timeout_ms = 250").unwrap();

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.image_queue_capacity, 4);
        assert!(config.debug_mode);
        assert_eq!(config.default_frame_timeout_ms, Some(250));
        assert_eq!(config.hardware_retries, 6);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = EngineConfig {
            log_level: "verbose".to_string(),
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(AcqError::Configuration(_))));

        let config = EngineConfig {
            image_queue_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
