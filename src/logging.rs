//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level when it is set.

use crate::config::EngineConfig;
use crate::error::{AcqError, AcqResult};
use tracing_subscriber::EnvFilter;

/// Output format of the fmt subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for terminals
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

fn filter_for(level: &str) -> AcqResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(format!("rust_acqeng={level},warn"))
            .map_err(|e| AcqError::Configuration(format!("invalid log filter: {e}"))),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(level: &str, format: LogFormat) -> AcqResult<()> {
    let filter = filter_for(level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| AcqError::Configuration(format!("logging already initialised: {e}")))
}

/// Installs the subscriber at the configured level, raised to `debug` in
/// debug mode.
pub fn init_from_config(config: &EngineConfig, format: LogFormat) -> AcqResult<()> {
    let level = if config.debug_mode {
        "debug"
    } else {
        config.log_level.as_str()
    };
    init(level, format)
}
