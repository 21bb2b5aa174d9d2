//! Logging setup.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, TollgateError};

/// Levels accepted in configuration; anything else falls back to `info`.
const KNOWN_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Resolve the filter directive for the configured level.
pub fn level_directive(level: &str) -> &'static str {
    let level = level.trim().to_ascii_lowercase();
    KNOWN_LEVELS
        .iter()
        .copied()
        .find(|known| *known == level)
        .unwrap_or("info")
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    installed.map_err(|e| TollgateError::Config(format!("Failed to initialize logging: {}", e)))
}
