//! Tracing subscriber setup.
//!
//! Binaries call [`init`] once with the `[logging]` table of the hardware
//! config. `RUST_LOG` takes precedence over the configured level. Calling
//! `init` again is harmless, which keeps tests and embedding hosts simple.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{AppResult, DaqError};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Parse a level name (case-insensitive).
pub fn parse_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DaqError::Configuration(format!(
            "invalid log level '{}', expected one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> AppResult<()> {
    let level = parse_level(&config.level)?;
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // dispatcher installed; only the `log` bridge was taken by a host logger
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(DaqError::Configuration(format!(
            "failed to initialize tracing: {e}"
        ))),
    }
}
