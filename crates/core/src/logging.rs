//! Structured logging infrastructure for Tracekeep.
//!
//! Centralized `tracing` initialization with text or JSON output and
//! environment-based filtering.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the logging system with human readable output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use tracekeep_core::logging;
///
/// logging::init();
/// tracing::info!("Key custody service started");
/// ```
pub fn init() {
    init_with(&LoggingConfig::default());
}

/// Initialize the logging system with JSON output for production environments.
pub fn init_json() {
    init_with(&LoggingConfig {
        format: LogFormat::Json,
        ..LoggingConfig::default()
    });
}

/// Initialize logging from the `[logging]` configuration section.
///
/// `RUST_LOG` still takes precedence over `default_filter`. Calling this more
/// than once is a no-op.
pub fn init_with(config: &LoggingConfig) {
    let filter = build_filter(&config.default_filter);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

fn build_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_default_filter_falls_back() {
        let _ = build_filter("not a [valid filter");
    }

    #[test]
    fn test_repeated_init_does_not_panic() {
        init();
        init_json();
    }
}
