//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. Output is either human readable
//! text or JSON lines; the filter comes from `RUST_LOG` when set and from the
//! gateway settings otherwise.

use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::{LogFormat, LoggingConfig};

/// Default filter: our crate at `level`, HTTP tracing one notch quieter
pub fn default_directives(level: &str) -> String {
    format!("function_gateway={level},tower_http=info,warn", level = level)
}

/// Build the filter, preferring `RUST_LOG`
pub fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { config.level.as_str() };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialize the global subscriber
///
/// A second initialization (tests, embedding applications) is ignored.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) {
    let filter = build_filter(config, verbose);

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(verbose))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives("debug"),
            "function_gateway=debug,tower_http=info,warn"
        );
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        let config = LoggingConfig::default();
        init_tracing(&config, false);
        init_tracing(&config, true);
    }
}
