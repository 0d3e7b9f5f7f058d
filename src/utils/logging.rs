//! Logging initialization for the agent binary and embedding hosts
//!
//! - Respects the `RUST_LOG` environment variable
//! - Falls back to the filter from [`LoggingConfig`](crate::config::LoggingConfig)
//! - Defaults to `info`
//!
//! # Usage
//! ```rust,no_run
//! use uplink_agent::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the env filter: RUST_LOG first, then the configured filter, then "info"
fn build_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    match filter {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::new("info"),
    }
}

/// Initialize human-readable logging to stderr
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g. "info", "uplink_agent::remote=debug").
///   `RUST_LOG` takes precedence when set.
///
/// Calling this twice in one process is a no-op for the second call.
pub fn init_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(build_filter(filter))
        .try_init();
}

/// Initialize logging with JSON output for log aggregation systems
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(build_filter(filter))
        .try_init();
}

/// Initialize logging from the agent's logging section
///
/// # Example
/// ```rust,no_run
/// use uplink_agent::config::AgentConfig;
/// use uplink_agent::utils::init_logging_from_config;
///
/// let config = AgentConfig::default();
/// init_logging_from_config(config.logging.as_ref());
/// ```
pub fn init_logging_from_config(config: Option<&crate::config::LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            init_logging(filter);
            tracing::warn!("JSON log format requested but the json-logging feature is disabled");
        }
    } else {
        init_logging(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging(Some("debug"));
        init_logging(None);
        tracing::debug!("logging initialized twice");
    }
}
