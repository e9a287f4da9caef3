//! Tracing subscriber setup.
//!
//! Library code logs through the `log` facade and `tracing` spans; this
//! installs a single `tracing-subscriber` registry that receives both.
//! The `SHEETSCRAPE_LOG` environment variable overrides the configured level
//! using the usual `EnvFilter` directive syntax.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::SheetScrapeError;

pub const LOG_ENV_VAR: &str = "SHEETSCRAPE_LOG";

/// Builds the filter from the environment, falling back to the configured level.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()))
}

/// Installs the global subscriber and the `log` bridge. Fails (instead of
/// panicking) when called twice.
pub fn init_logging(config: &LoggingConfig) -> Result<(), SheetScrapeError> {
    let filter = build_filter(config);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(true).with_thread_names(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    installed.map_err(|e| SheetScrapeError::Logging(e.to_string()))?;

    // set_global_default leaves `log` records alone; route them explicitly.
    tracing_log::LogTracer::init().map_err(|e| SheetScrapeError::Logging(e.to_string()))
}
