//! Structured logging bootstrap.

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};

/// Environment variable that overrides the configured filter.
pub const FILTER_ENV: &str = "RUST_LOG";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directives could not be parsed.
    #[error("invalid log filter {directives:?}: {source}")]
    Filter {
        /// Directives that failed to parse.
        directives: String,
        /// Parser error.
        #[source]
        source: ParseError,
    },

    /// A global subscriber is already installed.
    #[error("tracing already initialised: {0}")]
    AlreadyInitialised(#[from] TryInitError),
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG`, when set and non-empty, replaces the configured filter.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for malformed directives and
/// [`TelemetryError::AlreadyInitialised`] when called a second time.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config, std::env::var(FILTER_ENV).ok())?;
    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer().with_target(config.with_target).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_current_span(true)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()?;
    Ok(())
}

fn build_filter(
    config: &LoggingConfig,
    env_override: Option<String>,
) -> Result<EnvFilter, TelemetryError> {
    let directives = env_override
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.filter.clone());
    EnvFilter::try_new(&directives).map_err(|source| TelemetryError::Filter { directives, source })
}
