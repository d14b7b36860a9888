//! Log subscriber setup for the binary.

use crate::errors::ChartflowError;
use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Builds the filter: `RUST_LOG` when set, otherwise `level`.
#[must_use]
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`ChartflowError::Internal`] if a subscriber is already set.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), ChartflowError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| ChartflowError::Internal(format!("logging setup failed: {e}")))
}
