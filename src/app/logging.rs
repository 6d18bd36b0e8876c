use super::config::LogLevel;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("failed to install subscriber: {0}")]
    InstallFailed(String),
}

/// Initializes the global tracing subscriber once. Noisy HTTP internals are
/// pinned to warn so the pipeline's own logs stay readable at debug.
pub fn init(level: LogLevel) -> Result<(), LoggingError> {
    let filter = format!("{},hyper=warn,reqwest=warn,h2=warn", level.as_str());
    let env_filter =
        EnvFilter::try_new(&filter).map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).compact());

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::InstallFailed(e.to_string()))?;
    Ok(())
}
