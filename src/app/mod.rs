//! Application assembly: configuration, logging setup, pipeline wiring and
//! the binary entry point.

pub mod config;
pub mod logging;
pub mod pipeline;

pub use config::{Config, ConfigError, LogLevel};
pub use pipeline::{Pipeline, PipelineError};

use tokio::signal;

/// Binary entry point: builds the pipeline from configuration and runs it
/// until a shutdown signal arrives.
pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(std::env::args())?;
    logging::init(config.log_level)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        collector = %config.collector_url,
        "audit-forwarder starting"
    );

    let pipeline = Pipeline::new(&config)?;
    pipeline.start();

    signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    pipeline.shutdown().await;
    Ok(())
}
