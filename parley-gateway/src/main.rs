//! Parley Gateway - Main entry point.

use anyhow::Result;
use parley_common::config::Config;
use parley_common::logging::init_logging_with_exclusions;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration, then apply PARLEY_* / ANTHROPIC_* overrides
    let config = Config::load_with_env()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Parley Gateway v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Invalid configuration: {}", e));
    }

    parley_gateway::start_server(&config).await
}
