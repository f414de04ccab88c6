//! Council document pipeline binary.
//!
//! Grounded on this codebase's own `main.rs`: load `.env` first, then
//! initialize `tracing-subscriber` off an `EnvFilter`, then hand off to
//! the real entry point.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use council_pipeline::config::LogFormat;
use council_pipeline::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: council-pipeline <config.toml>"))?;

    let config = Config::load(std::path::Path::new(&config_path))?;

    let default_filter = format!("council_pipeline={}", config.logging.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    match config.logging.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    let orchestrator = council_pipeline::Orchestrator::new(config)?;
    let summary = orchestrator.run().await?;
    tracing::info!(?summary, "pipeline run complete");
    Ok(())
}
