//! Telepipe Collector Binary
//!
//! Loads the collector document named by `TELEPIPE_CONFIG` and runs the pipeline
//! until SIGTERM/SIGINT.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use collector::{run_collector, Settings};
use shared::config::{CollectorConfig, LogFormat, LogSettings};
use tracing_subscriber::EnvFilter;

/// Initializes tracing. `RUST_LOG` overrides the level from the document.
fn init_tracing(logs: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logs.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logs.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let settings = Settings::from_env()?;
    let config = CollectorConfig::from_file(&settings.config_path).with_context(|| {
        format!(
            "failed to load collector config from {}",
            settings.config_path.display()
        )
    })?;

    init_tracing(&config.telemetry.logs);
    tracing::info!(
        config = %settings.config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Telepipe collector starting"
    );

    run_collector(config, settings.shutdown_grace).await
}
