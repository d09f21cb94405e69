//! Telepipe CLI
//!
//! Command-line interface for validating collector documents and inspecting a
//! running collector.
//!
//! # Usage
//!
//! ```bash
//! telepipe --help
//! telepipe validate --config config/collector.yaml
//! telepipe health --api-url http://localhost:4318
//! telepipe stats
//! ```

#![deny(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::config::{CollectorConfig, ReceiverConfig};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Telepipe CLI - OTLP telemetry pipeline command-line interface
#[derive(Parser)]
#[command(name = "telepipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// HTTP address of a collector's OTLP receiver
    #[arg(
        short,
        long,
        env = "TELEPIPE_API_URL",
        default_value = "http://localhost:4318",
        global = true
    )]
    api_url: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a collector document, then print its pipelines
    Validate {
        /// Path of the collector document
        #[arg(short, long, env = "TELEPIPE_CONFIG", default_value = "config/collector.yaml")]
        config: PathBuf,
    },
    /// Check collector health
    Health,
    /// Print receiver and exporter counters
    Stats,
}

/// Renders the resolved pipelines of a validated document.
fn render_pipelines(config: &CollectorConfig) -> String {
    let mut out = String::new();
    for (kind, pipeline) in &config.pipelines {
        let _ = writeln!(out, "{kind}:");
        for id in &pipeline.receivers {
            let ReceiverConfig::Otlp(settings) = &config.receivers[id];
            let mut listeners = Vec::new();
            if let Some(grpc) = &settings.protocols.grpc {
                listeners.push(format!("grpc {}", grpc.endpoint));
            }
            if let Some(http) = &settings.protocols.http {
                listeners.push(format!("http {}", http.endpoint));
            }
            let _ = writeln!(out, "  <- {id} ({})", listeners.join(", "));
        }
        for id in &pipeline.exporters {
            let _ = writeln!(out, "  -> {id} ({})", config.exporters[id].type_name());
        }
    }
    out
}

fn validate(path: &Path) -> Result<()> {
    let config = CollectorConfig::from_file(path)
        .with_context(|| format!("{} is not a valid collector document", path.display()))?;
    println!("{} is valid", path.display());
    print!("{}", render_pipelines(&config));
    Ok(())
}

/// GETs a JSON document from the collector.
async fn fetch_json(api_url: &str, path: &str) -> Result<serde_json::Value> {
    let url = format!("{}{path}", api_url.trim_end_matches('/'));
    tracing::debug!(%url, "Querying collector");

    let response = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach collector at {url}"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("{url} responded with status {status}");
    }
    response
        .json()
        .await
        .with_context(|| format!("{url} did not return JSON"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate { config }) => validate(&config)?,
        Some(Commands::Health) => {
            let health = fetch_json(&cli.api_url, "/health").await?;
            println!(
                "{} {} ({}) is {}",
                health["service"].as_str().unwrap_or("collector"),
                health["version"].as_str().unwrap_or("?"),
                cli.api_url,
                health["status"].as_str().unwrap_or("unknown"),
            );
        }
        Some(Commands::Stats) => {
            let stats = fetch_json(&cli.api_url, "/internal/stats").await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        None => {
            println!("Telepipe CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
