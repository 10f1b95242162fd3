//! Ingest tracker server binary
//!
//! Run with: cargo run -p ingest-tracker --bin ingest-tracker-server -- --config tracker.toml

use clap::Parser;
use ingest_tracker::{config::TrackerConfig, server::TrackerServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "ingest-tracker-server")]
#[command(about = "Document version tracking and progress aggregation service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(long, short, env = "INGEST_TRACKER_CONFIG")]
    config: Option<PathBuf>,

    /// Bind host, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides the configuration
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest_tracker=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Tracking store: {}", config.store.path.display());
    tracing::info!("  - OCR provider: {}", config.ocr.base_url);
    tracing::info!("  - Blob root: {}", config.blobs.root.display());
    tracing::info!(
        "  - Retention: {} days, history limit {}",
        config.tracking.retention_days,
        config.tracking.history_limit
    );

    let server = TrackerServer::new(config).await?;

    println!("\nIngest tracker starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
