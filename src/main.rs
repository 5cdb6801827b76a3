//! Sensorcast server
//!
//! Run with: cargo run -- --addr :3000
//!
//! Configuration is read from `--config`, then the default locations, then
//! `SENSORCAST_*` environment variables; command-line flags win over all of
//! them. `RUST_LOG` overrides the configured log level.

use clap::{Parser, Subcommand};
use sensorcast::config::{generate_default_config, Config, LogFormat, LoggingConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sensorcast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stream live sensor readings to WebSocket viewers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: search standard locations)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP service address, e.g. ":3000" or "127.0.0.1:8080"
    #[arg(long)]
    pub addr: Option<String>,

    /// Directory of viewer assets served at /
    #[arg(long)]
    pub assets: Option<PathBuf>,

    /// Milliseconds between readings
    #[arg(long)]
    pub tick_ms: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the default config file
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::PrintConfig) = cli.command {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default()?,
    };

    if let Some(addr) = &cli.addr {
        config.server.set_addr(addr)?;
    }
    if let Some(assets) = cli.assets {
        config.server.assets_dir = assets;
    }
    if let Some(tick_ms) = cli.tick_ms {
        config.producer.tick_ms = tick_ms;
    }

    init_tracing(&config.logging);

    tracing::info!("Starting Sensorcast v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Assets directory: {:?}", config.server.assets_dir);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        sensorcast::api::shutdown_signal().await;
        trigger.cancel();
    });

    sensorcast::server::run(config, shutdown).await?;

    tracing::info!("Goodbye");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("sensorcast={},tower_http={}", logging.level, logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
