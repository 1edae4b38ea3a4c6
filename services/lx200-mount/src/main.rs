//! Mount daemon CLI
//!
//! Command-line interface for the LX200 mount control daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;

use lx200_mount::ephemeris::MeeusAstrometry;
use lx200_mount::mock::SimulatedMountFactory;
use lx200_mount::{load_config, Config, ServerBuilder};

#[derive(Parser)]
#[command(name = "lx200-mount")]
#[command(about = "Control daemon for LX200-protocol telescope mounts")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port path (overrides config file)
    #[arg(long)]
    port: Option<String>,

    /// Server port (overrides config file)
    #[arg(long)]
    server_port: Option<u16>,

    /// Run against a simulated mount instead of real hardware
    #[arg(long)]
    mock: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(port) = args.port {
        config.serial.port = port;
    }
    if let Some(server_port) = args.server_port {
        config.server.port = server_port;
    }

    tracing::info!("Starting mount daemon");
    if args.mock {
        tracing::info!("Running in MOCK MODE - no real hardware");
    } else {
        tracing::info!("Serial port: {}", config.serial.port);
        tracing::info!("Baud rate: {}", config.serial.baud_rate);
    }
    tracing::info!(
        "Site: {:.4} {:.4} at {:.0} m",
        config.site.latitude,
        config.site.longitude,
        config.site.elevation
    );
    tracing::info!("Server port: {}", config.server.port);

    let mut builder = ServerBuilder::new(config.clone());
    if args.mock {
        let factory = Arc::new(SimulatedMountFactory::new(
            config.site,
            Arc::new(MeeusAstrometry::new()),
        ));
        builder = builder.with_port_factory(factory);
    }

    builder.build().await?.start().await?;

    Ok(())
}
