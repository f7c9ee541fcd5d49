//! MELFA driver - offline-programming host bridge
//!
//! Reads host instructions from stdin, answers on stdout, logs to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use melfad::{ConsoleReporter, Driver, DriverConfig};
use std::sync::Arc;
use tokio::io::{self, BufReader};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "melfad")]
#[command(about = "Driver for Mitsubishi MELFA robot controllers")]
#[command(version)]
struct Args {
    /// Path to the driver configuration file (YAML or JSON)
    #[arg(short, long, env = "MELFAD_CONFIG")]
    config: Option<String>,

    /// Controller address, overrides the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Controller command port
    #[arg(long)]
    port: Option<u16>,

    /// Number of robot axes
    #[arg(long)]
    axes: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "melfad=info")]
    log_level: String,

    /// Connect right after startup instead of waiting for CONNECT
    #[arg(long)]
    connect: bool,
}

impl Args {
    fn load_config(&self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path))?,
            None => DriverConfig::default(),
        };
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(axes) = self.axes {
            config.robot.axis_count = axes;
        }
        config.validate().context("Invalid driver configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let config = args.load_config()?;
    info!(
        "Controller {}:{} with {} axes",
        config.connection.host, config.connection.port, config.robot.axis_count
    );

    let mut driver = Driver::new(config, Arc::new(ConsoleReporter))
        .context("Failed to create driver")?;
    driver.announce();

    if args.connect && !driver.connect_configured().await {
        error!("Initial connection failed, waiting for CONNECT");
    }

    let reader = BufReader::new(io::stdin());
    driver.run(reader, shutdown_signal()).await?;

    info!("Driver stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
