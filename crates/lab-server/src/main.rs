//! `labd`: the lab-control daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lab_server::{DeviceRegistry, InstrumentServer, ServerConfig};
use lab_storage::JsonlStore;

#[derive(Parser)]
#[command(name = "labd", about = "Instrument-control daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the instrument and data services.
    Serve {
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Interface to bind, overriding the configuration.
        #[arg(long)]
        host: Option<String>,
        /// Instrument service port, overriding the configuration.
        #[arg(long)]
        port: Option<u16>,
        /// Data service port, overriding the configuration.
        #[arg(long)]
        data_port: Option<u16>,
        /// Data store file, overriding the configuration.
        #[arg(long)]
        data_file: Option<PathBuf>,
        /// Run the interactive operator console on stdin.
        #[arg(long)]
        console: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            data_port,
            data_file,
            console,
        } => {
            let mut settings =
                ServerConfig::load(config.as_deref()).context("loading configuration")?;
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.instrument_port = port;
            }
            if let Some(port) = data_port {
                settings.data_port = port;
            }
            if let Some(file) = data_file {
                settings.data_file = file;
            }
            serve(settings, console).await
        }
    }
}

async fn serve(settings: ServerConfig, console: bool) -> Result<()> {
    let store = Arc::new(JsonlStore::open(&settings.data_file).context("opening data store")?);
    let registry = Arc::new(DeviceRegistry::new(lab_drivers::driver_registry()));
    let server = InstrumentServer::new(settings, registry.clone(), store);
    server.start().await.context("starting server")?;

    if console {
        tokio::select! {
            _ = lab_server::console::run(registry, server.measurements()) => {
                info!("console closed, shutting down");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
            }
        }
    } else {
        tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
        info!("interrupt received, shutting down");
    }

    server.stop().await.context("stopping server")?;
    Ok(())
}
