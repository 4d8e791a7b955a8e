//! INDI server entry point.
//!
//! Accepts client connections, dials the configured remote drivers and
//! relays messages between them until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! indi-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>       TOML configuration file [default: indi-server.toml]
//!   --port   <PORT>       Listening port (overrides the config file)
//!   --bind   <ADDR>       Listening address (overrides the config file)
//!   --driver <HOST[:PORT]> Remote driver to load at start (repeatable)
//! ```
//!
//! Log verbosity comes from `RUST_LOG`; without it, the config file's
//! `log_level` applies.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use indi_server::infrastructure::network::IndiServer;
use indi_server::infrastructure::storage::config::{DriverEntry, ServerConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// INDI server.
#[derive(Debug, Parser)]
#[command(
    name = "indi-server",
    about = "Relay INDI properties between clients and device drivers",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "indi-server.toml", env = "INDI_SERVER_CONFIG")]
    config: PathBuf,

    /// TCP port to listen on.
    #[arg(long, env = "INDI_SERVER_PORT")]
    port: Option<u16>,

    /// Address to bind, e.g. `127.0.0.1` to accept local clients only.
    #[arg(long, env = "INDI_SERVER_BIND")]
    bind: Option<String>,

    /// Remote driver to load, as `host[:port]`.  Repeatable; added to the
    /// drivers listed in the config file.
    #[arg(long = "driver", value_name = "HOST[:PORT]", value_parser = DriverEntry::parse)]
    drivers: Vec<DriverEntry>,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded configuration.
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(bind) = self.bind {
            config.network.bind_address = bind;
        }
        config.drivers.extend(self.drivers);
        config
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let config = cli.apply(config);
    info!(
        "INDI server starting on {}:{} with {} driver(s)",
        config.network.bind_address,
        config.network.port,
        config.drivers.len()
    );

    let server = Arc::new(IndiServer::new(config));

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                stopper.stop();
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    server.run().await.context("server failed")?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
