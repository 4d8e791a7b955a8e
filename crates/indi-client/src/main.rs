//! INDI command-line client.
//!
//! Connects to an INDI server, waits for definitions to arrive, optionally
//! changes some values, and prints every known element.
//!
//! # Usage
//!
//! ```text
//! indi-client [OPTIONS]
//!
//! Options:
//!   --host   <HOST>    INDI server host [default: localhost]
//!   --port   <PORT>    INDI server port [default: 7624]
//!   --device <NAME>    Only ask for (and list) this device
//!   --wait   <SECS>    How long to wait for definitions [default: 2]
//!   --set    <D.P.E=V> Stage and send a value (repeatable)
//! ```
//!
//! Output lines have the form `device.property.element=value`, the same
//! form `--set` accepts.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indi_core::protocol::messages::DEFAULT_PORT;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use indi_client::application::discovery::wait_for_device;
use indi_client::application::sync_engine::ClientEngine;
use indi_client::infrastructure::network::{ClientConnectionConfig, ServerConnection};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// One `--set device.property.element=value` argument.
#[derive(Debug, Clone, PartialEq)]
struct Assignment {
    device: String,
    property: String,
    element: String,
    value: String,
}

/// Splits `device.property.element=value`.
///
/// The last two dots separate property and element, so device names may
/// themselves contain dots.
fn parse_assignment(arg: &str) -> Result<Assignment, String> {
    let (path, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected device.property.element=value, got {arg:?}"))?;
    let mut parts = path.rsplitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(element), Some(property), Some(device))
            if !element.is_empty() && !property.is_empty() && !device.is_empty() =>
        {
            Ok(Assignment {
                device: device.to_string(),
                property: property.to_string(),
                element: element.to_string(),
                value: value.to_string(),
            })
        }
        _ => Err(format!("expected device.property.element=value, got {arg:?}")),
    }
}

/// Command-line INDI client.
#[derive(Debug, Parser)]
#[command(
    name = "indi-client",
    about = "List and change INDI device properties",
    version
)]
struct Cli {
    /// INDI server host name or IP address.
    #[arg(long, default_value = "localhost", env = "INDI_HOST")]
    host: String,

    /// INDI server TCP port.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "INDI_PORT")]
    port: u16,

    /// Restrict the request and the listing to one device.
    #[arg(long)]
    device: Option<String>,

    /// Seconds to wait for definitions (and for replies after `--set`).
    #[arg(long, default_value_t = 2)]
    wait: u64,

    /// Value to send, as `device.property.element=value`.  Repeatable.
    #[arg(long = "set", value_name = "DEVICE.PROPERTY.ELEMENT=VALUE", value_parser = parse_assignment)]
    set: Vec<Assignment>,
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Stages every assignment, then sends one message per touched property.
fn apply_assignments(engine: &mut ClientEngine, assignments: &[Assignment]) -> anyhow::Result<()> {
    let mut touched: Vec<(&str, &str)> = Vec::new();
    for a in assignments {
        engine
            .stage_text(&a.device, &a.property, &a.element, &a.value)
            .with_context(|| format!("cannot set {}.{}.{}", a.device, a.property, a.element))?;
        if !touched.contains(&(a.device.as_str(), a.property.as_str())) {
            touched.push((a.device.as_str(), a.property.as_str()));
        }
    }
    for (device, property) in touched {
        engine
            .send_changes(device, property)
            .with_context(|| format!("cannot send {device}.{property}"))?;
    }
    Ok(())
}

/// Renders every element as `device.property.element=value`.
fn listing(engine: &ClientEngine, only: Option<&str>) -> Vec<String> {
    engine
        .devices()
        .iter()
        .filter(|d| only.map_or(true, |name| d.name() == name))
        .flat_map(|device| {
            device.properties().iter().flat_map(move |property| {
                property.elements().iter().map(move |element| {
                    format!(
                        "{}.{}.{}={}",
                        device.name(),
                        property.name(),
                        element.name(),
                        element.value_string()
                    )
                })
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let wait = Duration::from_secs(cli.wait);

    let connection = ServerConnection::connect(ClientConnectionConfig {
        host: cli.host.clone(),
        port: cli.port,
    })
    .await
    .context("failed to connect to INDI server")?;
    let engine = connection.engine();

    engine
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .ask_for_devices(cli.device.as_deref(), None)?;

    match cli.device.clone() {
        Some(device) => {
            let shared = engine.clone();
            let found = tokio::task::spawn_blocking(move || {
                wait_for_device(&shared, &device, wait).is_some()
            })
            .await?;
            if !found {
                warn!("device {:?} not defined within {}s", cli.device, cli.wait);
            }
            // Let the rest of the device's definitions arrive.
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        None => tokio::time::sleep(wait).await,
    }

    if !cli.set.is_empty() {
        apply_assignments(&mut lock_write(&engine), &cli.set)?;
        info!("sent {} value(s); waiting for replies", cli.set.len());
        tokio::time::sleep(wait).await;
    }

    for line in listing(&engine.read().unwrap_or_else(PoisonError::into_inner), cli.device.as_deref()) {
        println!("{line}");
    }

    connection.disconnect();
    Ok(())
}

fn lock_write(engine: &RwLock<ClientEngine>) -> std::sync::RwLockWriteGuard<'_, ClientEngine> {
    engine.write().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
