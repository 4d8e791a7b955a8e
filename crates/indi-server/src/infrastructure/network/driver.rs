//! Remote drivers: device connections the server dials out to.
//!
//! A loaded driver is a TCP connection to an INDI driver (or to another INDI
//! server) that is served exactly like an accepted connection, except that it
//! is registered as a device.  It is known by its `host:port` identifier.

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::route_messages::PartyKind;
use crate::infrastructure::network::{serve_connection, IndiServer, ServerError};

/// A running driver connection.
pub struct DriverHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl IndiServer {
    /// Connects to a remote driver and registers it as a device.
    ///
    /// Returns the driver's identifier (`host:port`).  An identifier whose
    /// earlier connection has already ended may be loaded again.
    ///
    /// # Errors
    ///
    /// - [`ServerError::DriverAlreadyLoaded`] if the identifier is live.
    /// - [`ServerError::DriverConnect`] if the TCP connect fails.
    pub async fn load_network_driver(&self, host: &str, port: u16) -> Result<String, ServerError> {
        let identifier = format!("{host}:{port}");
        let mut drivers = self.drivers.lock().await;
        if drivers
            .get(&identifier)
            .is_some_and(|handle| !handle.task.is_finished())
        {
            return Err(ServerError::DriverAlreadyLoaded(identifier));
        }

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ServerError::DriverConnect {
                identifier: identifier.clone(),
                source,
            })?;

        let (stop, stop_rx) = oneshot::channel::<()>();
        let engine = self.engine();
        let task = tokio::spawn({
            let identifier = identifier.clone();
            async move {
                let shutdown = async {
                    let _ = stop_rx.await;
                };
                match serve_connection(stream, PartyKind::Device, identifier.clone(), engine, shutdown)
                    .await
                {
                    Ok(()) => info!("driver {identifier} closed"),
                    Err(e) => warn!("driver {identifier} closed with error: {e:#}"),
                }
            }
        });

        drivers.insert(identifier.clone(), DriverHandle { stop, task });
        info!("loaded driver {identifier}");
        Ok(identifier)
    }

    /// Disconnects a loaded driver and waits for its connection to wind down.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownDriver`] if no such driver is loaded.
    pub async fn unload_driver(&self, identifier: &str) -> Result<(), ServerError> {
        let handle = self
            .drivers
            .lock()
            .await
            .remove(identifier)
            .ok_or_else(|| ServerError::UnknownDriver(identifier.to_string()))?;
        handle.shutdown(identifier).await;
        info!("unloaded driver {identifier}");
        Ok(())
    }

    /// Identifiers of every loaded driver, sorted.
    pub async fn loaded_drivers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.drivers.lock().await.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    pub(super) async fn unload_all_drivers(&self) {
        let drained: Vec<(String, DriverHandle)> = self.drivers.lock().await.drain().collect();
        for (identifier, handle) in drained {
            handle.shutdown(&identifier).await;
        }
    }
}

impl DriverHandle {
    async fn shutdown(self, identifier: &str) {
        // The task may already have ended on its own.
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("driver task {identifier} failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
