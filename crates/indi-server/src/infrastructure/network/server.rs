//! TCP accept loop for client connections.
//!
//! Every accepted connection is a client.  Each gets its own task running
//! [`serve_connection`]; the accept loop never waits on a session.
//!
//! Shutdown is cooperative: [`IndiServer::stop`] clears a shared flag that
//! the accept loop and every session poll every [`SHUTDOWN_POLL`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::application::route_messages::{PartyKind, RoutingEngine};
use crate::infrastructure::network::driver::DriverHandle;
use crate::infrastructure::network::{serve_connection, stopped, ServerError, SHUTDOWN_POLL};
use crate::infrastructure::storage::config::ServerConfig;

/// The INDI server: a routing engine plus its listener and loaded drivers.
pub struct IndiServer {
    config: ServerConfig,
    engine: Arc<RoutingEngine>,
    running: Arc<AtomicBool>,
    pub(super) drivers: Mutex<HashMap<String, DriverHandle>>,
}

impl IndiServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            engine: Arc::new(RoutingEngine::new()),
            running: Arc::new(AtomicBool::new(true)),
            drivers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<RoutingEngine> {
        Arc::clone(&self.engine)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Asks the accept loop and every session to finish.
    pub fn stop(&self) {
        info!("server stop requested");
        self.running.store(false, Ordering::Relaxed);
    }

    /// Binds the configured address, loads the configured drivers and
    /// serves until [`Self::stop`] is called.
    ///
    /// A driver that cannot be loaded is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listening socket cannot be bound.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.network.bind_address, self.config.network.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        for entry in &self.config.drivers {
            if let Err(e) = self.load_network_driver(&entry.host, entry.port).await {
                error!("could not load driver: {e}");
            }
        }

        self.run_with_listener(listener).await
    }

    /// Serves clients from an already-bound listener until stopped.
    ///
    /// On the way out every loaded driver is unloaded.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("INDI server listening on {}", listener.local_addr()?);

        while self.running.load(Ordering::Relaxed) {
            match timeout(SHUTDOWN_POLL, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    tokio::spawn(handle_client(
                        stream,
                        peer,
                        self.engine(),
                        Arc::clone(&self.running),
                    ));
                }
                Ok(Err(e)) => {
                    error!("accept error: {e}");
                }
                Err(_) => {
                    // Timeout: loop back to re-check the running flag.
                }
            }
        }

        self.unload_all_drivers().await;
        info!("INDI server stopped");
        Ok(())
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<RoutingEngine>,
    running: Arc<AtomicBool>,
) {
    info!("client connected from {peer}");
    match serve_connection(
        stream,
        PartyKind::Client,
        peer.to_string(),
        engine,
        stopped(running),
    )
    .await
    {
        Ok(()) => info!("client {peer} closed normally"),
        Err(e) => warn!("client {peer} closed with error: {e:#}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_run_with_listener_returns_after_stop() {
        // Arrange
        let server = Arc::new(IndiServer::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let runner = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run_with_listener(listener).await }
        });

        // Act
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.stop();

        // Assert
        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("accept loop must notice the stop flag")
            .unwrap();
        assert!(result.is_ok());
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_accepted_connection_is_registered_as_client() {
        // Arrange
        let server = Arc::new(IndiServer::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let runner = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run_with_listener(listener).await }
        });

        // Act
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket
            .write_all(br#"<getProperties version="1.7"/>"#)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Assert
        let parties = server.engine().snapshot();
        assert_eq!(parties.len(), 1);
        assert_eq!(parties[0].kind(), PartyKind::Client);
        assert!(parties[0].subscriptions().listens_to_all());

        // Closing the socket unregisters the client.
        drop(socket);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(server.engine().is_empty());

        server.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_reports_bind_failure() {
        // Arrange: occupy a port first
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = ServerConfig::default();
        config.network.bind_address = "127.0.0.1".to_string();
        config.network.port = taken.local_addr().unwrap().port();
        let server = IndiServer::new(config);

        // Act
        let result = server.run().await;

        // Assert
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_stop_closes_open_sessions() {
        let server = Arc::new(IndiServer::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let runner = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run_with_listener(listener).await }
        });
        let mut socket = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.stop();
        runner.await.unwrap().unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
            .await
            .expect("session must close after stop")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
