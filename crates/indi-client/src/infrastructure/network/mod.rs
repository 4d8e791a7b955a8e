//! Network infrastructure for the client application.
//!
//! Connects to an INDI server over TCP and wires the socket to a
//! [`ClientEngine`].
//!
//! Architecture:
//! - The read half is driven by one task: bytes go through a
//!   [`MessageFramer`] and each complete message is applied to the engine
//!   before the next one is read, so updates are observed in receipt order.
//! - The engine's [`Outbox`] is a bounded channel drained by a writer task
//!   that owns the write half.  A full channel refuses the message rather
//!   than queueing without limit.
//! - When the server closes the connection (or reading fails) the engine is
//!   told the connection was lost, which clears the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use indi_core::protocol::messages::DEFAULT_PORT;
use indi_core::{encode_message, IndiMessage, MessageFramer};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::application::sync_engine::{ClientEngine, ClientError, Outbox};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Outgoing messages queued before [`ClientError::QueueFull`] is reported.
pub const OUTBOX_CAPACITY: usize = 128;

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientNetworkError {
    /// TCP connection to the server failed.
    #[error("failed to connect to server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection was closed by the remote side.
    #[error("connection closed by server")]
    Closed,
}

/// Where to connect.
#[derive(Debug, Clone)]
pub struct ClientConnectionConfig {
    pub host: String,
    pub port: u16,
}

impl ClientConnectionConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// [`Outbox`] backed by the writer task's channel.
pub struct ChannelOutbox {
    tx: mpsc::Sender<IndiMessage>,
}

impl ChannelOutbox {
    pub fn new(tx: mpsc::Sender<IndiMessage>) -> Self {
        Self { tx }
    }
}

impl Outbox for ChannelOutbox {
    fn send(&self, message: IndiMessage) -> Result<(), ClientError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ClientError::QueueFull,
            TrySendError::Closed(_) => ClientError::Disconnected,
        })
    }
}

/// A live connection to an INDI server.
pub struct ServerConnection {
    config: ClientConnectionConfig,
    engine: Arc<RwLock<ClientEngine>>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ServerConnection {
    /// Connects and starts the read and write tasks.
    ///
    /// No request is sent yet; call
    /// [`ClientEngine::ask_for_devices`] on [`Self::engine`] to start
    /// receiving definitions.
    ///
    /// # Errors
    ///
    /// Returns [`ClientNetworkError::ConnectFailed`] if the TCP connect fails.
    pub async fn connect(config: ClientConnectionConfig) -> Result<Self, ClientNetworkError> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|source| ClientNetworkError::ConnectFailed {
                addr: config.address(),
                source,
            })?;
        info!("connected to server at {}", config.address());

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let engine = Arc::new(RwLock::new(ClientEngine::new(Arc::new(ChannelOutbox::new(tx)))));
        let connected = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(write_loop(write_half, rx));
        let reader = tokio::spawn({
            let engine = Arc::clone(&engine);
            let connected = Arc::clone(&connected);
            async move {
                if let Err(e) = read_loop(read_half, &engine).await {
                    warn!("connection to server ended: {e}");
                }
                connected.store(false, Ordering::Relaxed);
                engine
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .connection_lost();
            }
        });

        Ok(Self {
            config,
            engine,
            connected,
            reader,
            writer,
        })
    }

    pub fn config(&self) -> &ClientConnectionConfig {
        &self.config
    }

    /// The engine holding this connection's device registry.
    pub fn engine(&self) -> Arc<RwLock<ClientEngine>> {
        Arc::clone(&self.engine)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Stops both tasks and clears the registry.
    pub fn disconnect(self) {
        self.reader.abort();
        self.writer.abort();
        if self.connected.swap(false, Ordering::Relaxed) {
            self.engine
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .connection_lost();
        }
        info!("disconnected from {}", self.config.address());
    }
}

/// Frames inbound bytes and applies each message to the engine in order.
async fn read_loop(
    mut reader: OwnedReadHalf,
    engine: &RwLock<ClientEngine>,
) -> Result<(), ClientNetworkError> {
    let mut framer = MessageFramer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(ClientNetworkError::Closed);
        }
        for message in framer.push(&buf[..n]) {
            debug!("received {}", message.tag());
            engine
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .process(message);
        }
    }
}

/// Drains the outbox onto the socket until the channel or socket closes.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<IndiMessage>) {
    while let Some(message) = rx.recv().await {
        let xml = match encode_message(&message) {
            Ok(xml) => xml,
            Err(e) => {
                error!("failed to encode {}: {e}", message.tag());
                continue;
            }
        };
        if let Err(e) = writer.write_all(xml.as_bytes()).await {
            error!("failed to send {}: {e}", message.tag());
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
