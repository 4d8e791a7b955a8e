//! Network infrastructure for the server.
//!
//! Every TCP connection, accepted client or dialled driver, is served the
//! same way by [`serve_connection`]:
//!
//! ```text
//!   socket read half ──► MessageFramer ──► RoutingEngine::route
//!   RoutingEngine fan-out ──► ChannelSink ──► mpsc ──► writer task ──► socket write half
//! ```
//!
//! One read loop per connection keeps that sender's messages in order.
//! Deliveries only push onto the recipient's bounded channel, so a slow
//! recipient never stalls the sender's loop.  A recipient whose channel is
//! full is dropped by the routing engine, which closes its sink; the writer
//! then flushes what is queued and the connection ends.

pub mod driver;
pub mod server;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indi_core::{encode_message, IndiMessage, MessageFramer};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc::{self, error::TrySendError},
};
use tracing::{debug, error};

use crate::application::route_messages::{
    DeliveryError, MessageSink, Party, PartyKind, RoutingEngine,
};

pub use server::IndiServer;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Messages queued per connection before it counts as stalled.
pub const OUTBOUND_QUEUE: usize = 256;

/// How long a closing connection may take to flush its queue.
pub const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// How often loops re-check a shared running flag.
pub const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Errors that can occur in the server network layer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// A remote driver could not be reached.
    #[error("failed to connect to driver {identifier}: {source}")]
    DriverConnect {
        identifier: String,
        #[source]
        source: std::io::Error,
    },
    #[error("driver {0} is already loaded")]
    DriverAlreadyLoaded(String),
    #[error("no driver named {0} is loaded")]
    UnknownDriver(String),
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// [`MessageSink`] backed by a connection's bounded writer channel.
///
/// Closing the sink drops the sender, so the writer task ends once it has
/// written everything already queued.
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<IndiMessage>>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<IndiMessage>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl MessageSink for ChannelSink {
    fn deliver(&self, message: &IndiMessage) -> Result<(), DeliveryError> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return Err(DeliveryError::Closed);
        };
        tx.try_send(message.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Serves one connection until the peer closes it, reading fails, or
/// `shutdown` completes.
///
/// The connection is registered with `engine` for its whole lifetime and
/// unregistered on the way out, whichever way the loop ends.  The connection
/// also ends when its writer stops, which happens after a write error or
/// once the engine has dropped the connection.  Queued messages get
/// [`WRITER_DRAIN`] to reach the peer before the writer is aborted.
///
/// # Errors
///
/// Returns [`ServerError::Io`] if reading from the socket fails.  A clean
/// EOF is `Ok(())`.
pub async fn serve_connection(
    stream: TcpStream,
    kind: PartyKind,
    identifier: String,
    engine: Arc<RoutingEngine>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let party = engine.register(kind, &identifier, Arc::new(ChannelSink::new(tx)));
    let mut writer = tokio::spawn(write_loop(write_half, rx, identifier.clone()));

    let result = tokio::select! {
        result = read_loop(read_half, &engine, &party) => result,
        _ = &mut writer => {
            debug!("writer for {identifier} stopped");
            Ok(())
        }
        () = shutdown => Ok(()),
    };

    // Closes the sink; the writer drains the queue and stops.
    engine.unregister(party.id());
    drop(party);
    if !writer.is_finished()
        && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err()
    {
        debug!("writer for {identifier} did not drain in time");
        writer.abort();
    }
    result
}

/// Completes once `running` has been cleared.
pub async fn stopped(running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    engine: &RoutingEngine,
    party: &Party,
) -> Result<(), ServerError> {
    let mut framer = MessageFramer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        for message in framer.push(&buf[..n]) {
            engine.route(party, message);
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<IndiMessage>,
    identifier: String,
) {
    while let Some(message) = rx.recv().await {
        let xml = match encode_message(&message) {
            Ok(xml) => xml,
            Err(e) => {
                error!("failed to encode {} for {identifier}: {e}", message.tag());
                continue;
            }
        };
        if let Err(e) = writer.write_all(xml.as_bytes()).await {
            debug!("write to {identifier} failed: {e}");
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
