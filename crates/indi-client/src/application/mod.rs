//! Application layer use cases for the client.
//!
//! - **`sync_engine`** – Keeps the local device registry in step with the
//!   server and turns staged values into outgoing messages.  Outgoing
//!   messages go through the [`sync_engine::Outbox`] trait so the engine can
//!   be driven in tests without a socket.
//!
//! - **`listener`** – The observer trait notified of registry changes.
//!
//! - **`discovery`** – Blocking helpers that wait for a device or property
//!   to be defined.

pub mod discovery;
pub mod listener;
pub mod sync_engine;
