//! Application layer of the server: the routing rules.
//!
//! Nothing here touches a socket.  Connections are represented by the
//! [`route_messages::MessageSink`] seam, so every rule can be exercised with
//! recording sinks in plain unit tests.
//!
//! # Sub-modules
//!
//! - **`subscriptions`**  – What one connection has asked to receive, and
//!   its BLOB delivery rules.
//!
//! - **`route_messages`** – The connection table and the per-message fan-out
//!   rules.

pub mod route_messages;
pub mod subscriptions;
