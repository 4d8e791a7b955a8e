//! indi-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does indi-client do? (for beginners)
//!
//! A *client* is a program (a planetarium, an imaging tool, a script) that
//! wants to see and control instruments attached to an INDI server.
//!
//! The client:
//!
//! 1. Connects to the server over TCP and sends `getProperties`.
//! 2. Receives `def*Vector` messages and builds a local mirror of every
//!    device, property and element ([`application::sync_engine::ClientEngine`]).
//! 3. Applies `set*Vector` updates to the mirror and tells registered
//!    [`application::listener::ClientListener`]s what changed.
//! 4. Sends `new*Vector` messages when the user stages new values and asks
//!    for them to be sent.

/// Application layer: the synchronization engine and its observers.
pub mod application;

/// Infrastructure layer: the TCP connection to the server.
pub mod infrastructure;
