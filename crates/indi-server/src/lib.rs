//! indi-server library entry point.
//!
//! An INDI server sits between clients (control programs) and devices
//! (drivers).  It keeps no property values of its own: it remembers what
//! each connection subscribed to and relays every message to the
//! connections that want it.
//!
//! # Layers (for beginners)
//!
//! - [`application`] holds the routing rules and is tested without sockets.
//! - [`infrastructure`] wires those rules to tokio TCP connections and reads
//!   the TOML configuration.
//!
//! The binary in `main.rs` and the integration tests in `tests/` both build
//! on this same module tree.

pub mod application;
pub mod infrastructure;
