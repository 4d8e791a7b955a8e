//! Infrastructure layer for the client application.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `indi_core`, but MUST NOT be imported by the `application` layer.
//!
//! - **`network`** – TCP connection to the server: a read loop that frames
//!   inbound XML into messages for the engine, and a writer task that drains
//!   the engine's outbox.

pub mod network;
