//! Infrastructure layer for the server.
//!
//! Contains the OS-facing adapters: TCP sockets (accepted clients and dialled
//! drivers) and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `indi_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
