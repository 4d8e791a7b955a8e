//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the server's TOML configuration, falling
//! back to defaults when no file exists, and writes it back on request.

pub mod config;
