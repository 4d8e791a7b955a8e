//! # indi-core
//!
//! Shared library for the INDI device-control protocol containing the
//! property model, number formatting, and the XML wire codec.
//!
//! This crate is used by both the client and server applications.
//! It has no dependencies on network sockets or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! INDI lets remote programs control instruments (telescope mounts, cameras,
//! focusers).  Each **device** publishes named **properties**; each property
//! is a vector of typed **elements** (text, number, switch, light, BLOB).
//! Devices announce properties with `def*Vector`, update them with
//! `set*Vector`, and clients ask for changes with `new*Vector`.
//!
//! - **`protocol`** – How messages travel over the network: a stream of XML
//!   elements, decoded into typed Rust structs and encoded back.
//!
//! - **`domain`** – The client-side mirror of devices.  A client stages a
//!   desired value on an element, the property renders it as a
//!   `new*Vector`, and the device's later `set*Vector` brings the mirror
//!   back in line.

pub mod domain;
pub mod error;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `indi_core::Property` instead of `indi_core::domain::property::Property`.
pub use domain::{
    BlobPolicy, BlobValue, DesiredValue, Device, Element, NumberFormat, Permission, Property,
    PropertyKind, PropertyState, SwitchRule, SwitchStatus, UpdateOutcome,
};
pub use error::{FormatError, StructuralError, ValidationError};
pub use protocol::codec::{decode_message, encode_message, MessageFramer, ProtocolError};
pub use protocol::messages::IndiMessage;
