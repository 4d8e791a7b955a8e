//! Protocol module containing message types, the XML codec and timestamps.

pub mod codec;
pub mod messages;
pub mod timestamp;

pub use codec::{decode_message, encode_message, MessageFramer, ProtocolError};
pub use messages::*;
pub use timestamp::{format_timestamp, now_timestamp, parse_timestamp};
