//! Domain layer: the client-side model of devices, properties and elements.
//!
//! Nothing here touches sockets; values arrive as decoded messages from
//! [`crate::protocol`] and leave as rendered `new*Vector` messages.

pub mod device;
pub mod element;
pub mod number_format;
pub mod property;
pub mod values;

pub use device::Device;
pub use element::{BlobValue, DesiredValue, Element};
pub use number_format::NumberFormat;
pub use property::{Property, UpdateOutcome};
pub use values::{BlobPolicy, Permission, PropertyKind, PropertyState, SwitchRule, SwitchStatus};
