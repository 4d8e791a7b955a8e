//! Observer trait for changes to the client's device registry.

use chrono::{DateTime, Utc};
use indi_core::{Device, Element, Property};

/// Receives synchronous callbacks from the [`ClientEngine`].
///
/// Callbacks run on the connection's read loop while the engine is locked,
/// so implementations must return quickly and must not call back into the
/// engine.  Every method has a no-op default.
///
/// [`ClientEngine`]: crate::application::sync_engine::ClientEngine
pub trait ClientListener: Send + Sync {
    fn new_device(&self, _device: &Device) {}

    fn device_removed(&self, _device: &str) {}

    /// Called once the property and all its elements are built.
    fn new_property(&self, _device: &str, _property: &Property) {}

    fn property_removed(&self, _device: &str, _property: &str) {}

    /// Called exactly once per processed update, even a failed one.
    fn property_changed(&self, _device: &str, _property: &Property) {}

    fn element_changed(&self, _device: &str, _property: &str, _element: &Element) {}

    fn device_message(&self, _device: &str, _message: &str) {}

    /// A message not addressed to any device.
    fn server_message(&self, _timestamp: DateTime<Utc>, _message: &str) {}

    fn connection_lost(&self) {}
}
