//! ClientEngine: keeps a local mirror of every device the server announces.
//!
//! Inbound messages are applied with [`ClientEngine::process`] in the order
//! they arrive.  Local intents are staged on elements and turned into
//! `new*Vector` messages by [`ClientEngine::send_changes`], which hands them
//! to the injected [`Outbox`].
//!
//! # Registry shape
//!
//! Device name → property name → element name, each level keeping
//! insertion order and unique names.  A definition for a property that
//! already exists is ignored: definitions are never replaced in place.

use std::sync::Arc;

use indi_core::protocol::messages::{
    DefVector, DelProperty, DeviceMessage, EnableBlob, GetProperties, SetVector,
};
use indi_core::protocol::timestamp::parse_timestamp;
use indi_core::{
    BlobPolicy, DesiredValue, Device, Element, IndiMessage, Property, ValidationError,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::listener::ClientListener;

/// Errors returned by client-side operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown property {device}.{property}")]
    UnknownProperty { device: String, property: String },

    #[error("invalid value: {0}")]
    Validation(#[from] ValidationError),

    /// The connection's outbound channel is gone.
    #[error("not connected to a server")]
    Disconnected,

    /// The connection's outbound channel is full; the message was dropped.
    #[error("outgoing queue is full")]
    QueueFull,
}

/// Where outgoing messages go.
///
/// The network layer implements this with a channel to its writer task;
/// tests implement it by recording.
#[cfg_attr(test, mockall::automock)]
pub trait Outbox: Send + Sync {
    /// Queues `message` for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] if the connection is gone, or
    /// [`ClientError::QueueFull`] if the message cannot be queued yet.
    fn send(&self, message: IndiMessage) -> Result<(), ClientError>;
}

fn notify(listeners: &[Arc<dyn ClientListener>], call: impl Fn(&dyn ClientListener)) {
    for listener in listeners {
        call(listener.as_ref());
    }
}

/// The client synchronization engine.
pub struct ClientEngine {
    devices: Vec<Device>,
    listeners: Vec<Arc<dyn ClientListener>>,
    outbox: Arc<dyn Outbox>,
}

impl ClientEngine {
    /// Creates an empty registry that sends through `outbox`.
    pub fn new(outbox: Arc<dyn Outbox>) -> Self {
        Self {
            devices: Vec::new(),
            listeners: Vec::new(),
            outbox,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ClientListener>) {
        self.listeners.push(listener);
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device_names(&self) -> Vec<&str> {
        self.devices.iter().map(Device::name).collect()
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name() == name)
    }

    pub fn property(&self, device: &str, property: &str) -> Option<&Property> {
        self.device(device)?.property(property)
    }

    pub fn element(&self, device: &str, property: &str, element: &str) -> Option<&Element> {
        self.device(device)?.element(property, element)
    }

    fn property_mut(&mut self, device: &str, property: &str) -> Result<&mut Property, ClientError> {
        let device_entry = self
            .devices
            .iter_mut()
            .find(|d| d.name() == device)
            .ok_or_else(|| ClientError::UnknownDevice(device.to_string()))?;
        device_entry
            .property_mut(property)
            .ok_or_else(|| ClientError::UnknownProperty {
                device: device.to_string(),
                property: property.to_string(),
            })
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Applies one inbound message to the registry.
    pub fn process(&mut self, message: IndiMessage) {
        match message {
            IndiMessage::DefVector(def) => self.process_def(&def),
            IndiMessage::SetVector(set) => self.process_set(&set),
            IndiMessage::DelProperty(del) => self.process_del(&del),
            IndiMessage::Message(msg) => self.process_message(&msg),
            other => debug!("ignoring {} from server", other.tag()),
        }
    }

    /// Creates the device if needed, then the property unless it exists.
    pub fn process_def(&mut self, def: &DefVector) {
        let device_name = def.device.trim();
        if device_name.is_empty() {
            debug!("ignoring {} without a device", def.name);
            return;
        }

        let index = match self.devices.iter().position(|d| d.name() == device_name) {
            Some(index) => index,
            None => {
                self.devices.push(Device::new(device_name));
                let device = &self.devices[self.devices.len() - 1];
                notify(&self.listeners, |l| l.new_device(device));
                self.devices.len() - 1
            }
        };

        if let Some(text) = def.message.as_deref() {
            self.apply_device_message(index, def.timestamp.as_deref(), text);
        }

        let device = &mut self.devices[index];
        if device.property(def.name.trim()).is_some() {
            debug!(device = device_name, property = %def.name, "ignoring redefinition");
            return;
        }

        match Property::from_def(def) {
            Ok(property) => {
                let name = property.name().to_string();
                device.add_property(property);
                if let Some(property) = device.property(&name) {
                    notify(&self.listeners, |l| l.new_property(device_name, property));
                }
            }
            Err(e) => warn!(device = device_name, property = %def.name, "rejecting definition: {e}"),
        }
    }

    /// Applies an update to a property of the same kind.
    ///
    /// Unknown devices and properties, and updates whose kind differs from
    /// the property's, are ignored.  Otherwise listeners hear about each
    /// updated element and then the property exactly once.
    pub fn process_set(&mut self, set: &SetVector) {
        let Some(index) = self.devices.iter().position(|d| d.name() == set.device.trim()) else {
            debug!(device = %set.device, "ignoring update for unknown device");
            return;
        };

        if let Some(text) = set.message.as_deref() {
            self.apply_device_message(index, set.timestamp.as_deref(), text);
        }

        let device = &mut self.devices[index];
        let device_name = device.name().to_string();
        let Some(property) = device.property_mut(set.name.trim()) else {
            debug!(device = %device_name, property = %set.name, "ignoring update for unknown property");
            return;
        };
        if property.kind() != set.kind {
            debug!(
                device = %device_name,
                property = %set.name,
                "ignoring {} update for {} property",
                set.kind,
                property.kind()
            );
            return;
        }

        let outcome = property.apply_set(set);
        for error in &outcome.errors {
            warn!(device = %device_name, property = %set.name, "bad value in update: {error}");
        }

        let property: &Property = property;
        for name in &outcome.updated {
            if let Some(element) = property.element(name) {
                notify(&self.listeners, |l| {
                    l.element_changed(&device_name, property.name(), element)
                });
            }
        }
        notify(&self.listeners, |l| l.property_changed(&device_name, property));
    }

    /// Removes one property or a whole device.
    ///
    /// A delete for a device that is not (or no longer) known is ignored, so
    /// a repeated removal leaves the other devices alone.
    pub fn process_del(&mut self, del: &DelProperty) {
        let Some(name) = del.device.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
            debug!("delProperty without a device ignored");
            return;
        };
        let Some(index) = self.devices.iter().position(|d| d.name() == name) else {
            debug!(device = name, "delProperty for an unknown device ignored");
            return;
        };

        if let Some(text) = del.message.as_deref() {
            self.apply_device_message(index, del.timestamp.as_deref(), text);
        }

        match del.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(property) => {
                let device = &mut self.devices[index];
                if device.remove_property(property).is_some() {
                    let device_name = device.name().to_string();
                    notify(&self.listeners, |l| l.property_removed(&device_name, property));
                } else {
                    debug!(device = device.name(), property, "nothing to delete");
                }
            }
            None => {
                let device = self.devices.remove(index);
                notify(&self.listeners, |l| l.device_removed(device.name()));
            }
        }
    }

    /// Records a device message, or reports a server-wide one.
    pub fn process_message(&mut self, msg: &DeviceMessage) {
        let text = msg.message.as_deref().unwrap_or_default();
        match msg.device.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(device) => match self.devices.iter().position(|d| d.name() == device) {
                Some(index) => self.apply_device_message(index, msg.timestamp.as_deref(), text),
                None => debug!(device, "ignoring message for unknown device"),
            },
            None => {
                let timestamp = parse_timestamp(msg.timestamp.as_deref());
                notify(&self.listeners, |l| l.server_message(timestamp, text));
            }
        }
    }

    fn apply_device_message(&mut self, index: usize, timestamp: Option<&str>, text: &str) {
        let device = &mut self.devices[index];
        device.set_message(text, parse_timestamp(timestamp));
        let device: &Device = device;
        notify(&self.listeners, |l| l.device_message(device.name(), text));
    }

    fn remove_all_devices(&mut self) {
        for device in std::mem::take(&mut self.devices) {
            notify(&self.listeners, |l| l.device_removed(device.name()));
        }
    }

    /// Drops the whole registry after the connection went away.
    pub fn connection_lost(&mut self) {
        self.remove_all_devices();
        notify(&self.listeners, |l| l.connection_lost());
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Stages a desired value on an element.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the property is unknown or the element
    /// rejects the value.
    pub fn stage(
        &mut self,
        device: &str,
        property: &str,
        element: &str,
        value: DesiredValue,
    ) -> Result<(), ClientError> {
        self.property_mut(device, property)?.stage(element, value)?;
        Ok(())
    }

    /// Stages a value given as text (`"600"`, `"On"`, `"12:30:00"`).
    pub fn stage_text(
        &mut self,
        device: &str,
        property: &str,
        element: &str,
        text: &str,
    ) -> Result<(), ClientError> {
        self.property_mut(device, property)?.stage_text(element, text)?;
        Ok(())
    }

    /// Sends every staged value of a property as one `new*Vector`.
    ///
    /// Returns `false` if nothing was staged.  On success the property is
    /// `Busy` and listeners are told it changed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] for an unknown or read-only property, or if
    /// the outbox is closed.
    pub fn send_changes(&mut self, device: &str, property: &str) -> Result<bool, ClientError> {
        let entry = self.property_mut(device, property)?;
        let Some(new_vector) = entry.render_new_vector(device)? else {
            return Ok(false);
        };
        self.outbox.send(IndiMessage::NewVector(new_vector))?;

        if let Some(entry) = self.property(device, property) {
            notify(&self.listeners, |l| l.property_changed(device, entry));
        }
        Ok(true)
    }

    /// Asks the server for definitions, optionally scoped.
    pub fn ask_for_devices(
        &self,
        device: Option<&str>,
        property: Option<&str>,
    ) -> Result<(), ClientError> {
        self.outbox
            .send(IndiMessage::GetProperties(GetProperties::new(device, property)))
    }

    /// Sets the BLOB policy for this connection.
    pub fn enable_blobs(
        &self,
        device: &str,
        property: Option<&str>,
        policy: BlobPolicy,
    ) -> Result<(), ClientError> {
        self.outbox.send(IndiMessage::EnableBlob(EnableBlob {
            device: device.to_string(),
            name: property.map(str::to_string),
            policy: policy.as_wire().to_string(),
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use indi_core::protocol::messages::{DefElement, OneElement};
    use indi_core::{PropertyKind, PropertyState, SwitchStatus};
    use std::sync::Mutex;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingOutbox {
        sent: Mutex<Vec<IndiMessage>>,
    }

    impl Outbox for RecordingOutbox {
        fn send(&self, message: IndiMessage) -> Result<(), ClientError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ClientListener for RecordingListener {
        fn new_device(&self, device: &Device) {
            self.record(format!("new_device {}", device.name()));
        }
        fn device_removed(&self, device: &str) {
            self.record(format!("device_removed {device}"));
        }
        fn new_property(&self, device: &str, property: &Property) {
            self.record(format!(
                "new_property {device}.{} ({} elements)",
                property.name(),
                property.elements().len()
            ));
        }
        fn property_removed(&self, device: &str, property: &str) {
            self.record(format!("property_removed {device}.{property}"));
        }
        fn property_changed(&self, device: &str, property: &Property) {
            self.record(format!("property_changed {device}.{} {:?}", property.name(), property.state()));
        }
        fn element_changed(&self, device: &str, property: &str, element: &Element) {
            self.record(format!("element_changed {device}.{property}.{}", element.name()));
        }
        fn device_message(&self, device: &str, message: &str) {
            self.record(format!("device_message {device}: {message}"));
        }
        fn server_message(&self, _timestamp: DateTime<Utc>, message: &str) {
            self.record(format!("server_message {message}"));
        }
        fn connection_lost(&self) {
            self.record("connection_lost".to_string());
        }
    }

    fn make_engine() -> (ClientEngine, Arc<RecordingOutbox>, Arc<RecordingListener>) {
        let outbox = Arc::new(RecordingOutbox::default());
        let listener = Arc::new(RecordingListener::default());
        let mut engine = ClientEngine::new(outbox.clone());
        engine.add_listener(listener.clone());
        (engine, outbox, listener)
    }

    fn number_def(device: &str, name: &str) -> DefVector {
        let mut def = DefVector::new(PropertyKind::Number, device, name, "Idle");
        def.perm = Some("rw".to_string());
        let mut element = DefElement::new("POS", "500");
        element.format = Some("%.0f".to_string());
        element.min = Some("0".to_string());
        element.max = Some("1000".to_string());
        def.elements.push(element);
        def
    }

    fn switch_def(device: &str, name: &str) -> DefVector {
        let mut def = DefVector::new(PropertyKind::Switch, device, name, "Idle");
        def.perm = Some("rw".to_string());
        def.rule = Some("OneOfMany".to_string());
        def.elements.push(DefElement::new("CONNECT", "Off"));
        def.elements.push(DefElement::new("DISCONNECT", "On"));
        def
    }

    // ── Definitions ───────────────────────────────────────────────────────────

    #[test]
    fn test_def_creates_device_then_fully_built_property() {
        // Arrange
        let (mut engine, _, listener) = make_engine();

        // Act
        engine.process(IndiMessage::DefVector(number_def("Focuser", "ABS_POS")));

        // Assert
        assert_eq!(engine.device_names(), vec!["Focuser"]);
        assert_eq!(
            listener.events(),
            vec!["new_device Focuser", "new_property Focuser.ABS_POS (1 elements)"]
        );
    }

    #[test]
    fn test_redefinition_is_ignored() {
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));

        let mut again = number_def("Focuser", "ABS_POS");
        again.elements[0].value = "999".to_string();
        engine.process_def(&again);

        assert_eq!(engine.element("Focuser", "ABS_POS", "POS").unwrap().value_string(), "500");
        assert_eq!(listener.events().len(), 2);
    }

    #[test]
    fn test_def_without_device_is_ignored() {
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("  ", "ABS_POS"));
        assert!(engine.devices().is_empty());
        assert!(listener.events().is_empty());
    }

    #[test]
    fn test_invalid_def_leaves_no_property() {
        let (mut engine, _, listener) = make_engine();
        let mut def = switch_def("CCD", "CONNECTION");
        def.rule = None;

        engine.process_def(&def);

        assert!(engine.property("CCD", "CONNECTION").is_none());
        assert_eq!(listener.events(), vec!["new_device CCD"]);
    }

    #[test]
    fn test_def_message_is_applied_to_device_first() {
        let (mut engine, _, listener) = make_engine();
        let mut def = number_def("Focuser", "ABS_POS");
        def.message = Some("focuser online".to_string());

        engine.process_def(&def);

        assert_eq!(engine.device("Focuser").unwrap().last_message(), "focuser online");
        assert_eq!(listener.events()[1], "device_message Focuser: focuser online");
    }

    // ── Updates ───────────────────────────────────────────────────────────────

    #[test]
    fn test_set_notifies_each_element_then_property_once() {
        // Arrange
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        let mut set = SetVector::new(PropertyKind::Number, "Focuser", "ABS_POS");
        set.state = Some("Ok".to_string());
        set.elements.push(OneElement::new("POS", "600"));

        // Act
        engine.process_set(&set);

        // Assert
        let events = listener.events();
        assert_eq!(
            &events[2..],
            ["element_changed Focuser.ABS_POS.POS", "property_changed Focuser.ABS_POS Ok"]
        );
    }

    #[test]
    fn test_set_with_bad_value_still_notifies_once_with_alert() {
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        let mut set = SetVector::new(PropertyKind::Number, "Focuser", "ABS_POS");
        set.elements.push(OneElement::new("POS", "lots"));

        engine.process_set(&set);

        assert_eq!(&listener.events()[2..], ["property_changed Focuser.ABS_POS Alert"]);
    }

    #[test]
    fn test_set_of_wrong_kind_is_ignored() {
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        let mut set = SetVector::new(PropertyKind::Text, "Focuser", "ABS_POS");
        set.elements.push(OneElement::new("POS", "600"));

        engine.process_set(&set);

        assert_eq!(engine.element("Focuser", "ABS_POS", "POS").unwrap().value_string(), "500");
        assert_eq!(listener.events().len(), 2);
    }

    #[test]
    fn test_set_for_unknown_device_is_ignored() {
        let (mut engine, _, listener) = make_engine();
        engine.process_set(&SetVector::new(PropertyKind::Number, "Ghost", "ABS_POS"));
        assert!(listener.events().is_empty());
    }

    // ── Deletion ──────────────────────────────────────────────────────────────

    #[test]
    fn test_del_with_name_removes_only_that_property() {
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        engine.process_def(&number_def("Focuser", "REL_POS"));

        engine.process_del(&DelProperty::new("Focuser", Some("ABS_POS")));

        assert_eq!(engine.device("Focuser").unwrap().property_names(), vec!["REL_POS"]);
        assert_eq!(listener.events().last().unwrap(), "property_removed Focuser.ABS_POS");
    }

    #[test]
    fn test_del_without_name_removes_device() {
        let (mut engine, _, _) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        engine.process_def(&number_def("CCD", "ABS_POS"));

        engine.process_del(&DelProperty::new("Focuser", None));

        assert_eq!(engine.device_names(), vec!["CCD"]);
    }

    #[test]
    fn test_del_for_unknown_device_changes_nothing() {
        // Arrange
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        engine.process_def(&number_def("CCD", "ABS_POS"));
        let before = listener.events().len();

        // Act
        engine.process_del(&DelProperty::new("Ghost", None));

        // Assert
        assert_eq!(engine.device_names(), vec!["Focuser", "CCD"]);
        assert_eq!(listener.events().len(), before);
    }

    #[test]
    fn test_repeated_device_del_keeps_other_devices() {
        // Arrange
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        engine.process_def(&number_def("CCD", "ABS_POS"));

        // Act
        engine.process_del(&DelProperty::new("CCD", None));
        engine.process_del(&DelProperty::new("CCD", None));

        // Assert
        assert_eq!(engine.device_names(), vec!["Focuser"]);
        let removals: Vec<String> = listener
            .events()
            .into_iter()
            .filter(|e| e.starts_with("device_removed"))
            .collect();
        assert_eq!(removals, vec!["device_removed CCD"]);
    }

    #[test]
    fn test_del_without_device_attribute_changes_nothing() {
        let (mut engine, _, _) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));

        engine.process_del(&DelProperty::default());

        assert_eq!(engine.device_names(), vec!["Focuser"]);
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    #[test]
    fn test_message_without_device_is_a_server_message() {
        let (mut engine, _, listener) = make_engine();
        engine.process_message(&DeviceMessage {
            device: None,
            timestamp: None,
            message: Some("server restarting".to_string()),
        });
        assert_eq!(listener.events(), vec!["server_message server restarting"]);
    }

    #[test]
    fn test_message_for_known_device_updates_it() {
        let (mut engine, _, _) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));

        engine.process_message(&DeviceMessage {
            device: Some("Focuser".to_string()),
            timestamp: Some("2024-01-02T03:04:05".to_string()),
            message: Some("moving".to_string()),
        });

        let device = engine.device("Focuser").unwrap();
        assert_eq!(device.last_message(), "moving");
        assert_eq!(device.message_timestamp().to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    #[test]
    fn test_send_changes_emits_new_vector_and_marks_busy() {
        // Arrange
        let (mut engine, outbox, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        engine.stage("Focuser", "ABS_POS", "POS", DesiredValue::Number(600.0)).unwrap();

        // Act
        let sent = engine.send_changes("Focuser", "ABS_POS").unwrap();

        // Assert
        assert!(sent);
        let messages = outbox.sent.lock().unwrap();
        let IndiMessage::NewVector(new_vector) = &messages[0] else {
            panic!("expected a new vector");
        };
        assert_eq!(new_vector.elements, vec![OneElement::new("POS", "600.0")]);
        assert_eq!(listener.events().last().unwrap(), "property_changed Focuser.ABS_POS Busy");
        assert_eq!(
            engine.property("Focuser", "ABS_POS").unwrap().state(),
            PropertyState::Busy
        );
    }

    #[test]
    fn test_send_changes_with_nothing_staged_sends_nothing() {
        let (mut engine, outbox, _) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));

        assert!(!engine.send_changes("Focuser", "ABS_POS").unwrap());
        assert!(outbox.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_switch_send_includes_unstaged_elements() {
        let (mut engine, outbox, _) = make_engine();
        engine.process_def(&switch_def("CCD", "CONNECTION"));
        engine
            .stage("CCD", "CONNECTION", "CONNECT", DesiredValue::Switch(SwitchStatus::On))
            .unwrap();

        engine.send_changes("CCD", "CONNECTION").unwrap();

        let messages = outbox.sent.lock().unwrap();
        let IndiMessage::NewVector(new_vector) = &messages[0] else {
            panic!("expected a new vector");
        };
        assert_eq!(
            new_vector.elements,
            vec![OneElement::new("CONNECT", "On"), OneElement::new("DISCONNECT", "On")]
        );
    }

    #[test]
    fn test_stage_on_unknown_property_fails() {
        let (mut engine, _, _) = make_engine();
        let result = engine.stage_text("Focuser", "ABS_POS", "POS", "1");
        assert!(matches!(result, Err(ClientError::UnknownDevice(_))));
    }

    #[test]
    fn test_stage_out_of_range_is_a_validation_error() {
        let (mut engine, _, _) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        let result = engine.stage_text("Focuser", "ABS_POS", "POS", "5000");
        assert!(matches!(result, Err(ClientError::Validation(ValidationError::OutOfRange { .. }))));
    }

    #[test]
    fn test_closed_outbox_reports_disconnected() {
        // Arrange
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send()
            .withf(|message| matches!(message, IndiMessage::GetProperties(_)))
            .times(1)
            .returning(|_| Err(ClientError::Disconnected));
        let engine = ClientEngine::new(Arc::new(outbox));

        // Act
        let result = engine.ask_for_devices(None, None);

        // Assert
        assert!(matches!(result, Err(ClientError::Disconnected)));
    }

    #[test]
    fn test_failed_send_keeps_nothing_staged_for_a_retry() {
        // Arrange
        let mut outbox = MockOutbox::new();
        outbox
            .expect_send()
            .times(1)
            .returning(|_| Err(ClientError::Disconnected));
        let mut engine = ClientEngine::new(Arc::new(outbox));
        engine.process_def(&number_def("Focuser", "ABS_POS"));
        engine
            .stage("Focuser", "ABS_POS", "POS", DesiredValue::Number(600.0))
            .unwrap();

        // Act
        let result = engine.send_changes("Focuser", "ABS_POS");

        // Assert: the staged value was rendered (and cleared) before the send failed
        assert!(matches!(result, Err(ClientError::Disconnected)));
        assert!(!engine.property("Focuser", "ABS_POS").unwrap().has_changes());
    }

    #[test]
    fn test_enable_blobs_sends_policy_text() {
        let (engine, outbox, _) = make_engine();
        engine.enable_blobs("CCD", Some("CCD1"), BlobPolicy::Only).unwrap();
        assert_eq!(
            outbox.sent.lock().unwrap()[0],
            IndiMessage::EnableBlob(EnableBlob {
                device: "CCD".to_string(),
                name: Some("CCD1".to_string()),
                policy: "Only".to_string(),
            })
        );
    }

    #[test]
    fn test_connection_lost_clears_registry_and_notifies() {
        let (mut engine, _, listener) = make_engine();
        engine.process_def(&number_def("Focuser", "ABS_POS"));

        engine.connection_lost();

        assert!(engine.devices().is_empty());
        assert_eq!(&listener.events()[2..], ["device_removed Focuser", "connection_lost"]);
    }
}
