//! Per-connection subscription state: what a party listens to and which
//! BLOB policy applies to it.

use std::collections::{HashMap, HashSet};

use indi_core::BlobPolicy;

/// What one connection has asked to receive.
///
/// Built up from the `getProperties` and `enableBLOB` messages the
/// connection sends.  Nothing is listened to until it asks.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    listen_all: bool,
    devices: HashSet<String>,
    properties: HashSet<(String, String)>,
    device_blob_rules: HashMap<String, BlobPolicy>,
    property_blob_rules: HashMap<(String, String), BlobPolicy>,
}

impl SubscriptionState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Recording interest ────────────────────────────────────────────────────

    pub fn listen_to_all(&mut self) {
        self.listen_all = true;
    }

    pub fn listen_to_device(&mut self, device: &str) {
        self.devices.insert(device.to_string());
    }

    pub fn listen_to_property(&mut self, device: &str, property: &str) {
        self.properties
            .insert((device.to_string(), property.to_string()));
    }

    /// Records a BLOB rule for a whole device (`property == None`) or one
    /// property, replacing any earlier rule for the same scope.
    pub fn set_blob_rule(&mut self, device: &str, property: Option<&str>, policy: BlobPolicy) {
        match property {
            Some(property) => {
                self.property_blob_rules
                    .insert((device.to_string(), property.to_string()), policy);
            }
            None => {
                self.device_blob_rules.insert(device.to_string(), policy);
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn listens_to_all(&self) -> bool {
        self.listen_all
    }

    pub fn listens_to_device(&self, device: &str) -> bool {
        self.listen_all || self.devices.contains(device)
    }

    pub fn listens_to_property(&self, device: &str, property: &str) -> bool {
        self.listens_to_device(device)
            || self
                .properties
                .contains(&(device.to_string(), property.to_string()))
    }

    /// `true` if some single property of `device` is listened to.
    pub fn listens_to_single_property(&self, device: &str) -> bool {
        self.properties.iter().any(|(d, _)| d == device)
    }

    /// `true` if the device or any of its properties is listened to.
    pub fn listens_to_any_of(&self, device: &str) -> bool {
        self.listens_to_device(device) || self.listens_to_single_property(device)
    }

    /// Whether a BLOB update for `device.property` should be delivered.
    ///
    /// A property rule wins over a device rule; `Never` suppresses and any
    /// other policy allows.  With no rule at all, BLOBs are not delivered.
    pub fn blob_accepted(&self, device: &str, property: &str) -> bool {
        let key = (device.to_string(), property.to_string());
        self.property_blob_rules
            .get(&key)
            .or_else(|| self.device_blob_rules.get(device))
            .is_some_and(|policy| *policy != BlobPolicy::Never)
    }

    /// Whether non-BLOB updates for `device` should be delivered.
    ///
    /// Only a device-wide `Only` rule suppresses them.
    pub fn non_blobs_accepted(&self, device: &str) -> bool {
        self.device_blob_rules.get(device) != Some(&BlobPolicy::Only)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
