//! A device as seen by a client: an ordered set of properties plus the
//! last message the device sent.

use chrono::{DateTime, Utc};

use crate::domain::element::Element;
use crate::domain::property::Property;
use crate::domain::values::PropertyKind;

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    name: String,
    properties: Vec<Property>,
    last_message: String,
    message_timestamp: DateTime<Utc>,
    blob_count: usize,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Vec::new(),
            last_message: String::new(),
            message_timestamp: Utc::now(),
            blob_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    pub fn message_timestamp(&self) -> DateTime<Utc> {
        self.message_timestamp
    }

    pub fn set_message(&mut self, message: &str, timestamp: DateTime<Utc>) {
        self.last_message = message.to_string();
        self.message_timestamp = timestamp;
    }

    /// Number of BLOB properties currently defined.
    pub fn blob_count(&self) -> usize {
        self.blob_count
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name() == name)
    }

    pub fn element(&self, property: &str, element: &str) -> Option<&Element> {
        self.property(property)?.element(element)
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(Property::name).collect()
    }

    /// Distinct group names in order of first appearance.
    pub fn group_names(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for property in &self.properties {
            if !groups.contains(&property.group()) {
                groups.push(property.group());
            }
        }
        groups
    }

    pub fn properties_of_group(&self, group: &str) -> Vec<&Property> {
        self.properties.iter().filter(|p| p.group() == group).collect()
    }

    /// Adds `property` unless one with the same name exists.
    ///
    /// Returns `false` (and drops `property`) on a duplicate.
    pub fn add_property(&mut self, property: Property) -> bool {
        if self.property(property.name()).is_some() {
            return false;
        }
        if property.kind() == PropertyKind::Blob {
            self.blob_count += 1;
        }
        self.properties.push(property);
        true
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Property> {
        let index = self.properties.iter().position(|p| p.name() == name)?;
        let property = self.properties.remove(index);
        if property.kind() == PropertyKind::Blob {
            self.blob_count -= 1;
        }
        Some(property)
    }
}
