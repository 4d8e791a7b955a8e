//! INDI protocol message definitions.
//!
//! Messages mirror the wire vocabulary attribute-for-attribute.  Values
//! that the model parses (states, permissions, numbers, switch statuses) are
//! kept as the raw attribute text so that a relay can forward them exactly
//! as received, and so that a malformed value in one element does not make
//! the whole message undecodable.
//!
//! | Tag                       | Direction        | Type               |
//! |---------------------------|------------------|--------------------|
//! | `getProperties`           | client → device  | [`GetProperties`]  |
//! | `def*Vector`              | device → client  | [`DefVector`]      |
//! | `set*Vector`              | device → client  | [`SetVector`]      |
//! | `new*Vector`              | client → device  | [`NewVector`]      |
//! | `message`                 | device → client  | [`DeviceMessage`]  |
//! | `delProperty`             | device → client  | [`DelProperty`]    |
//! | `enableBLOB`              | client → server  | [`EnableBlob`]     |

use crate::domain::values::PropertyKind;

/// Protocol version sent in `getProperties`.
pub const PROTOCOL_VERSION: &str = "1.7";

/// Default TCP port of an INDI server.
pub const DEFAULT_PORT: u16 = 7624;

/// Top-level INDI message.
#[derive(Debug, Clone, PartialEq)]
pub enum IndiMessage {
    GetProperties(GetProperties),
    DefVector(DefVector),
    SetVector(SetVector),
    NewVector(NewVector),
    Message(DeviceMessage),
    DelProperty(DelProperty),
    EnableBlob(EnableBlob),
}

impl IndiMessage {
    /// The `device` attribute, if the message carries a non-empty one.
    pub fn device(&self) -> Option<&str> {
        let device = match self {
            IndiMessage::GetProperties(m) => m.device.as_deref(),
            IndiMessage::DefVector(m) => Some(m.device.as_str()),
            IndiMessage::SetVector(m) => Some(m.device.as_str()),
            IndiMessage::NewVector(m) => Some(m.device.as_str()),
            IndiMessage::Message(m) => m.device.as_deref(),
            IndiMessage::DelProperty(m) => m.device.as_deref(),
            IndiMessage::EnableBlob(m) => Some(m.device.as_str()),
        };
        device.filter(|d| !d.is_empty())
    }

    /// The wire tag of the message, for logging.
    pub fn tag(&self) -> String {
        match self {
            IndiMessage::GetProperties(_) => "getProperties".to_string(),
            IndiMessage::DefVector(m) => format!("def{}Vector", m.kind),
            IndiMessage::SetVector(m) => format!("set{}Vector", m.kind),
            IndiMessage::NewVector(m) => format!("new{}Vector", m.kind),
            IndiMessage::Message(_) => "message".to_string(),
            IndiMessage::DelProperty(_) => "delProperty".to_string(),
            IndiMessage::EnableBlob(_) => "enableBLOB".to_string(),
        }
    }
}

/// `<getProperties version="1.7" [device=".."] [name=".."]/>`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetProperties {
    pub version: String,
    pub device: Option<String>,
    pub name: Option<String>,
}

impl GetProperties {
    /// A request for the given scope at the current protocol version.
    pub fn new(device: Option<&str>, name: Option<&str>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            device: device.map(str::to_string),
            name: name.map(str::to_string),
        }
    }
}

/// One element inside a `def*Vector` (`defText`, `defNumber`, ...).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefElement {
    pub name: String,
    pub label: Option<String>,
    /// Text content: the initial value (empty for `defBLOB`).
    pub value: String,
    /// `defNumber` only.
    pub format: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
    pub step: Option<String>,
}

impl DefElement {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }
}

/// A property definition (`def*Vector`).
#[derive(Debug, Clone, PartialEq)]
pub struct DefVector {
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    pub label: Option<String>,
    pub group: Option<String>,
    pub state: String,
    /// Absent on `defLightVector`.
    pub perm: Option<String>,
    pub timeout: Option<String>,
    /// `defSwitchVector` only.
    pub rule: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
    pub elements: Vec<DefElement>,
}

impl DefVector {
    /// An empty definition with only the identifying attributes set.
    pub fn new(kind: PropertyKind, device: &str, name: &str, state: &str) -> Self {
        Self {
            kind,
            device: device.to_string(),
            name: name.to_string(),
            label: None,
            group: None,
            state: state.to_string(),
            perm: None,
            timeout: None,
            rule: None,
            timestamp: None,
            message: None,
            elements: Vec::new(),
        }
    }
}

/// One element inside a `set*Vector` or `new*Vector` (`oneText`, ...).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OneElement {
    pub name: String,
    /// Text content: the value (base64 for `oneBLOB`).
    pub value: String,
    /// `oneBLOB` only: decoded payload length.
    pub size: Option<String>,
    /// `oneBLOB` only: payload format such as `.fits`.
    pub format: Option<String>,
}

impl OneElement {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }
}

/// A property update from a device (`set*Vector`).
#[derive(Debug, Clone, PartialEq)]
pub struct SetVector {
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    pub state: Option<String>,
    pub timeout: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
    pub elements: Vec<OneElement>,
}

impl SetVector {
    pub fn new(kind: PropertyKind, device: &str, name: &str) -> Self {
        Self {
            kind,
            device: device.to_string(),
            name: name.to_string(),
            state: None,
            timeout: None,
            timestamp: None,
            message: None,
            elements: Vec::new(),
        }
    }
}

/// A client intent for a device (`new*Vector`).
#[derive(Debug, Clone, PartialEq)]
pub struct NewVector {
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    pub timestamp: Option<String>,
    pub elements: Vec<OneElement>,
}

/// `<message [device=".."] timestamp=".." message=".."/>`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceMessage {
    pub device: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
}

/// `<delProperty device=".." [name=".."]/>`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DelProperty {
    pub device: Option<String>,
    pub name: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
}

impl DelProperty {
    pub fn new(device: &str, name: Option<&str>) -> Self {
        Self {
            device: Some(device.to_string()),
            name: name.map(str::to_string),
            ..Default::default()
        }
    }
}

/// `<enableBLOB device=".." [name=".."]>Never|Also|Only</enableBLOB>`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnableBlob {
    pub device: String,
    pub name: Option<String>,
    /// Raw policy text.
    pub policy: String,
}
