//! Small value enums shared by the model and the wire codec.
//!
//! Every enum converts to and from its exact wire spelling with
//! `from_wire` / `as_wire`.  Parsing is case-sensitive, as devices in the
//! field are.

use std::fmt;

/// The element type carried by a property (and by its vector tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl PropertyKind {
    /// The tag infix used by `def*Vector`, `set*Vector`, `one*`, and so on.
    pub fn tag_infix(self) -> &'static str {
        match self {
            PropertyKind::Text => "Text",
            PropertyKind::Number => "Number",
            PropertyKind::Switch => "Switch",
            PropertyKind::Light => "Light",
            PropertyKind::Blob => "BLOB",
        }
    }

    /// Resolves a tag infix back to a kind.
    pub fn from_tag_infix(infix: &str) -> Option<Self> {
        match infix {
            "Text" => Some(PropertyKind::Text),
            "Number" => Some(PropertyKind::Number),
            "Switch" => Some(PropertyKind::Switch),
            "Light" => Some(PropertyKind::Light),
            "BLOB" => Some(PropertyKind::Blob),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_infix())
    }
}

/// Property state, also used as the value of a Light element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "Idle" => Some(PropertyState::Idle),
            "Ok" => Some(PropertyState::Ok),
            "Busy" => Some(PropertyState::Busy),
            "Alert" => Some(PropertyState::Alert),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Client access permission of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Permission {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "ro" => Some(Permission::ReadOnly),
            "wo" => Some(Permission::WriteOnly),
            "rw" => Some(Permission::ReadWrite),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Permission::ReadOnly => "ro",
            Permission::WriteOnly => "wo",
            Permission::ReadWrite => "rw",
        }
    }
}

/// Status of a single switch element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwitchStatus {
    On,
    #[default]
    Off,
}

impl SwitchStatus {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "On" => Some(SwitchStatus::On),
            "Off" => Some(SwitchStatus::Off),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            SwitchStatus::On => "On",
            SwitchStatus::Off => "Off",
        }
    }

    pub fn is_on(self) -> bool {
        self == SwitchStatus::On
    }
}

/// How many elements of a switch property may be `On` at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchRule {
    /// Exactly one.
    OneOfMany,
    /// Zero or one.
    AtMostOne,
    /// Any number.
    AnyOfMany,
}

impl SwitchRule {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "OneOfMany" => Some(SwitchRule::OneOfMany),
            "AtMostOne" => Some(SwitchRule::AtMostOne),
            "AnyOfMany" => Some(SwitchRule::AnyOfMany),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }

    /// Returns `true` when `on_count` selected elements satisfy the rule.
    pub fn allows(self, on_count: usize) -> bool {
        match self {
            SwitchRule::OneOfMany => on_count == 1,
            SwitchRule::AtMostOne => on_count <= 1,
            SwitchRule::AnyOfMany => true,
        }
    }
}

/// Whether BLOB updates are delivered alongside other updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobPolicy {
    /// No BLOBs (the protocol default).
    Never,
    /// BLOBs interleaved with everything else.
    Also,
    /// Only BLOBs; other updates are suppressed.
    Only,
}

impl BlobPolicy {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "Never" => Some(BlobPolicy::Never),
            "Also" => Some(BlobPolicy::Also),
            "Only" => Some(BlobPolicy::Only),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            BlobPolicy::Never => "Never",
            BlobPolicy::Also => "Also",
            BlobPolicy::Only => "Only",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
