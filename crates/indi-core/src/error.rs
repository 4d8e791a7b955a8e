//! Error taxonomy for the property model.
//!
//! Each error kind maps to one handling policy:
//!
//! - [`FormatError`] – a remote value could not be parsed.  The owning
//!   property is put into `Alert` and processing continues.
//! - [`ValidationError`] – a locally staged value was rejected.  Always
//!   returned to the caller, never partially staged.
//! - [`StructuralError`] – a `def*` message lacked something required to
//!   build a property.  The entity is simply not created.

use thiserror::Error;

/// A wire value could not be parsed for its element variant.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FormatError {
    /// A number could not be parsed with the element's format.
    #[error("invalid number {value:?}")]
    InvalidNumber { value: String },

    /// A printf or sexagesimal format string is not supported.
    #[error("invalid number format {format:?}")]
    InvalidNumberFormat { format: String },

    /// A switch status other than `On` or `Off`.
    #[error("invalid switch status {0:?}")]
    InvalidSwitchStatus(String),

    /// A light/property state other than `Idle`, `Ok`, `Busy`, `Alert`.
    #[error("invalid state {0:?}")]
    InvalidState(String),

    /// A BLOB element is missing its `size` or `format` attribute, or they are malformed.
    #[error("invalid BLOB attributes: {0}")]
    InvalidBlobAttributes(String),

    /// The base64 payload could not be decoded.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// The decoded BLOB length disagrees with the declared `size`.
    #[error("BLOB size mismatch: declared {declared}, decoded {decoded}")]
    BlobSizeMismatch { declared: usize, decoded: usize },

    /// A `timeout` attribute is not a non-negative integer.
    #[error("invalid timeout {0:?}")]
    InvalidTimeout(String),
}

/// A desired value was rejected before staging.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// The value is outside the element's `[min, max]` range.
    #[error("value {value} for element {element:?} is outside [{min}, {max}]")]
    OutOfRange {
        element: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The value's variant does not match the element's variant.
    #[error("element {element:?} expects a {expected} value")]
    TypeMismatch {
        element: String,
        expected: &'static str,
    },

    /// A textual value could not be parsed for the element.
    #[error("value {value:?} is not valid for element {element:?}: {source}")]
    Unparseable {
        element: String,
        value: String,
        #[source]
        source: FormatError,
    },

    /// Light elements cannot be set.
    #[error("light element {0:?} cannot be set")]
    LightIsReadOnly(String),

    /// The property is read-only and cannot send changes.
    #[error("property {0:?} is read only")]
    ReadOnlyProperty(String),

    /// No element with that name exists in the property.
    #[error("no element {element:?} in property {property:?}")]
    UnknownElement { property: String, element: String },
}

/// A property or element could not be built from its definition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StructuralError {
    /// The `name` attribute was empty after trimming.
    #[error("{0} has an empty name")]
    EmptyName(&'static str),

    /// The `device` attribute was empty.
    #[error("definition of {0:?} has no device")]
    EmptyDevice(String),

    /// A required attribute was missing or held an unknown value.
    #[error("invalid {attribute} {value:?} on {property:?}")]
    InvalidAttribute {
        property: String,
        attribute: &'static str,
        value: String,
    },

    /// An element definition could not be parsed.
    #[error("invalid element {element:?}: {source}")]
    InvalidElement {
        element: String,
        #[source]
        source: FormatError,
    },
}
