//! Typed element values: the leaves of the property tree.
//!
//! Every element has a current value (last reported by the device) and,
//! except for lights, an optional *desired* value staged locally.  Staging
//! validates; rendering a new-value fragment consumes the staged value so
//! each intent is sent at most once.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! defNumber ──from_def──► NumberElement { value: 500.0, desired: None }
//! stage(600.0)          ► NumberElement { value: 500.0, desired: Some(600.0) }
//! render_new_value()    ► <oneNumber name="POS">600.0</oneNumber>, desired: None
//! oneNumber 600         ► NumberElement { value: 600.0, desired: None }
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::domain::number_format::NumberFormat;
use crate::domain::values::{PropertyKind, PropertyState, SwitchStatus};
use crate::error::{FormatError, StructuralError, ValidationError};
use crate::protocol::messages::{DefElement, OneElement};

/// A binary payload and its format (e.g. `.fits`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobValue {
    pub data: Vec<u8>,
    pub format: String,
}

impl BlobValue {
    pub fn new(data: Vec<u8>, format: &str) -> Self {
        Self {
            data,
            format: format.to_string(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is zlib-compressed (`.z` suffix).
    pub fn is_compressed(&self) -> bool {
        self.format.ends_with(".z")
    }
}

/// A value offered for staging on an element of any variant.
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredValue {
    Text(String),
    Number(f64),
    Switch(SwitchStatus),
    Blob(BlobValue),
}

/// Name and label shared by every variant.
#[derive(Debug, Clone, PartialEq)]
struct Identity {
    name: String,
    label: String,
}

impl Identity {
    fn from_def(def: &DefElement) -> Result<Self, StructuralError> {
        let name = def.name.trim();
        if name.is_empty() {
            return Err(StructuralError::EmptyName("element"));
        }
        let label = match def.label.as_deref().map(str::trim) {
            Some(l) if !l.is_empty() => l.to_string(),
            _ => name.to_string(),
        };
        Ok(Self {
            name: name.to_string(),
            label,
        })
    }
}

// ── Text ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TextElement {
    id: Identity,
    value: String,
    desired: Option<String>,
}

impl TextElement {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn desired(&self) -> Option<&str> {
        self.desired.as_deref()
    }

    pub fn stage(&mut self, value: impl Into<String>) {
        self.desired = Some(value.into());
    }

    fn apply(&mut self, raw: &str) {
        self.value = raw.trim().to_string();
    }

    fn render(&mut self) -> Option<OneElement> {
        let desired = self.desired.take()?;
        Some(OneElement::new(&self.id.name, &desired))
    }
}

// ── Number ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NumberElement {
    id: Identity,
    value: f64,
    min: f64,
    max: f64,
    step: f64,
    format: NumberFormat,
    desired: Option<f64>,
}

impl NumberElement {
    fn from_def(id: Identity, def: &DefElement) -> Result<Self, FormatError> {
        let format = match def.format.as_deref() {
            Some(spec) => NumberFormat::parse(spec)?,
            None => NumberFormat::default(),
        };
        let bound = |raw: Option<&str>| match raw {
            Some(text) => format.parse_value(text),
            None => Ok(0.0),
        };
        let min = bound(def.min.as_deref())?;
        let max = bound(def.max.as_deref())?;
        let step = bound(def.step.as_deref())?;
        let value = format.parse_value(&def.value)?;
        Ok(Self {
            id,
            value,
            min,
            max,
            step,
            format,
            desired: None,
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn format(&self) -> &NumberFormat {
        &self.format
    }

    pub fn desired(&self) -> Option<f64> {
        self.desired
    }

    /// The current value rendered with the element's format.
    pub fn formatted_value(&self) -> String {
        self.format.format(self.value)
    }

    /// Stages `value` if it lies within `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::OutOfRange`] otherwise; nothing is staged.
    pub fn stage(&mut self, value: f64) -> Result<(), ValidationError> {
        if !(self.min..=self.max).contains(&value) {
            return Err(ValidationError::OutOfRange {
                element: self.id.name.clone(),
                value,
                min: self.min,
                max: self.max,
            });
        }
        self.desired = Some(value);
        Ok(())
    }

    /// Parses `text` with the element's format, then stages it.
    pub fn stage_text(&mut self, text: &str) -> Result<(), ValidationError> {
        let value = self
            .format
            .parse_value(text)
            .map_err(|source| ValidationError::Unparseable {
                element: self.id.name.clone(),
                value: text.to_string(),
                source,
            })?;
        self.stage(value)
    }

    /// Remote values outside `[min, max]` are accepted as reported.
    fn apply(&mut self, raw: &str) -> Result<(), FormatError> {
        self.value = self.format.parse_value(raw)?;
        Ok(())
    }

    fn render(&mut self) -> Option<OneElement> {
        let desired = self.desired.take()?;
        Some(OneElement::new(&self.id.name, &wire_number(desired)))
    }
}

/// Shortest round-trip decimal with at least one fractional digit (`600.0`).
fn wire_number(value: f64) -> String {
    format!("{value:?}")
}

// ── Switch ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchElement {
    id: Identity,
    status: SwitchStatus,
    desired: Option<SwitchStatus>,
}

impl SwitchElement {
    pub fn status(&self) -> SwitchStatus {
        self.status
    }

    pub fn desired(&self) -> Option<SwitchStatus> {
        self.desired
    }

    /// The status the next send will carry: staged if any, else current.
    pub fn outgoing_status(&self) -> SwitchStatus {
        self.desired.unwrap_or(self.status)
    }

    pub fn stage(&mut self, status: SwitchStatus) {
        self.desired = Some(status);
    }

    fn apply(&mut self, raw: &str) -> Result<(), FormatError> {
        self.status = parse_switch(raw)?;
        Ok(())
    }

    /// Renders the outgoing status even when nothing is staged: switch
    /// vectors are always sent in full.
    fn render_full(&mut self) -> OneElement {
        let status = self.outgoing_status();
        self.desired = None;
        OneElement::new(&self.id.name, status.as_wire())
    }
}

fn parse_switch(raw: &str) -> Result<SwitchStatus, FormatError> {
    let raw = raw.trim();
    SwitchStatus::from_wire(raw).ok_or_else(|| FormatError::InvalidSwitchStatus(raw.to_string()))
}

// ── Light ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LightElement {
    id: Identity,
    state: PropertyState,
}

impl LightElement {
    pub fn state(&self) -> PropertyState {
        self.state
    }

    fn apply(&mut self, raw: &str) -> Result<(), FormatError> {
        self.state = parse_state(raw)?;
        Ok(())
    }
}

pub(crate) fn parse_state(raw: &str) -> Result<PropertyState, FormatError> {
    let raw = raw.trim();
    PropertyState::from_wire(raw).ok_or_else(|| FormatError::InvalidState(raw.to_string()))
}

// ── BLOB ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BlobElement {
    id: Identity,
    value: BlobValue,
    desired: Option<BlobValue>,
}

impl BlobElement {
    pub fn value(&self) -> &BlobValue {
        &self.value
    }

    pub fn desired(&self) -> Option<&BlobValue> {
        self.desired.as_ref()
    }

    pub fn stage(&mut self, value: BlobValue) {
        self.desired = Some(value);
    }

    /// Decodes `size`, `format` and the base64 text of a `oneBLOB`.
    ///
    /// Compressed (`.z`) payloads are kept as received; their `size` is the
    /// inflated length, so it is not checked against the decoded bytes.
    fn apply(&mut self, one: &OneElement) -> Result<(), FormatError> {
        let size: usize = one
            .size
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| FormatError::InvalidBlobAttributes("missing size".to_string()))?
            .parse()
            .map_err(|_| FormatError::InvalidBlobAttributes("size is not a number".to_string()))?;
        let format = one
            .format
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| FormatError::InvalidBlobAttributes("missing format".to_string()))?;

        let encoded: String = one.value.chars().filter(|c| !c.is_whitespace()).collect();
        let data = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| FormatError::InvalidBase64(e.to_string()))?;

        let value = BlobValue::new(data, format);
        if !value.is_compressed() && value.size() != size {
            return Err(FormatError::BlobSizeMismatch {
                declared: size,
                decoded: value.size(),
            });
        }
        self.value = value;
        Ok(())
    }

    fn render(&mut self) -> Option<OneElement> {
        let desired = self.desired.take()?;
        Some(OneElement {
            name: self.id.name.clone(),
            value: BASE64.encode(&desired.data),
            size: Some(desired.size().to_string()),
            format: Some(desired.format),
        })
    }
}

// ── Element ───────────────────────────────────────────────────────────────────

/// An element of one of the five INDI variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Text(TextElement),
    Number(NumberElement),
    Switch(SwitchElement),
    Light(LightElement),
    Blob(BlobElement),
}

impl Element {
    /// Builds an element of `kind` from its definition.
    ///
    /// # Errors
    ///
    /// Returns a [`StructuralError`] if the name is empty or the initial
    /// value (or number format) does not parse.
    pub fn from_def(kind: PropertyKind, def: &DefElement) -> Result<Self, StructuralError> {
        let id = Identity::from_def(def)?;
        let wrap = |source: FormatError| StructuralError::InvalidElement {
            element: id.name.clone(),
            source,
        };
        let element = match kind {
            PropertyKind::Text => Element::Text(TextElement {
                value: def.value.trim().to_string(),
                desired: None,
                id: id.clone(),
            }),
            PropertyKind::Number => {
                Element::Number(NumberElement::from_def(id.clone(), def).map_err(wrap)?)
            }
            PropertyKind::Switch => Element::Switch(SwitchElement {
                status: parse_switch(&def.value).map_err(wrap)?,
                desired: None,
                id: id.clone(),
            }),
            PropertyKind::Light => Element::Light(LightElement {
                state: parse_state(&def.value).map_err(wrap)?,
                id: id.clone(),
            }),
            PropertyKind::Blob => Element::Blob(BlobElement {
                value: BlobValue::default(),
                desired: None,
                id: id.clone(),
            }),
        };
        Ok(element)
    }

    fn id(&self) -> &Identity {
        match self {
            Element::Text(e) => &e.id,
            Element::Number(e) => &e.id,
            Element::Switch(e) => &e.id,
            Element::Light(e) => &e.id,
            Element::Blob(e) => &e.id,
        }
    }

    pub fn name(&self) -> &str {
        &self.id().name
    }

    pub fn label(&self) -> &str {
        &self.id().label
    }

    pub fn kind(&self) -> PropertyKind {
        match self {
            Element::Text(_) => PropertyKind::Text,
            Element::Number(_) => PropertyKind::Number,
            Element::Switch(_) => PropertyKind::Switch,
            Element::Light(_) => PropertyKind::Light,
            Element::Blob(_) => PropertyKind::Blob,
        }
    }

    /// Replaces the current value with the parsed wire payload.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] and leaves the value untouched if the
    /// payload is malformed for this variant.
    pub fn apply_remote_value(&mut self, one: &OneElement) -> Result<(), FormatError> {
        match self {
            Element::Text(e) => {
                e.apply(&one.value);
                Ok(())
            }
            Element::Number(e) => e.apply(&one.value),
            Element::Switch(e) => e.apply(&one.value),
            Element::Light(e) => e.apply(&one.value),
            Element::Blob(e) => e.apply(one),
        }
    }

    /// Validates and stages a desired value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for a variant mismatch, an out-of-range
    /// number, or any light element.
    pub fn stage(&mut self, value: DesiredValue) -> Result<(), ValidationError> {
        match (self, value) {
            (Element::Light(e), _) => Err(ValidationError::LightIsReadOnly(e.id.name.clone())),
            (Element::Text(e), DesiredValue::Text(v)) => {
                e.stage(v);
                Ok(())
            }
            (Element::Number(e), DesiredValue::Number(v)) => e.stage(v),
            (Element::Number(e), DesiredValue::Text(v)) => e.stage_text(&v),
            (Element::Switch(e), DesiredValue::Switch(v)) => {
                e.stage(v);
                Ok(())
            }
            (Element::Blob(e), DesiredValue::Blob(v)) => {
                e.stage(v);
                Ok(())
            }
            (element, _) => Err(ValidationError::TypeMismatch {
                element: element.name().to_string(),
                expected: element.kind().tag_infix(),
            }),
        }
    }

    /// Stages a value given as text, parsing it for the element's variant.
    pub fn stage_text(&mut self, text: &str) -> Result<(), ValidationError> {
        let value = match self {
            Element::Switch(e) => {
                let status = parse_switch(text).map_err(|source| ValidationError::Unparseable {
                    element: e.id.name.clone(),
                    value: text.to_string(),
                    source,
                })?;
                DesiredValue::Switch(status)
            }
            _ => DesiredValue::Text(text.to_string()),
        };
        self.stage(value)
    }

    /// `true` iff a desired value is staged.  Always `false` for lights.
    pub fn is_changed(&self) -> bool {
        match self {
            Element::Text(e) => e.desired.is_some(),
            Element::Number(e) => e.desired.is_some(),
            Element::Switch(e) => e.desired.is_some(),
            Element::Light(_) => false,
            Element::Blob(e) => e.desired.is_some(),
        }
    }

    /// Renders the staged value as a `one*` fragment and clears it.
    ///
    /// Returns `None` when nothing is staged.  Switches always render their
    /// outgoing status; lights never render.
    pub fn render_new_value(&mut self) -> Option<OneElement> {
        match self {
            Element::Text(e) => e.render(),
            Element::Number(e) => e.render(),
            Element::Switch(e) => Some(e.render_full()),
            Element::Light(_) => None,
            Element::Blob(e) => e.render(),
        }
    }

    /// Discards any staged value without sending it.
    pub fn clear_desired(&mut self) {
        match self {
            Element::Text(e) => e.desired = None,
            Element::Number(e) => e.desired = None,
            Element::Switch(e) => e.desired = None,
            Element::Light(_) => {}
            Element::Blob(e) => e.desired = None,
        }
    }

    /// Human-readable current value.
    pub fn value_string(&self) -> String {
        match self {
            Element::Text(e) => e.value.clone(),
            Element::Number(e) => e.formatted_value().trim().to_string(),
            Element::Switch(e) => e.status.as_wire().to_string(),
            Element::Light(e) => e.state.as_wire().to_string(),
            Element::Blob(e) => format!("{} bytes ({})", e.value.size(), e.value.format),
        }
    }

    pub fn as_text(&self) -> Option<&TextElement> {
        match self {
            Element::Text(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&NumberElement> {
        match self {
            Element::Number(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<&SwitchElement> {
        match self {
            Element::Switch(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_light(&self) -> Option<&LightElement> {
        match self {
            Element::Light(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobElement> {
        match self {
            Element::Blob(e) => Some(e),
            _ => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
