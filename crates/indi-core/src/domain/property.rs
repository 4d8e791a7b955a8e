//! Properties: named, typed, ordered groups of elements.
//!
//! A [`Property`] is built from a `def*Vector`, updated in place by
//! `set*Vector` messages, and produces `new*Vector` intents from staged
//! element values.  All elements of a property share its [`PropertyKind`];
//! the only way to add elements is through the definition, which builds
//! every element with the definition's kind.
//!
//! # Failure policy
//!
//! Problems in *remote* data never surface as errors from
//! [`Property::apply_set`]: malformed values are skipped, the property goes
//! to `Alert`, and the caller learns about it from the returned
//! [`UpdateOutcome`] and the new state.  Problems with *local* intents
//! (staging, sending a read-only property) are returned as
//! [`ValidationError`]s.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::element::{DesiredValue, Element};
use crate::domain::values::{Permission, PropertyKind, PropertyState, SwitchRule};
use crate::error::{FormatError, StructuralError, ValidationError};
use crate::protocol::messages::{DefVector, NewVector, SetVector};
use crate::protocol::timestamp::{now_timestamp, parse_timestamp};

/// Group assigned to properties that do not declare one.
pub const DEFAULT_GROUP: &str = "Unsorted";

/// What a `set*Vector` changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Elements whose value was replaced, in message order.
    pub updated: Vec<String>,
    /// Values that failed to parse.  Non-empty means the property is in `Alert`.
    pub errors: Vec<FormatError>,
}

impl UpdateOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// An INDI property.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    name: String,
    label: String,
    group: String,
    kind: PropertyKind,
    state: PropertyState,
    permission: Permission,
    timeout: u32,
    rule: Option<SwitchRule>,
    timestamp: DateTime<Utc>,
    elements: Vec<Element>,
}

impl Property {
    /// Builds a property and its elements from a definition.
    ///
    /// Defaults: an empty label copies the name, an empty group becomes
    /// `"Unsorted"`, a missing timeout is `0`.  Light properties are always
    /// read-only with timeout `0`.
    ///
    /// A switch property whose rule is already violated is put into
    /// `Alert`, except when no element is `On` at all: devices commonly
    /// define switches before selecting one, so that case is tolerated.
    ///
    /// # Errors
    ///
    /// Returns a [`StructuralError`] if the name is empty, an attribute
    /// holds an unknown value, or any element fails to build.
    pub fn from_def(def: &DefVector) -> Result<Self, StructuralError> {
        let name = def.name.trim();
        if name.is_empty() {
            return Err(StructuralError::EmptyName("property"));
        }
        let invalid = |attribute: &'static str, value: &str| StructuralError::InvalidAttribute {
            property: name.to_string(),
            attribute,
            value: value.to_string(),
        };

        let label = match def.label.as_deref().map(str::trim) {
            Some(l) if !l.is_empty() => l.to_string(),
            _ => name.to_string(),
        };
        let group = match def.group.as_deref().map(str::trim) {
            Some(g) if !g.is_empty() => g.to_string(),
            _ => DEFAULT_GROUP.to_string(),
        };

        let state = PropertyState::from_wire(def.state.trim())
            .ok_or_else(|| invalid("state", &def.state))?;

        let (permission, timeout) = if def.kind == PropertyKind::Light {
            (Permission::ReadOnly, 0)
        } else {
            let perm = def.perm.as_deref().unwrap_or_default().trim();
            let permission = Permission::from_wire(perm).ok_or_else(|| invalid("perm", perm))?;
            let timeout = match def.timeout.as_deref() {
                Some(raw) => parse_timeout(raw).map_err(|_| invalid("timeout", raw))?,
                None => 0,
            };
            (permission, timeout)
        };

        let rule = if def.kind == PropertyKind::Switch {
            let raw = def.rule.as_deref().unwrap_or_default().trim();
            Some(SwitchRule::from_wire(raw).ok_or_else(|| invalid("rule", raw))?)
        } else {
            None
        };

        let mut elements: Vec<Element> = Vec::with_capacity(def.elements.len());
        for element_def in &def.elements {
            let element = Element::from_def(def.kind, element_def)?;
            if elements.iter().any(|e| e.name() == element.name()) {
                debug!(property = name, element = element.name(), "ignoring duplicate element");
                continue;
            }
            elements.push(element);
        }

        let mut property = Self {
            name: name.to_string(),
            label,
            group,
            kind: def.kind,
            state,
            permission,
            timeout,
            rule,
            timestamp: parse_timestamp(def.timestamp.as_deref()),
            elements,
        };

        if !property.switch_rule_satisfied() && property.on_count() != 0 {
            property.state = PropertyState::Alert;
        }
        Ok(property)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn state(&self) -> PropertyState {
        self.state
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    /// The switch rule; `None` for non-switch properties.
    pub fn rule(&self) -> Option<SwitchRule> {
        self.rule
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name() == name)
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.name() == name)
    }

    pub fn element_names(&self) -> Vec<&str> {
        self.elements.iter().map(Element::name).collect()
    }

    // ── Switch rule ───────────────────────────────────────────────────────────

    /// Number of switch elements currently `On`.
    pub fn on_count(&self) -> usize {
        self.elements
            .iter()
            .filter_map(Element::as_switch)
            .filter(|s| s.status().is_on())
            .count()
    }

    /// `true` for non-switch properties and for switches obeying their rule.
    pub fn switch_rule_satisfied(&self) -> bool {
        self.rule.map_or(true, |rule| rule.allows(self.on_count()))
    }

    // ── Remote updates ────────────────────────────────────────────────────────

    /// Applies a `set*Vector` addressed to this property.
    ///
    /// `state` and `timeout` are applied when present, then every named
    /// element that exists.  Elements not named are left alone and unknown
    /// names are ignored.  A value that fails to parse is skipped, the
    /// remaining ones are still applied, and the property ends up in
    /// `Alert`.  A switch left violating its rule also ends up in `Alert`.
    pub fn apply_set(&mut self, set: &SetVector) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        if let Some(raw) = set.state.as_deref() {
            match PropertyState::from_wire(raw.trim()) {
                Some(state) => self.state = state,
                None => outcome.errors.push(FormatError::InvalidState(raw.to_string())),
            }
        }

        if self.kind != PropertyKind::Light {
            if let Some(raw) = set.timeout.as_deref() {
                match parse_timeout(raw) {
                    Ok(timeout) => self.timeout = timeout,
                    Err(e) => outcome.errors.push(e),
                }
            }
        }

        for one in &set.elements {
            let Some(element) = self.element_mut(one.name.trim()) else {
                debug!(property = %self.name, element = %one.name, "ignoring unknown element");
                continue;
            };
            match element.apply_remote_value(one) {
                Ok(()) => outcome.updated.push(element.name().to_string()),
                Err(e) => outcome.errors.push(e),
            }
        }

        self.timestamp = parse_timestamp(set.timestamp.as_deref());

        if !outcome.errors.is_empty() || !self.switch_rule_satisfied() {
            self.state = PropertyState::Alert;
        }
        outcome
    }

    // ── Local intents ─────────────────────────────────────────────────────────

    /// Stages a desired value on the named element.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownElement`] if no such element exists,
    /// or whatever the element's own validation reports.
    pub fn stage(&mut self, element: &str, value: DesiredValue) -> Result<(), ValidationError> {
        self.element_for_staging(element)?.stage(value)
    }

    /// Stages a value given as text on the named element.
    pub fn stage_text(&mut self, element: &str, text: &str) -> Result<(), ValidationError> {
        self.element_for_staging(element)?.stage_text(text)
    }

    fn element_for_staging(&mut self, element: &str) -> Result<&mut Element, ValidationError> {
        let property = self.name.clone();
        self.element_mut(element)
            .ok_or_else(|| ValidationError::UnknownElement {
                property,
                element: element.to_string(),
            })
    }

    /// `true` if any element has a staged value.
    pub fn has_changes(&self) -> bool {
        self.elements.iter().any(Element::is_changed)
    }

    /// Discards every staged value.
    pub fn clear_changes(&mut self) {
        self.elements.iter_mut().for_each(Element::clear_desired);
    }

    /// Composes the `new*Vector` for every staged value and consumes them.
    ///
    /// Switch vectors carry every element: staged ones with their desired
    /// status, the others with their current status.  When something is
    /// rendered the property moves to `Busy`.  Returns `Ok(None)` (and
    /// changes nothing) when no element is staged.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ReadOnlyProperty`] for read-only properties.
    pub fn render_new_vector(&mut self, device: &str) -> Result<Option<NewVector>, ValidationError> {
        if self.permission == Permission::ReadOnly {
            return Err(ValidationError::ReadOnlyProperty(self.name.clone()));
        }
        if !self.has_changes() {
            return Ok(None);
        }

        let fragments: Vec<_> = self
            .elements
            .iter_mut()
            .filter_map(Element::render_new_value)
            .collect();
        if fragments.is_empty() {
            return Ok(None);
        }

        self.state = PropertyState::Busy;
        Ok(Some(NewVector {
            kind: self.kind,
            device: device.to_string(),
            name: self.name.clone(),
            timestamp: Some(now_timestamp()),
            elements: fragments,
        }))
    }
}

fn parse_timeout(raw: &str) -> Result<u32, FormatError> {
    raw.trim()
        .parse()
        .map_err(|_| FormatError::InvalidTimeout(raw.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
