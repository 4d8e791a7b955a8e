//! XML codec for INDI protocol messages.
//!
//! Wire format: a stream of top-level XML elements with no enclosing
//! document element, e.g.
//!
//! ```text
//! <getProperties version="1.7"/>
//! <defNumberVector device="Focuser" name="ABS_POS" state="Idle" perm="rw">
//!   <defNumber name="POS" format="%.0f" min="0" max="100000" step="1">500</defNumber>
//! </defNumberVector>
//! ```
//!
//! [`encode_message`] / [`decode_message`] convert one complete element.
//! [`MessageFramer`] cuts a byte stream into complete elements as they
//! arrive from a socket.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::values::PropertyKind;
use crate::protocol::messages::{
    DefElement, DefVector, DelProperty, DeviceMessage, EnableBlob, GetProperties, IndiMessage,
    NewVector, OneElement, SetVector,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The input is not well-formed XML.
    #[error("malformed XML: {0}")]
    MalformedXml(String),

    /// The input held no element at all.
    #[error("no element found")]
    Empty,

    /// The top-level tag is not part of the INDI vocabulary.
    #[error("unknown message tag: {0}")]
    UnknownTag(String),
}

fn xml_error(e: quick_xml::Error) -> ProtocolError {
    ProtocolError::MalformedXml(e.to_string())
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// A parsed XML element, two levels deep at most.
#[derive(Debug, Default)]
struct RawElement {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<RawElement>,
}

impl RawElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ProtocolError> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ProtocolError::MalformedXml(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(xml_error)?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            tag: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Default::default()
        })
    }

    fn attr(&self, key: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn attr_or_empty(&self, key: &str) -> String {
        self.attr(key).unwrap_or_default()
    }
}

/// Reads the first element of `xml` with its direct children.
fn read_element(xml: &str) -> Result<RawElement, ProtocolError> {
    let mut reader = Reader::from_str(xml);
    // Open elements; index 0 is the root once found.
    let mut stack: Vec<RawElement> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => stack.push(RawElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = RawElement::from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(ProtocolError::Empty);
                };
                let depth = stack.len();
                match stack.last_mut() {
                    // Grandchildren are not part of the vocabulary.
                    Some(parent) if depth == 1 => parent.children.push(element),
                    Some(_) => {}
                    None => return Ok(element),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => {
                return Err(if stack.is_empty() {
                    ProtocolError::Empty
                } else {
                    ProtocolError::MalformedXml("unexpected end of input".to_string())
                })
            }
            _ => {}
        }
    }
}

/// Splits `defNumberVector` into `("def", Number)`.
fn vector_tag(tag: &str) -> Option<(&str, PropertyKind)> {
    let body = tag.strip_suffix("Vector")?;
    ["def", "set", "new"].into_iter().find_map(|prefix| {
        let infix = body.strip_prefix(prefix)?;
        PropertyKind::from_tag_infix(infix).map(|kind| (prefix, kind))
    })
}

/// Decodes one complete INDI element.
///
/// Attributes the protocol requires (`device`, `name`, `state`) decode as
/// empty strings when absent; validating them is up to the receiver.
///
/// # Errors
///
/// Returns [`ProtocolError`] for malformed XML or an unknown tag.
pub fn decode_message(xml: &str) -> Result<IndiMessage, ProtocolError> {
    let root = read_element(xml)?;

    match root.tag.as_str() {
        "getProperties" => {
            return Ok(IndiMessage::GetProperties(GetProperties {
                version: root.attr_or_empty("version"),
                device: root.attr("device"),
                name: root.attr("name"),
            }))
        }
        "message" => {
            return Ok(IndiMessage::Message(DeviceMessage {
                device: root.attr("device"),
                timestamp: root.attr("timestamp"),
                message: root.attr("message"),
            }))
        }
        "delProperty" => {
            return Ok(IndiMessage::DelProperty(DelProperty {
                device: root.attr("device"),
                name: root.attr("name"),
                timestamp: root.attr("timestamp"),
                message: root.attr("message"),
            }))
        }
        "enableBLOB" => {
            return Ok(IndiMessage::EnableBlob(EnableBlob {
                device: root.attr_or_empty("device"),
                name: root.attr("name"),
                policy: root.text.trim().to_string(),
            }))
        }
        _ => {}
    }

    let (prefix, kind) = vector_tag(&root.tag).ok_or_else(|| ProtocolError::UnknownTag(root.tag.clone()))?;
    let message = match prefix {
        "def" => {
            let child_tag = format!("def{}", kind.tag_infix());
            IndiMessage::DefVector(DefVector {
                kind,
                device: root.attr_or_empty("device"),
                name: root.attr_or_empty("name"),
                label: root.attr("label"),
                group: root.attr("group"),
                state: root.attr_or_empty("state"),
                perm: root.attr("perm"),
                timeout: root.attr("timeout"),
                rule: root.attr("rule"),
                timestamp: root.attr("timestamp"),
                message: root.attr("message"),
                elements: root
                    .children
                    .iter()
                    .filter(|c| c.tag == child_tag)
                    .map(|c| DefElement {
                        name: c.attr_or_empty("name"),
                        label: c.attr("label"),
                        value: c.text.trim().to_string(),
                        format: c.attr("format"),
                        min: c.attr("min"),
                        max: c.attr("max"),
                        step: c.attr("step"),
                    })
                    .collect(),
            })
        }
        "set" => IndiMessage::SetVector(SetVector {
            kind,
            device: root.attr_or_empty("device"),
            name: root.attr_or_empty("name"),
            state: root.attr("state"),
            timeout: root.attr("timeout"),
            timestamp: root.attr("timestamp"),
            message: root.attr("message"),
            elements: one_elements(&root, kind),
        }),
        _ if kind == PropertyKind::Light => return Err(ProtocolError::UnknownTag(root.tag.clone())),
        _ => IndiMessage::NewVector(NewVector {
            kind,
            device: root.attr_or_empty("device"),
            name: root.attr_or_empty("name"),
            timestamp: root.attr("timestamp"),
            elements: one_elements(&root, kind),
        }),
    };
    Ok(message)
}

fn one_elements(root: &RawElement, kind: PropertyKind) -> Vec<OneElement> {
    let child_tag = format!("one{}", kind.tag_infix());
    root.children
        .iter()
        .filter(|c| c.tag == child_tag)
        .map(|c| OneElement {
            name: c.attr_or_empty("name"),
            value: c.text.trim().to_string(),
            size: c.attr("size"),
            format: c.attr("format"),
        })
        .collect()
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Writes `<tag attrs..>` followed by the closure's content and `</tag>`,
/// or `<tag attrs../>` when `content` is `None`.
fn write_element<F>(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    attributes: &[(&str, Option<&str>)],
    content: Option<F>,
) -> Result<(), ProtocolError>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> Result<(), ProtocolError>,
{
    let mut start = BytesStart::new(tag);
    for (key, value) in attributes {
        if let Some(value) = value {
            start.push_attribute((*key, *value));
        }
    }
    match content {
        None => writer.write_event(Event::Empty(start)).map_err(xml_error),
        Some(content) => {
            writer.write_event(Event::Start(start)).map_err(xml_error)?;
            content(writer)?;
            writer.write_event(Event::End(BytesEnd::new(tag))).map_err(xml_error)
        }
    }
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    attributes: &[(&str, Option<&str>)],
    text: &str,
) -> Result<(), ProtocolError> {
    if text.is_empty() {
        return write_element::<fn(&mut Writer<Vec<u8>>) -> Result<(), ProtocolError>>(
            writer, tag, attributes, None,
        );
    }
    write_element(
        writer,
        tag,
        attributes,
        Some(|w: &mut Writer<Vec<u8>>| {
            w.write_event(Event::Text(BytesText::new(text)))
                .map_err(xml_error)
        }),
    )
}

fn write_one_elements(
    writer: &mut Writer<Vec<u8>>,
    kind: PropertyKind,
    elements: &[OneElement],
) -> Result<(), ProtocolError> {
    let tag = format!("one{}", kind.tag_infix());
    for one in elements {
        write_text_element(
            writer,
            &tag,
            &[
                ("name", Some(&one.name)),
                ("size", one.size.as_deref()),
                ("format", one.format.as_deref()),
            ],
            &one.value,
        )?;
    }
    Ok(())
}

/// Encodes a message as a single line of XML terminated by `\n`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedXml`] if the writer fails.
pub fn encode_message(msg: &IndiMessage) -> Result<String, ProtocolError> {
    let mut writer = Writer::new(Vec::new());
    let w = &mut writer;

    match msg {
        IndiMessage::GetProperties(m) => write_text_element(
            w,
            "getProperties",
            &[
                ("version", Some(&m.version)),
                ("device", m.device.as_deref()),
                ("name", m.name.as_deref()),
            ],
            "",
        )?,
        IndiMessage::DefVector(m) => {
            let tag = format!("def{}Vector", m.kind.tag_infix());
            let child_tag = format!("def{}", m.kind.tag_infix());
            write_element(
                w,
                &tag,
                &[
                    ("device", Some(&m.device)),
                    ("name", Some(&m.name)),
                    ("label", m.label.as_deref()),
                    ("group", m.group.as_deref()),
                    ("state", Some(&m.state)),
                    ("perm", m.perm.as_deref()),
                    ("rule", m.rule.as_deref()),
                    ("timeout", m.timeout.as_deref()),
                    ("timestamp", m.timestamp.as_deref()),
                    ("message", m.message.as_deref()),
                ],
                Some(|w: &mut Writer<Vec<u8>>| {
                    for e in &m.elements {
                        write_text_element(
                            w,
                            &child_tag,
                            &[
                                ("name", Some(&e.name)),
                                ("label", e.label.as_deref()),
                                ("format", e.format.as_deref()),
                                ("min", e.min.as_deref()),
                                ("max", e.max.as_deref()),
                                ("step", e.step.as_deref()),
                            ],
                            &e.value,
                        )?;
                    }
                    Ok(())
                }),
            )?
        }
        IndiMessage::SetVector(m) => {
            let tag = format!("set{}Vector", m.kind.tag_infix());
            write_element(
                w,
                &tag,
                &[
                    ("device", Some(&m.device)),
                    ("name", Some(&m.name)),
                    ("state", m.state.as_deref()),
                    ("timeout", m.timeout.as_deref()),
                    ("timestamp", m.timestamp.as_deref()),
                    ("message", m.message.as_deref()),
                ],
                Some(|w: &mut Writer<Vec<u8>>| write_one_elements(w, m.kind, &m.elements)),
            )?
        }
        IndiMessage::NewVector(m) => {
            let tag = format!("new{}Vector", m.kind.tag_infix());
            write_element(
                w,
                &tag,
                &[
                    ("device", Some(&m.device)),
                    ("name", Some(&m.name)),
                    ("timestamp", m.timestamp.as_deref()),
                ],
                Some(|w: &mut Writer<Vec<u8>>| write_one_elements(w, m.kind, &m.elements)),
            )?
        }
        IndiMessage::Message(m) => write_text_element(
            w,
            "message",
            &[
                ("device", m.device.as_deref()),
                ("timestamp", m.timestamp.as_deref()),
                ("message", m.message.as_deref()),
            ],
            "",
        )?,
        IndiMessage::DelProperty(m) => write_text_element(
            w,
            "delProperty",
            &[
                ("device", m.device.as_deref()),
                ("name", m.name.as_deref()),
                ("timestamp", m.timestamp.as_deref()),
                ("message", m.message.as_deref()),
            ],
            "",
        )?,
        IndiMessage::EnableBlob(m) => write_text_element(
            w,
            "enableBLOB",
            &[("device", Some(&m.device)), ("name", m.name.as_deref())],
            &m.policy,
        )?,
    }

    let mut xml = String::from_utf8(writer.into_inner())
        .map_err(|e| ProtocolError::MalformedXml(e.to_string()))?;
    xml.push('\n');
    Ok(xml)
}

// ── Stream framing ────────────────────────────────────────────────────────────

/// Accumulates bytes from a stream and yields complete messages.
///
/// XML declarations, comments and whitespace between messages are skipped.
/// Unknown top-level elements are dropped with a debug log.  If the stream
/// turns out to be malformed, everything buffered so far is discarded.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: Vec<u8>,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held back waiting for the rest of an element.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Appends `bytes` and returns every message completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<IndiMessage> {
        self.buffer.extend_from_slice(bytes);

        let (frames, consumed) = self.scan();
        let messages = frames
            .into_iter()
            .filter_map(|(start, end)| {
                let text = String::from_utf8_lossy(&self.buffer[start..end]);
                match decode_message(&text) {
                    Ok(message) => Some(message),
                    Err(ProtocolError::UnknownTag(tag)) => {
                        debug!("skipping unknown element <{tag}>");
                        None
                    }
                    Err(e) => {
                        warn!("dropping undecodable message: {e}");
                        None
                    }
                }
            })
            .collect();

        self.buffer.drain(..consumed);
        messages
    }

    /// Finds complete top-level elements as `(start, end)` byte ranges and
    /// how many leading bytes can be released.
    fn scan(&self) -> (Vec<(usize, usize)>, usize) {
        let mut reader = Reader::from_reader(self.buffer.as_slice());
        let mut frames = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        let mut consumed = 0usize;

        loop {
            let before = reader.buffer_position();
            match reader.read_event() {
                Ok(Event::Start(_)) => {
                    if depth == 0 {
                        start = before;
                    }
                    depth += 1;
                }
                Ok(Event::End(_)) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        consumed = reader.buffer_position();
                        frames.push((start, consumed));
                    }
                }
                Ok(Event::Empty(_)) if depth == 0 => {
                    consumed = reader.buffer_position();
                    frames.push((before, consumed));
                }
                Ok(Event::Eof) => break,
                Ok(_) => {
                    if depth == 0 {
                        consumed = reader.buffer_position();
                    }
                }
                Err(quick_xml::Error::UnexpectedEof(_)) => break,
                Err(e) => {
                    warn!("discarding {} buffered bytes: {e}", self.buffer.len() - consumed);
                    consumed = self.buffer.len();
                    break;
                }
            }
        }
        (frames, consumed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DEF_NUMBER: &str = r#"<defNumberVector device="Focuser" name="ABS_POS" state="Idle" perm="rw">
  <defNumber name="POS" format="%.0f" min="0" max="100000" step="1">500</defNumber>
</defNumberVector>"#;

    #[test]
    fn test_decode_def_number_vector() {
        // Act
        let msg = decode_message(DEF_NUMBER).unwrap();

        // Assert
        let IndiMessage::DefVector(def) = msg else {
            panic!("expected a definition, got {msg:?}");
        };
        assert_eq!(def.kind, PropertyKind::Number);
        assert_eq!(def.device, "Focuser");
        assert_eq!(def.name, "ABS_POS");
        assert_eq!(def.perm.as_deref(), Some("rw"));
        assert_eq!(def.label, None);
        assert_eq!(def.elements.len(), 1);
        assert_eq!(def.elements[0].value, "500");
        assert_eq!(def.elements[0].format.as_deref(), Some("%.0f"));
    }

    #[test]
    fn test_decode_ignores_children_of_the_wrong_kind() {
        let xml = r#"<setSwitchVector device="D" name="P"><oneSwitch name="A">On</oneSwitch><oneText name="B">x</oneText></setSwitchVector>"#;
        let IndiMessage::SetVector(set) = decode_message(xml).unwrap() else {
            panic!("expected a set vector");
        };
        assert_eq!(set.elements, vec![OneElement::new("A", "On")]);
    }

    #[test]
    fn test_decode_enable_blob_takes_policy_from_text() {
        let msg = decode_message(r#"<enableBLOB device="CCD"> Also </enableBLOB>"#).unwrap();
        assert_eq!(
            msg,
            IndiMessage::EnableBlob(EnableBlob {
                device: "CCD".to_string(),
                name: None,
                policy: "Also".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_unescapes_attributes_and_text() {
        let xml = r#"<message device="D" message="a &lt; b &amp; c"/>"#;
        let IndiMessage::Message(m) = decode_message(xml).unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(m.message.as_deref(), Some("a < b & c"));
    }

    #[test]
    fn test_decode_rejects_unknown_and_light_intent_tags() {
        assert_eq!(
            decode_message("<pingRequest/>"),
            Err(ProtocolError::UnknownTag("pingRequest".to_string()))
        );
        assert!(matches!(
            decode_message(r#"<newLightVector device="D" name="P"/>"#),
            Err(ProtocolError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_xml() {
        assert!(matches!(
            decode_message("<defTextVector device=\"D\"><defText></defTextVector>"),
            Err(ProtocolError::MalformedXml(_))
        ));
        assert_eq!(decode_message("   "), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_encode_new_number_vector_is_compact() {
        // Arrange
        let msg = IndiMessage::NewVector(NewVector {
            kind: PropertyKind::Number,
            device: "Focuser".to_string(),
            name: "ABS_POS".to_string(),
            timestamp: Some("2024-01-01T00:00:00.000".to_string()),
            elements: vec![OneElement::new("POS", "600.0")],
        });

        // Act
        let xml = encode_message(&msg).unwrap();

        // Assert
        assert_eq!(
            xml,
            "<newNumberVector device=\"Focuser\" name=\"ABS_POS\" timestamp=\"2024-01-01T00:00:00.000\">\
             <oneNumber name=\"POS\">600.0</oneNumber></newNumberVector>\n"
        );
    }

    #[test]
    fn test_encode_get_properties_omits_absent_attributes() {
        let xml = encode_message(&IndiMessage::GetProperties(GetProperties::new(None, None))).unwrap();
        assert_eq!(xml, "<getProperties version=\"1.7\"/>\n");
    }

    #[test]
    fn test_encode_escapes_text_and_attributes() {
        let mut set = SetVector::new(PropertyKind::Text, "D", "P");
        set.message = Some("\"quoted\"".to_string());
        set.elements.push(OneElement::new("T", "<b>"));

        let xml = encode_message(&IndiMessage::SetVector(set.clone())).unwrap();

        assert!(xml.contains("&lt;b&gt;"));
        assert_eq!(decode_message(&xml).unwrap(), IndiMessage::SetVector(set));
    }

    #[test]
    fn test_framer_reassembles_split_messages() {
        // Arrange
        let mut framer = MessageFramer::new();
        let bytes = DEF_NUMBER.as_bytes();
        let (first, second) = bytes.split_at(40);

        // Act
        let none = framer.push(first);
        let some = framer.push(second);

        // Assert
        assert!(none.is_empty());
        assert_eq!(some.len(), 1);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_framer_yields_several_messages_and_keeps_the_tail() {
        let mut framer = MessageFramer::new();
        let input = "<?xml version=\"1.0\"?>\n<getProperties version=\"1.7\"/>\n<delProperty device=\"D\"/>\n<message dev";

        let messages = framer.push(input.as_bytes());

        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], IndiMessage::GetProperties(_)));
        assert!(matches!(messages[1], IndiMessage::DelProperty(_)));
        assert_eq!(framer.buffered_len(), "<message dev".len());

        let rest = framer.push(b"ice=\"D\" message=\"hi\"/>");
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_framer_skips_unknown_elements() {
        let mut framer = MessageFramer::new();
        let messages = framer.push(b"<foo><bar/></foo><getProperties version=\"1.7\"/>");
        assert_eq!(messages.len(), 1);
    }
}
