//! epgsync feed: read an EPG XML document into flat event records.
//!
//! The reader knows nothing about what the fields mean. Each `event` element
//! becomes a [`FeedEvent`] holding its own attributes plus, per child
//! element, the child's attributes and text. Variant-specific field names
//! live in [`FeedLayout`].

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::str::FromStr;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::debug;

mod layout;

pub use layout::{FeedKind, FeedLayout};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("unsupported feed type: {0}")]
    UnsupportedFeed(String),
    #[error("unsupported feed encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("feed is not valid {encoding}: {msg}")]
    Encoding { encoding: &'static str, msg: String },
    #[error("xml error at byte {pos}: {msg}")]
    Xml { pos: usize, msg: String },
}

/// One child element of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedField {
    pub attrs: BTreeMap<String, String>,
    pub text: String,
}

/// One `event` element, flattened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub attrs: BTreeMap<String, String>,
    pub children: BTreeMap<String, FeedField>,
}

impl FeedEvent {
    pub fn attr(&self, name: &str) -> Option<&str> { self.attrs.get(name).map(|s| s.as_str()) }

    pub fn child(&self, name: &str) -> Option<&FeedField> { self.children.get(name) }

    pub fn child_attr(&self, name: &str, attr: &str) -> Option<&str> {
        self.children.get(name).and_then(|c| c.attrs.get(attr)).map(|s| s.as_str())
    }

    /// Text content of a child element, `None` when the child is absent.
    pub fn child_text(&self, name: &str) -> Option<&str> { self.children.get(name).map(|c| c.text.as_str()) }

    /// Builder used by tests and synthetic feeds.
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_child(mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Self {
        let field = FeedField {
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            text: text.to_string(),
        };
        self.children.insert(name.to_string(), field);
        self
    }
}

impl FromStr for FeedKind {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skjarinn" => Ok(FeedKind::Skjarinn),
            other => Err(FeedError::UnsupportedFeed(other.to_string())),
        }
    }
}

/// Decode raw feed bytes. A BOM wins, then the XML declaration's encoding
/// label. Undeclared feeds are UTF-8 when they validate as such and
/// ISO-8859-1 (windows-1252) otherwise.
pub fn decode(bytes: &[u8]) -> Result<String, FeedError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return decode_as(encoding, &bytes[bom_len..]);
    }
    let encoding = match declared_label(bytes) {
        Some(label) => Encoding::for_label(label.as_bytes()).ok_or(FeedError::UnsupportedEncoding(label))?,
        None if std::str::from_utf8(bytes).is_ok() => UTF_8,
        None => WINDOWS_1252,
    };
    decode_as(encoding, bytes)
}

fn decode_as(encoding: &'static Encoding, bytes: &[u8]) -> Result<String, FeedError> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(FeedError::Encoding { encoding: encoding.name(), msg: "malformed byte sequence".into() });
    }
    Ok(text.into_owned())
}

/// Encoding label from the `<?xml ... ?>` declaration, if the document
/// starts with one.
fn declared_label(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    match reader.read_event_into(&mut buf) {
        Ok(Event::Decl(decl)) => {
            let label = decl.encoding()?.ok()?;
            Some(String::from_utf8_lossy(&label).trim().to_string())
        }
        _ => None,
    }
}

/// Resolve HTML character references left behind when the producer escaped
/// markup twice. Each reference is resolved on its own; unknown ones stay.
pub fn unescape_text(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    html_escape::decode_html_entities(s).into_owned()
}

fn xml_err(reader: &Reader<&[u8]>, e: impl std::fmt::Display) -> FeedError {
    FeedError::Xml { pos: reader.buffer_position(), msg: e.to_string() }
}

fn collect_attrs(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<BTreeMap<String, String>, FeedError> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_err(reader, err))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
        let value = attr.unescape_value().map_err(|err| xml_err(reader, err))?.to_string();
        out.insert(key, value);
    }
    Ok(out)
}

fn local_name(e: &BytesStart<'_>) -> String { String::from_utf8_lossy(e.local_name().as_ref()).to_string() }

/// Parse every `layout.event` element of the document.
pub fn read_events(bytes: &[u8], layout: &FeedLayout) -> Result<Vec<FeedEvent>, FeedError> {
    let text = decode(bytes)?;
    parse_events(&text, layout)
}

pub fn parse_events(text: &str, layout: &FeedLayout) -> Result<Vec<FeedEvent>, FeedError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut out = Vec::new();
    let mut current: Option<FeedEvent> = None;
    // (child name, field) for the direct child currently open
    let mut child: Option<(String, FeedField)> = None;
    // depth relative to the open event element; 0 = not inside an event
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if current.is_none() {
                    if e.local_name().as_ref() == layout.event.as_bytes() {
                        current = Some(FeedEvent { attrs: collect_attrs(&reader, &e)?, children: BTreeMap::new() });
                        depth = 1;
                    }
                    continue;
                }
                depth += 1;
                if depth == 2 {
                    child = Some((local_name(&e), FeedField { attrs: collect_attrs(&reader, &e)?, text: String::new() }));
                }
            }
            Ok(Event::Empty(e)) => {
                match current.as_mut() {
                    None => {
                        if e.local_name().as_ref() == layout.event.as_bytes() {
                            out.push(FeedEvent { attrs: collect_attrs(&reader, &e)?, children: BTreeMap::new() });
                        }
                    }
                    Some(ev) if depth == 1 => {
                        let field = FeedField { attrs: collect_attrs(&reader, &e)?, text: String::new() };
                        ev.children.entry(local_name(&e)).or_insert(field);
                    }
                    Some(_) => {}
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, field)) = child.as_mut() {
                    let s = t.unescape().map_err(|err| xml_err(&reader, err))?;
                    field.text.push_str(&s);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, field)) = child.as_mut() {
                    field.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if current.is_none() {
                    continue;
                }
                depth -= 1;
                match depth {
                    0 => {
                        if let Some(ev) = current.take() {
                            out.push(ev);
                        }
                    }
                    1 => {
                        if let (Some(ev), Some((name, field))) = (current.as_mut(), child.take()) {
                            ev.children.entry(name).or_insert(field);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_err(&reader, e)),
        }
    }
    if current.is_some() {
        return Err(FeedError::Xml { pos: reader.buffer_position(), msg: format!("unterminated <{}>", layout.event) });
    }
    debug!(events = out.len(), "feed: parsed events");
    Ok(out)
}
