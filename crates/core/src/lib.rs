//! epgsync core types: record kinds, ids and the property bag every catalog
//! record is reconciled through.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod props;

pub use props::{
    CollectionProps, ContentType, SlotMetadata, SlotProps, SlotType, VideoMetadata, VideoProps,
};

/// Flat key/value bag holding the full desired state of a record.
pub type Properties = Map<String, Value>;

/// Property key carrying the feed-provided correlation id.
pub const EXTERNAL_ID: &str = "externalId";

/// Property key carrying the catalog-assigned id on update calls.
pub const ID: &str = "id";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Collection,
    Video,
    Slot,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Collection, RecordKind::Video, RecordKind::Slot];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Collection => "collection",
            RecordKind::Video => "video",
            RecordKind::Slot => "slot",
        }
    }

    /// Collection route name on the catalog service.
    pub fn plural(&self) -> &'static str {
        match self {
            RecordKind::Collection => "collections",
            RecordKind::Video => "videos",
            RecordKind::Slot => "slots",
        }
    }

    /// Keys whose object values are overlaid onto the remote value rather
    /// than replacing it.
    pub fn merged_fields(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Collection => &[],
            RecordKind::Video | RecordKind::Slot => &["metadata"],
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog-assigned record id. Opaque to us, but kept in its wire form so a
/// numeric id is written back as a number and compares equal to what the
/// catalog stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self { RecordId::Text(id.into()) }

    /// Accepts either a non-empty JSON string or an integer JSON number.
    pub fn from_json(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) if !s.is_empty() => Some(RecordId::Text(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(RecordId::Number(i)),
                None => Some(RecordId::Text(n.to_string())),
            },
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RecordId::Number(n) => Value::from(*n),
            RecordId::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self { RecordId::Text(s.to_string()) }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self { RecordId::Text(s) }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self { RecordId::Number(n) }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{kind} properties missing externalId")]
    MissingExternalId { kind: RecordKind },
    #[error("{kind} properties are not a JSON object")]
    NotAnObject { kind: RecordKind },
    #[error("serializing {kind} properties: {source}")]
    Serialize {
        kind: RecordKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A record of one kind together with its full desired properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreObject {
    kind: RecordKind,
    external_id: String,
    properties: Properties,
}

impl CoreObject {
    /// Fails unless `properties` carries a non-empty string `externalId`.
    pub fn new(kind: RecordKind, properties: Properties) -> Result<Self, CoreError> {
        let external_id = properties
            .get(EXTERNAL_ID)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
            .ok_or(CoreError::MissingExternalId { kind })?;
        Ok(Self { kind, external_id, properties })
    }

    pub fn kind(&self) -> RecordKind { self.kind }
    pub fn external_id(&self) -> &str { &self.external_id }
    pub fn properties(&self) -> &Properties { &self.properties }
    pub fn into_properties(self) -> Properties { self.properties }
}

/// Typed record properties that know their kind and can be flattened into a
/// [`CoreObject`].
pub trait Record: Serialize {
    const KIND: RecordKind;

    fn to_core(&self) -> Result<CoreObject, CoreError> {
        let kind = Self::KIND;
        let value = serde_json::to_value(self).map_err(|source| CoreError::Serialize { kind, source })?;
        match value {
            Value::Object(map) => CoreObject::new(kind, map),
            _ => Err(CoreError::NotAnObject { kind }),
        }
    }
}

/// One differing key between desired and remote state. `before` is `None`
/// when the remote record lacks the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub key: String,
    pub before: Option<Value>,
    pub after: Value,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.before {
            Some(b) => write!(f, "{}: {} -> {}", self.key, b, self.after),
            None => write!(f, "{}: null -> {}", self.key, self.after),
        }
    }
}

pub mod prelude {
    pub use super::{CoreObject, FieldDiff, Properties, Record, RecordId, RecordKind, EXTERNAL_ID, ID};
}
