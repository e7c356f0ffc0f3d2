//! epgsync catalog: the remote content-catalog contract plus HTTP and
//! in-memory implementations.

#![forbid(unsafe_code)]

use epgsync_core::{Properties, RecordId, RecordKind, ID};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

mod http;
mod memory;

pub use http::{Credentials, HttpCatalog};
pub use memory::{Call, CallOp, InMemoryCatalog};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("validation: {op} {kind} rejected ({status}): {body}")]
    Validation { op: &'static str, kind: String, status: u16, body: String },
    #[error("status: {op} {kind} failed ({status}): {body}")]
    Status { op: &'static str, kind: String, status: u16, body: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("config: {0}")]
    Config(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// A record as stored by the catalog. `fields` holds every top-level property
/// the service returned, `id` included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    pub fields: Properties,
}

impl RemoteRecord {
    pub fn from_json(v: Json) -> CatalogResult<Self> {
        match v {
            Json::Object(fields) => {
                let id = fields
                    .get(ID)
                    .and_then(RecordId::from_json)
                    .ok_or_else(|| CatalogError::Decode("record missing id".into()))?;
                Ok(Self { id, fields })
            }
            other => Err(CatalogError::Decode(format!("expected object, got {}", type_name(&other)))),
        }
    }
}

/// A channel's output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: RecordId,
    #[serde(default)]
    pub name: Option<String>,
}

impl Stream {
    pub fn from_json(v: Json) -> CatalogResult<Self> {
        let id = v
            .get(ID)
            .and_then(RecordId::from_json)
            .ok_or_else(|| CatalogError::Decode("stream missing id".into()))?;
        let name = v.get("name").and_then(|n| n.as_str()).map(|s| s.to_string());
        Ok(Self { id, name })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Ask the catalog to republish the record as video-on-demand.
    pub vodify: bool,
}

/// Remote catalog surface. Not-found is `Ok(None)`; everything else that goes
/// wrong is a [`CatalogError`].
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    async fn fetch_by_external_id(&self, kind: RecordKind, external_id: &str) -> CatalogResult<Option<RemoteRecord>>;

    async fn create(&self, kind: RecordKind, properties: &Properties) -> CatalogResult<RemoteRecord>;

    /// `properties` already carries the record `id`.
    async fn update(
        &self,
        kind: RecordKind,
        id: &RecordId,
        properties: &Properties,
        opts: UpdateOptions,
    ) -> CatalogResult<RemoteRecord>;

    async fn fetch_primary_stream(&self, channel_id: &str) -> CatalogResult<Option<Stream>>;
}

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Pull the first record out of a list response. Accepts a bare array or an
/// object wrapping the array under `data`, `items` or `results`.
pub(crate) fn first_of_list(v: Json) -> CatalogResult<Option<Json>> {
    let arr = match v {
        Json::Array(a) => a,
        Json::Object(mut obj) => {
            let inner = ["data", "items", "results"].iter().find_map(|k| obj.remove(*k));
            match inner {
                Some(Json::Array(a)) => a,
                Some(Json::Null) | None => Vec::new(),
                Some(other) => return Err(CatalogError::Decode(format!("list field is {}", type_name(&other)))),
            }
        }
        Json::Null => Vec::new(),
        other => return Err(CatalogError::Decode(format!("expected list, got {}", type_name(&other)))),
    };
    Ok(arr.into_iter().next())
}
