//! In-memory catalog for tests. Records every call so tests
//! can assert which mutations were issued.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use epgsync_core::{Properties, RecordId, RecordKind, EXTERNAL_ID, ID};
use uuid::Uuid;

use crate::{Catalog, CatalogError, CatalogResult, RemoteRecord, Stream, UpdateOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOp {
    Fetch,
    Create,
    Update,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: CallOp,
    pub kind: Option<RecordKind>,
    /// External id for fetch/create, record id for update, channel for stream.
    pub key: String,
    pub vodify: bool,
}

#[derive(Default)]
struct State {
    records: BTreeMap<(RecordKind, String), RemoteRecord>,
    streams: HashMap<String, Stream>,
    calls: Vec<Call>,
    fail: HashMap<(CallOp, Option<RecordKind>), String>,
}

#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the primary stream for a channel.
    pub fn with_stream(self, channel_id: &str, stream_id: &str) -> Self {
        self.lock().streams.insert(
            channel_id.to_string(),
            Stream { id: RecordId::new(stream_id), name: Some(format!("{} primary", channel_id)) },
        );
        self
    }

    /// Seed a remote record. `fields` must carry `externalId`; an `id` is
    /// assigned when missing.
    pub fn seed(&self, kind: RecordKind, mut fields: Properties) -> RecordId {
        let id = fields.get(ID).and_then(RecordId::from_json).unwrap_or_else(new_id);
        fields.insert(ID.to_string(), id.to_json());
        let ext = fields.get(EXTERNAL_ID).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        self.lock().records.insert((kind, ext), RemoteRecord { id: id.clone(), fields });
        id
    }

    /// Make every subsequent `op` on `kind` fail with a transport error.
    pub fn fail_on(&self, op: CallOp, kind: Option<RecordKind>, message: &str) {
        self.lock().fail.insert((op, kind), message.to_string());
    }

    pub fn get(&self, kind: RecordKind, external_id: &str) -> Option<RemoteRecord> {
        self.lock().records.get(&(kind, external_id.to_string())).cloned()
    }

    pub fn len(&self, kind: RecordKind) -> usize {
        self.lock().records.keys().filter(|(k, _)| *k == kind).count()
    }

    pub fn calls(&self) -> Vec<Call> { self.lock().calls.clone() }

    pub fn count(&self, op: CallOp, kind: RecordKind) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op && c.kind == Some(kind)).count()
    }

    /// Number of create plus update calls across all kinds.
    pub fn mutations(&self) -> usize {
        self.lock().calls.iter().filter(|c| matches!(c.op, CallOp::Create | CallOp::Update)).count()
    }

    pub fn clear_calls(&self) { self.lock().calls.clear(); }

    fn record(st: &mut State, op: CallOp, kind: Option<RecordKind>, key: &str, vodify: bool) -> CatalogResult<()> {
        st.calls.push(Call { op, kind, key: key.to_string(), vodify });
        match st.fail.get(&(op, kind)) {
            Some(msg) => Err(CatalogError::Transport(msg.clone())),
            None => Ok(()),
        }
    }
}

fn new_id() -> RecordId { RecordId::new(Uuid::new_v4().simple().to_string()) }

#[async_trait::async_trait]
impl Catalog for InMemoryCatalog {
    async fn fetch_by_external_id(&self, kind: RecordKind, external_id: &str) -> CatalogResult<Option<RemoteRecord>> {
        let mut st = self.lock();
        Self::record(&mut st, CallOp::Fetch, Some(kind), external_id, false)?;
        Ok(st.records.get(&(kind, external_id.to_string())).cloned())
    }

    async fn create(&self, kind: RecordKind, properties: &Properties) -> CatalogResult<RemoteRecord> {
        let ext = properties
            .get(EXTERNAL_ID)
            .and_then(|v| v.as_str())
            .ok_or_else(|| CatalogError::Validation {
                op: "create",
                kind: kind.to_string(),
                status: 422,
                body: "externalId required".into(),
            })?
            .to_string();
        let mut st = self.lock();
        Self::record(&mut st, CallOp::Create, Some(kind), &ext, false)?;
        if st.records.contains_key(&(kind, ext.clone())) {
            return Err(CatalogError::Validation {
                op: "create",
                kind: kind.to_string(),
                status: 422,
                body: format!("externalId {} already exists", ext),
            });
        }
        let id = new_id();
        let mut fields = properties.clone();
        fields.insert(ID.to_string(), id.to_json());
        let rec = RemoteRecord { id, fields };
        st.records.insert((kind, ext), rec.clone());
        Ok(rec)
    }

    async fn update(
        &self,
        kind: RecordKind,
        id: &RecordId,
        properties: &Properties,
        opts: UpdateOptions,
    ) -> CatalogResult<RemoteRecord> {
        let mut st = self.lock();
        Self::record(&mut st, CallOp::Update, Some(kind), &id.to_string(), opts.vodify)?;
        let rec = st
            .records
            .iter_mut()
            .find(|((k, _), r)| *k == kind && &r.id == id)
            .map(|(_, r)| r)
            .ok_or_else(|| CatalogError::Status {
                op: "update",
                kind: kind.to_string(),
                status: 404,
                body: format!("no {} with id {}", kind, id),
            })?;
        // PATCH semantics: top-level keys replace, others stay.
        for (k, v) in properties.iter() {
            rec.fields.insert(k.clone(), v.clone());
        }
        Ok(rec.clone())
    }

    async fn fetch_primary_stream(&self, channel_id: &str) -> CatalogResult<Option<Stream>> {
        let mut st = self.lock();
        Self::record(&mut st, CallOp::Stream, None, channel_id, false)?;
        Ok(st.streams.get(channel_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value as Json};

    fn props(v: Json) -> Properties { v.as_object().cloned().unwrap() }

    #[tokio::test]
    async fn create_then_fetch_roundtrips_through_external_id() {
        let cat = InMemoryCatalog::new();
        assert!(cat.fetch_by_external_id(RecordKind::Video, "v-1").await.unwrap().is_none());
        let rec = cat.create(RecordKind::Video, &props(json!({ "externalId": "v-1", "title": "T" }))).await.unwrap();
        let got = cat.fetch_by_external_id(RecordKind::Video, "v-1").await.unwrap().unwrap();
        assert_eq!(got.id, rec.id);
        assert_eq!(got.fields.get("title"), Some(&json!("T")));
        assert_eq!(cat.count(CallOp::Create, RecordKind::Video), 1);
        assert_eq!(cat.count(CallOp::Fetch, RecordKind::Video), 2);
    }

    #[tokio::test]
    async fn update_patches_top_level_keys() {
        let cat = InMemoryCatalog::new();
        let id = cat.seed(RecordKind::Slot, props(json!({ "externalId": "s-1", "a": 1, "b": 2 })));
        let rec = cat
            .update(RecordKind::Slot, &id, &props(json!({ "id": id.to_json(), "b": 3 })), UpdateOptions { vodify: true })
            .await
            .unwrap();
        assert_eq!(rec.fields.get("a"), Some(&json!(1)));
        assert_eq!(rec.fields.get("b"), Some(&json!(3)));
        assert!(cat.calls().iter().any(|c| c.op == CallOp::Update && c.vodify));
    }

    #[tokio::test]
    async fn injected_failures_surface_as_transport_errors() {
        let cat = InMemoryCatalog::new().with_stream("ch", "st");
        cat.fail_on(CallOp::Stream, None, "boom");
        let err = cat.fetch_primary_stream("ch").await.unwrap_err();
        assert!(matches!(err, CatalogError::Transport(ref m) if m == "boom"));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let cat = InMemoryCatalog::new();
        cat.seed(RecordKind::Collection, props(json!({ "externalId": "c" })));
        let err = cat.create(RecordKind::Collection, &props(json!({ "externalId": "c" }))).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation { status: 422, .. }));
    }
}
