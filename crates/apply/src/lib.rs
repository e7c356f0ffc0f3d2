//! epgsync apply: upsert one record against the catalog.
//!
//! `reconcile` looks the record up by external id, creates it when absent,
//! otherwise diffs the desired properties against the stored ones and only
//! issues an update when something drifted (or the caller forces one).

#![forbid(unsafe_code)]

use std::time::Instant;

use epgsync_catalog::{Catalog, CatalogError, UpdateOptions};
use epgsync_core::{CoreObject, FieldDiff, Properties, RecordId, RecordKind, ID};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smallvec::SmallVec;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Update even when nothing differs; the update is sent as a vodify call.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize }

/// Differing keys of one record; rarely more than a handful.
pub type Diff = SmallVec<[FieldDiff; 8]>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    Created,
    Updated { diff: Diff, forced: bool },
    Unchanged,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Created => "created",
            Decision::Updated { .. } => "updated",
            Decision::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub kind: RecordKind,
    pub external_id: String,
    pub id: RecordId,
    pub decision: Decision,
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("{op} {kind} {external_id}: {source}")]
    Catalog {
        op: &'static str,
        kind: RecordKind,
        external_id: String,
        #[source]
        source: CatalogError,
    },
}

impl ApplyError {
    fn catalog<'a>(op: &'static str, obj: &'a CoreObject) -> impl FnOnce(CatalogError) -> ApplyError + 'a {
        move |source| {
            counter!("reconcile_errors_total", 1, "kind" => obj.kind().as_str(), "op" => op);
            ApplyError::Catalog { op, kind: obj.kind(), external_id: obj.external_id().to_string(), source }
        }
    }
}

/// Upsert `object`: create when missing, update when drifted or forced,
/// otherwise leave the remote record alone.
pub async fn reconcile<C>(catalog: &C, object: &CoreObject, opts: ReconcileOptions) -> Result<Outcome, ApplyError>
where
    C: Catalog + ?Sized,
{
    let t0 = Instant::now();
    let kind = object.kind();
    let external_id = object.external_id();

    let existing = catalog
        .fetch_by_external_id(kind, external_id)
        .await
        .map_err(ApplyError::catalog("fetch", object))?;

    let (id, decision) = match existing {
        None => {
            info!(kind = %kind, external_id = %external_id, "reconcile: creating");
            debug!(kind = %kind, properties = %Json::Object(object.properties().clone()), "reconcile: create payload");
            let created = catalog
                .create(kind, object.properties())
                .await
                .map_err(ApplyError::catalog("create", object))?;
            (created.id, Decision::Created)
        }
        Some(remote) => {
            let desired = merge_with_remote(kind, object.properties(), &remote.fields);
            let diff = diff_properties(&desired, &remote.fields);
            if diff.is_empty() && !opts.force {
                info!(kind = %kind, external_id = %external_id, id = %remote.id, "reconcile: unchanged");
                (remote.id, Decision::Unchanged)
            } else {
                if opts.force {
                    info!(kind = %kind, external_id = %external_id, "reconcile: forced update (vodify)");
                }
                let summary = summarize(&diff);
                info!(
                    kind = %kind,
                    external_id = %external_id,
                    id = %remote.id,
                    adds = summary.adds,
                    updates = summary.updates,
                    "reconcile: updating"
                );
                for d in diff.iter() {
                    debug!(kind = %kind, external_id = %external_id, "reconcile: diff {}", d);
                }
                let mut payload = desired;
                payload.insert(ID.to_string(), remote.id.to_json());
                let updated = catalog
                    .update(kind, &remote.id, &payload, UpdateOptions { vodify: opts.force })
                    .await
                    .map_err(ApplyError::catalog("update", object))?;
                (updated.id, Decision::Updated { diff, forced: opts.force })
            }
        }
    };

    counter!("reconcile_total", 1, "kind" => kind.as_str(), "decision" => decision.as_str());
    histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "kind" => kind.as_str());
    Ok(Outcome { kind, external_id: external_id.to_string(), id, decision })
}

/// Compare every desired key with the remote value; keys missing remotely
/// diff against a null baseline. Result is ordered by key.
pub fn diff_properties(desired: &Properties, remote: &Properties) -> Diff {
    let mut out = Diff::new();
    for (k, after) in desired.iter() {
        let before = remote.get(k);
        if before.unwrap_or(&Json::Null) == after { continue; }
        out.push(FieldDiff { key: k.clone(), before: before.cloned(), after: after.clone() });
    }
    out.sort_by(|a, b| a.key.cmp(&b.key));
    out
}

/// Desired properties with the kind's merged fields overlaid onto whatever
/// the remote record already stores under the same key.
pub fn merge_with_remote(kind: RecordKind, desired: &Properties, remote: &Properties) -> Properties {
    let mut out = desired.clone();
    for field in kind.merged_fields() {
        if let (Some(top), Some(base)) = (desired.get(*field), remote.get(*field)) {
            out.insert((*field).to_string(), overlay(base, top));
        }
    }
    out
}

/// Overlay `top` onto `base`. Objects merge key by key (recursively); any
/// other combination takes `top`.
pub fn overlay(base: &Json, top: &Json) -> Json {
    match (base, top) {
        (Json::Object(b), Json::Object(t)) => {
            let mut merged = b.clone();
            for (k, tv) in t.iter() {
                let next = match merged.get(k) {
                    Some(bv) => overlay(bv, tv),
                    None => tv.clone(),
                };
                merged.insert(k.clone(), next);
            }
            Json::Object(merged)
        }
        (_, t) => t.clone(),
    }
}

pub fn summarize(diff: &[FieldDiff]) -> DiffSummary {
    let adds = diff.iter().filter(|d| d.before.is_none()).count();
    DiffSummary { adds, updates: diff.len() - adds }
}
