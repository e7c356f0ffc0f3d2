#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use epgsync_catalog::{CallOp, InMemoryCatalog};
use epgsync_core::RecordKind;
use epgsync_feed::{read_events, FeedEvent, FeedKind};
use epgsync_import::{ImportError, Importer, RunContext, RunSettings};
use serde_json::json;

const FIXTURE: &[u8] = include_bytes!("../../feed/tests/data/skjarinn.xml");
const LATIN1_FIXTURE: &[u8] = include_bytes!("../../feed/tests/data/skjarinn-latin1.xml");

fn events() -> Vec<FeedEvent> { read_events(FIXTURE, &FeedKind::Skjarinn.layout()).unwrap() }

fn settings(vodify: bool) -> RunSettings {
    let mut s = RunSettings::new("ch-1", "skjarinn", FeedKind::Skjarinn);
    s.now = DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z").unwrap().with_timezone(&Utc);
    s.vodify = vodify;
    s
}

fn catalog() -> InMemoryCatalog { InMemoryCatalog::new().with_stream("ch-1", "stream-1") }

#[tokio::test]
async fn fixture_imports_in_dependency_order() {
    let cat = catalog();
    let ctx = RunContext::resolve(&cat, settings(false)).await.unwrap();
    let report = Importer::new(&cat, &ctx).run(&events()).await.unwrap();

    assert_eq!(report.events, 5);
    assert_eq!(report.imported, 3);
    assert_eq!(report.skipped_stale, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].index, 3);
    assert_eq!(report.collections.created, 1);
    assert_eq!(report.videos.created, 3);
    assert_eq!(report.slots.created, 3);

    let series = cat.get(RecordKind::Collection, "S100").unwrap();
    assert_eq!(series.fields.get("name"), Some(&json!("Trapped")));

    let episode = cat.get(RecordKind::Video, "R1001").unwrap();
    assert_eq!(episode.fields.get("collectionId"), Some(&series.id.to_json()));
    assert_eq!(episode.fields.get("playableUntil"), Some(&json!("2024-01-08T20:00:00.000Z")));
    assert_eq!(
        episode.fields.get("metadata"),
        Some(&json!({ "description": "Lögreglan rannsakar \"mál\".", "episodeNumber": 1, "seasonNumber": 2 }))
    );

    let slot = cat.get(RecordKind::Slot, "SL5001").unwrap();
    assert_eq!(slot.fields.get("videoId"), Some(&episode.id.to_json()));
    assert_eq!(slot.fields.get("streamId"), Some(&json!("stream-1")));
    assert_eq!(slot.fields.get("type"), Some(&json!("premiere")));
    assert_eq!(slot.fields.get("metadata"), Some(&json!({ "estimatedDuration": 3300 })));

    let news = cat.get(RecordKind::Video, "R2001").unwrap();
    assert_eq!(news.fields.get("contentType"), Some(&json!("news")));
    assert_eq!(news.fields.get("collectionId"), Some(&json!(null)));
    assert_eq!(cat.get(RecordKind::Slot, "SL5002").unwrap().fields.get("type"), Some(&json!("live")));

    let movie = cat.get(RecordKind::Video, "R3001").unwrap();
    assert_eq!(movie.fields.get("contentType"), Some(&json!("movie")));

    // stale and failed events left nothing behind
    assert!(cat.get(RecordKind::Video, "R0999").is_none());
    assert!(cat.get(RecordKind::Slot, "SL5004").is_none());
}

#[tokio::test]
async fn latin1_feed_imports_and_skips_an_oversized_window() {
    let cat = catalog();
    let ctx = RunContext::resolve(&cat, settings(false)).await.unwrap();
    let events = read_events(LATIN1_FIXTURE, &FeedKind::Skjarinn.layout()).unwrap();
    let report = Importer::new(&cat, &ctx).run(&events).await.unwrap();

    assert_eq!(report.events, 3);
    assert_eq!(report.imported, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].index, 2);
    assert_eq!(report.failures[0].reference.as_deref(), Some("L3001"));
    assert!(report.failures[0].error.contains("availability days"), "err={}", report.failures[0].error);

    let episode = cat.get(RecordKind::Video, "L1001").unwrap();
    assert_eq!(episode.fields.get("title"), Some(&json!("Ófærð")));
    let news = cat.get(RecordKind::Video, "L2001").unwrap();
    assert_eq!(news.fields.get("title"), Some(&json!("Fréttir & veður")));
    assert!(cat.get(RecordKind::Video, "L3001").is_none());
    assert!(cat.get(RecordKind::Slot, "LS6003").is_none());
}

#[tokio::test]
async fn numeric_movie_collection_id_is_stable_across_runs() {
    let cat = catalog();
    let mut s = settings(false);
    s.tables = epgsync_normalize::StationTables::from_toml_str("[movie_collections]\nskjarinn = 42\n").unwrap();
    let ctx = RunContext::resolve(&cat, s).await.unwrap();
    Importer::new(&cat, &ctx).run(&events()).await.unwrap();
    let movie = cat.get(RecordKind::Video, "R3001").unwrap();
    assert_eq!(movie.fields.get("collectionId"), Some(&json!(42)));
    cat.clear_calls();

    let report = Importer::new(&cat, &ctx).run(&events()).await.unwrap();
    assert_eq!(report.mutations(), 0);
    assert_eq!(cat.mutations(), 0);
}

#[tokio::test]
async fn rerun_issues_no_mutations() {
    let cat = catalog();
    let ctx = RunContext::resolve(&cat, settings(false)).await.unwrap();
    Importer::new(&cat, &ctx).run(&events()).await.unwrap();
    cat.clear_calls();

    let report = Importer::new(&cat, &ctx).run(&events()).await.unwrap();
    assert_eq!(report.mutations(), 0);
    assert_eq!(cat.mutations(), 0);
    assert_eq!(report.videos.unchanged, 3);
}

#[tokio::test]
async fn vodify_forces_video_updates_only() {
    let cat = catalog();
    let ctx = RunContext::resolve(&cat, settings(false)).await.unwrap();
    Importer::new(&cat, &ctx).run(&events()).await.unwrap();
    cat.clear_calls();

    let ctx = RunContext::resolve(&cat, settings(true)).await.unwrap();
    let report = Importer::new(&cat, &ctx).run(&events()).await.unwrap();
    assert_eq!(report.videos.updated, 3);
    assert_eq!(report.slots.unchanged, 3);
    assert_eq!(cat.count(CallOp::Update, RecordKind::Video), 3);
    assert_eq!(cat.count(CallOp::Update, RecordKind::Slot), 0);
    assert!(cat.calls().iter().filter(|c| c.op == CallOp::Update).all(|c| c.vodify));
}

#[tokio::test]
async fn missing_primary_stream_aborts_before_any_event() {
    let cat = InMemoryCatalog::new();
    let err = RunContext::resolve(&cat, settings(false)).await.unwrap_err();
    assert!(matches!(err, ImportError::NoPrimaryStream { ref channel } if channel == "ch-1"), "err={}", err);
    assert_eq!(cat.mutations(), 0);
}

#[tokio::test]
async fn remote_failure_stops_the_run() {
    let cat = catalog();
    let ctx = RunContext::resolve(&cat, settings(false)).await.unwrap();
    cat.fail_on(CallOp::Create, Some(RecordKind::Video), "connection reset");

    let err = Importer::new(&cat, &ctx).run(&events()).await.unwrap_err();
    assert!(matches!(err, ImportError::Apply(_)), "err={}", err);
    assert!(err.to_string().contains("R1001"), "err={}", err);
    // the collection committed before the failure stays
    assert_eq!(cat.len(RecordKind::Collection), 1);
    assert_eq!(cat.len(RecordKind::Slot), 0);
    assert_eq!(cat.count(CallOp::Fetch, RecordKind::Video), 1);
}
