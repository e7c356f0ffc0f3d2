//! epgsync normalize: turn one flat feed event into desired catalog records.
//!
//! Classification, availability window, slot type and per-station overrides
//! all happen here. The output still lacks catalog ids: the video's
//! collection and the slot's video/stream are wired by the importer once the
//! upstream records have been reconciled.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use epgsync_core::{
    CollectionProps, ContentType, Properties, RecordId, SlotMetadata, SlotProps, SlotType, VideoMetadata, VideoProps,
};
use epgsync_feed::{unescape_text, FeedEvent, FeedLayout};
use serde::Serialize;
use tracing::debug;

pub mod tables;
pub mod time;

pub use tables::{StationTables, TablesError, GLOBAL_REGION};
pub use time::{format_instant, is_stale, parse_duration, parse_start_time};

const SOURCE_TYPE: &str = "stream";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("event has no {0}")]
    Missing(&'static str),
    #[error("invalid {field} {value:?}: {reason}")]
    Invalid { field: &'static str, value: String, reason: String },
}

/// Everything normalization needs besides the event itself.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub station: &'a str,
    pub tables: &'a StationTables,
    pub layout: &'a FeedLayout,
}

/// Slot fields known before the video and stream ids are.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotDraft {
    pub external_id: String,
    pub slot_type: SlotType,
    pub start_time: String,
    pub metadata: Option<SlotMetadata>,
    /// External id of the video this slot airs.
    pub video_external_id: String,
}

impl SlotDraft {
    pub fn into_props(self, video_id: RecordId, stream_id: RecordId) -> SlotProps {
        SlotProps {
            external_id: self.external_id,
            slot_type: self.slot_type,
            start_time: self.start_time,
            metadata: self.metadata,
            video_id,
            stream_id,
            extra: Properties::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    #[serde(skip)]
    pub start_time: DateTime<Utc>,
    pub collection: Option<CollectionProps>,
    pub video: VideoProps,
    pub slot: SlotDraft,
}

/// Episode/season pair from the numbering child; absent or blank means none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Numbering {
    episode: Option<u32>,
    season: Option<u32>,
}

impl Numbering {
    fn is_zero(&self) -> bool { self.episode.unwrap_or(0) == 0 && self.season.unwrap_or(0) == 0 }
}

/// Content type plus whether episode numbering is carried into metadata.
pub fn classify(category: Option<&str>, episode: Option<u32>, season: Option<u32>, tables: &StationTables) -> (ContentType, bool) {
    let numbering = Numbering { episode, season };
    match category {
        Some(c) if c == tables.news_category => (ContentType::News, false),
        Some(c) if tables.movie_categories.contains(c) => (ContentType::Movie, false),
        Some(c) if tables.numbered_movie_categories.contains(c) => (ContentType::Movie, true),
        _ if numbering.is_zero() => (ContentType::Movie, false),
        _ => (ContentType::Episode, true),
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> { s.map(str::trim).filter(|s| !s.is_empty()) }

fn text_field(ev: &FeedEvent, name: &str) -> Option<String> {
    non_blank(ev.child_text(name)).map(unescape_text).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn number(raw: Option<&str>, field: &'static str) -> Result<Option<u32>, NormalizeError> {
    match non_blank(raw) {
        None => Ok(None),
        Some(s) => s.parse::<u32>().map(Some).map_err(|e| NormalizeError::Invalid {
            field,
            value: s.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn flag(raw: Option<&str>, truthy: &str) -> bool { non_blank(raw).map(|v| v.eq_ignore_ascii_case(truthy)).unwrap_or(false) }

/// Normalize one feed event into a collection (episodic content only), a
/// video and a slot draft.
pub fn normalize(ev: &FeedEvent, ctx: &NormalizeContext<'_>) -> Result<NormalizedEvent, NormalizeError> {
    let l = ctx.layout;
    let t = ctx.tables;
    let value = |name: &str| non_blank(ev.child_attr(name, l.value_attr));

    let start_raw = non_blank(ev.attr(l.start_time)).ok_or(NormalizeError::Missing("start time"))?;
    let start_time = parse_start_time(start_raw)?;
    let reference = value(l.reference).ok_or(NormalizeError::Missing("reference number"))?;
    let slot_id = value(l.slot_id).ok_or(NormalizeError::Missing("slot id"))?;
    let title = text_field(ev, l.title).ok_or(NormalizeError::Missing("title"))?;
    let series_id = value(l.series_id);
    let category = value(l.category);

    let episode = number(ev.child_attr(l.numbering, l.episode_attr), "episode number")?;
    let season = number(ev.child_attr(l.numbering, l.season_attr), "season number")?;
    let (content_type, numbered) = classify(category, episode, season, t);
    debug!(reference = %reference, category = ?category, content_type = ?content_type, "normalize: classified");

    let collection = match content_type {
        ContentType::Episode => {
            let sid = series_id.ok_or(NormalizeError::Missing("series id"))?;
            let name = text_field(ev, l.original_title).unwrap_or_else(|| title.clone());
            Some(CollectionProps::series(sid, name))
        }
        ContentType::Movie | ContentType::News => None,
    };

    let mut metadata = VideoMetadata { description: text_field(ev, l.description), ..Default::default() };
    if numbered {
        metadata.episode_number = episode;
        metadata.season_number = season.filter(|s| *s > 0);
    }
    if content_type == ContentType::News {
        metadata.date = Some(start_time.to_rfc3339());
    }

    let in_series = |set: &std::collections::BTreeSet<String>| series_id.map(|s| set.contains(s)).unwrap_or(false);
    let global = in_series(&t.global_series) || category.map(|c| t.global_categories.contains(c)).unwrap_or(false);
    let playback_countries =
        if global { vec![GLOBAL_REGION.to_string()] } else { t.default_playback_countries.clone() };
    let allow_moments = !(t.no_moments_stations.contains(ctx.station) || in_series(&t.no_moments_series));
    let published = !in_series(&t.unpublished_series);

    let days = number(value(l.availability_days), "availability days")?.unwrap_or(0);
    let playable_until = match days {
        0 => None,
        d => {
            let until = time::add_days(&start_time, d).ok_or_else(|| NormalizeError::Invalid {
                field: "availability days",
                value: d.to_string(),
                reason: "window ends past the supported calendar".into(),
            })?;
            Some(format_instant(&until))
        }
    };

    let collection_id = match content_type {
        ContentType::Movie => t.movie_collection_for(ctx.station).cloned(),
        _ => None,
    };

    let live = flag(value(l.live), l.flag_true) && !in_series(&t.not_really_live_series);
    let premiere = flag(value(l.premiere), l.flag_true)
        && (metadata.episode_number == Some(1) || content_type == ContentType::Movie);
    let slot_type = if live {
        SlotType::Live
    } else if premiere {
        SlotType::Premiere
    } else {
        SlotType::Regular
    };

    let estimated_duration = match non_blank(ev.attr(l.duration)) {
        Some(d) => Some(parse_duration(d)?),
        None => None,
    };
    let slot_metadata = SlotMetadata { estimated_duration, ..Default::default() };

    let video = VideoProps {
        external_id: reference.to_string(),
        source_type: SOURCE_TYPE.to_string(),
        content_type,
        title,
        collection_id,
        published,
        allow_moments,
        playback_countries,
        playable_until,
        metadata: (!metadata.is_empty()).then_some(metadata),
        extra: Properties::new(),
    };
    let slot = SlotDraft {
        external_id: slot_id.to_string(),
        slot_type,
        start_time: format_instant(&start_time),
        metadata: (!slot_metadata.is_empty()).then_some(slot_metadata),
        video_external_id: reference.to_string(),
    };
    Ok(NormalizedEvent { start_time, collection, video, slot })
}

#[cfg(test)]
mod tests {
    use super::*;
    use epgsync_feed::FeedKind;

    fn base() -> FeedEvent {
        FeedEvent::default()
            .with_attr("starttime", "2024-01-01T00:00:00.000Z")
            .with_attr("duration", "01:30")
            .with_child("recordid_efni", &[("value", "S1")], "")
            .with_child("reference_number", &[("value", "R1")], "")
            .with_child("recid_syning", &[("value", "SL1")], "")
            .with_child("category", &[("value", "LEI")], "")
            .with_child("title", &[], "Heima")
            .with_child("series", &[("episode", "2"), ("series_number", "1")], "")
    }

    fn run(ev: &FeedEvent, station: &str, tables: &StationTables) -> Result<NormalizedEvent, NormalizeError> {
        let layout = FeedKind::Skjarinn.layout();
        normalize(ev, &NormalizeContext { station, tables, layout: &layout })
    }

    fn norm(ev: &FeedEvent) -> NormalizedEvent { run(ev, "skjarinn", &StationTables::default()).unwrap() }

    #[test]
    fn episode_carries_collection_and_numbering() {
        let n = norm(&base());
        assert_eq!(n.video.content_type, ContentType::Episode);
        let c = n.collection.unwrap();
        assert_eq!(c.external_id, "S1");
        assert_eq!(c.name, "Heima");
        let md = n.video.metadata.unwrap();
        assert_eq!(md.episode_number, Some(2));
        assert_eq!(md.season_number, Some(1));
        assert_eq!(n.video.source_type, "stream");
        assert_eq!(n.video.playback_countries, vec!["IS".to_string()]);
        assert!(n.video.published && n.video.allow_moments);
        assert_eq!(n.slot.start_time, "2024-01-01T00:00:00.000Z");
        assert_eq!(n.slot.video_external_id, "R1");
        assert_eq!(n.slot.metadata.unwrap().estimated_duration, Some(5400));
    }

    #[test]
    fn news_drops_numbering_and_stamps_date() {
        let ev = base()
            .with_child("category", &[("value", "FRE")], "")
            .with_child("series", &[("episode", "14"), ("series_number", "3")], "");
        let n = norm(&ev);
        assert_eq!(n.video.content_type, ContentType::News);
        assert!(n.collection.is_none());
        let md = n.video.metadata.unwrap();
        assert_eq!(md.episode_number, None);
        assert_eq!(md.season_number, None);
        assert_eq!(md.date.as_deref(), Some("2024-01-01T00:00:00+00:00"));
    }

    #[test]
    fn movies_by_category_or_zero_numbering() {
        let by_cat = norm(&base().with_child("category", &[("value", "KVI")], ""));
        assert_eq!(by_cat.video.content_type, ContentType::Movie);
        assert!(by_cat.collection.is_none());
        assert!(by_cat.video.metadata.is_none());

        let zeroed = norm(&base().with_child("series", &[("episode", "0"), ("series_number", "0")], ""));
        assert_eq!(zeroed.video.content_type, ContentType::Movie);

        let numbered = norm(&base().with_child("category", &[("value", "MSE")], ""));
        assert_eq!(numbered.video.content_type, ContentType::Movie);
        assert_eq!(numbered.video.metadata.unwrap().episode_number, Some(2));
    }

    #[test]
    fn season_zero_is_left_out() {
        let n = norm(&base().with_child("series", &[("episode", "4"), ("series_number", "0")], ""));
        let md = n.video.metadata.unwrap();
        assert_eq!(md.episode_number, Some(4));
        assert_eq!(md.season_number, None);
    }

    #[test]
    fn collection_prefers_original_title() {
        let n = norm(&base().with_child("org_title", &[], " Homecoming "));
        assert_eq!(n.collection.unwrap().name, "Homecoming");
        let blank = norm(&base().with_child("org_title", &[], "   "));
        assert_eq!(blank.collection.unwrap().name, "Heima");
    }

    #[test]
    fn availability_window_counts_days_from_start() {
        let n = norm(&base().with_child("netdagar", &[("value", "7")], ""));
        assert_eq!(n.video.playable_until.as_deref(), Some("2024-01-08T00:00:00.000Z"));
        let none = norm(&base().with_child("netdagar", &[("value", "0")], ""));
        assert_eq!(none.video.playable_until, None);
    }

    #[test]
    fn oversized_availability_is_an_event_error() {
        let ev = base().with_child("netdagar", &[("value", "4000000000")], "");
        assert!(matches!(
            run(&ev, "s", &StationTables::default()),
            Err(NormalizeError::Invalid { field: "availability days", .. })
        ));
    }

    #[test]
    fn live_wins_over_premiere() {
        let ev = base()
            .with_child("series", &[("episode", "1"), ("series_number", "1")], "")
            .with_child("live", &[("value", "true")], "")
            .with_child("premier", &[("value", "true")], "");
        assert_eq!(norm(&ev).slot.slot_type, SlotType::Live);

        let premiere = ev.clone().with_child("live", &[("value", "false")], "");
        assert_eq!(norm(&premiere).slot.slot_type, SlotType::Premiere);

        // premiere only counts for the first episode
        let later = premiere.with_child("series", &[("episode", "2"), ("series_number", "1")], "");
        assert_eq!(norm(&later).slot.slot_type, SlotType::Regular);
    }

    #[test]
    fn station_tables_override_defaults() {
        let mut t = StationTables::default();
        t.global_series.insert("S1".into());
        t.no_moments_stations.insert("rúv".into());
        t.unpublished_series.insert("S1".into());
        t.not_really_live_series.insert("S1".into());
        t.movie_collections.insert("rúv".into(), RecordId::new("col-m"));

        let ev = base().with_child("live", &[("value", "true")], "");
        let n = run(&ev, "rúv", &t).unwrap();
        assert_eq!(n.video.playback_countries, vec!["GLOBAL".to_string()]);
        assert!(!n.video.allow_moments);
        assert!(!n.video.published);
        assert_eq!(n.slot.slot_type, SlotType::Regular);
        // episodes are filed under their series, not the movie collection
        assert_eq!(n.video.collection_id, None);

        let movie = run(&base().with_child("category", &[("value", "KVI")], ""), "rúv", &t).unwrap();
        assert_eq!(movie.video.collection_id, Some(RecordId::new("col-m")));
    }

    #[test]
    fn missing_or_malformed_fields_are_errors() {
        let mut ev = base();
        ev.children.remove("reference_number");
        assert_eq!(run(&ev, "s", &StationTables::default()), Err(NormalizeError::Missing("reference number")));

        let mut ev = base();
        ev.children.remove("recordid_efni");
        assert_eq!(run(&ev, "s", &StationTables::default()), Err(NormalizeError::Missing("series id")));

        let ev = base().with_child("series", &[("episode", "two")], "");
        assert!(matches!(run(&ev, "s", &StationTables::default()), Err(NormalizeError::Invalid { field: "episode number", .. })));

        let ev = base().with_attr("duration", "90 min");
        assert!(matches!(run(&ev, "s", &StationTables::default()), Err(NormalizeError::Invalid { field: "duration", .. })));
    }

    #[test]
    fn text_fields_are_unescaped_once_more() {
        let ev = base().with_child("description", &[], "Fr&#233;tt &amp;quot;x&amp;quot;");
        let md = norm(&ev).video.metadata.unwrap();
        assert_eq!(md.description.as_deref(), Some("Frétt &quot;x&quot;"));
    }
}
