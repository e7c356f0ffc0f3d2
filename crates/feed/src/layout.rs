//! Field names per feed variant.

use serde::Serialize;

/// Supported feed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Skjarinn,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Skjarinn => "skjarinn",
        }
    }

    pub fn layout(&self) -> FeedLayout {
        match self {
            FeedKind::Skjarinn => FeedLayout {
                event: "event",
                start_time: "starttime",
                duration: "duration",
                series_id: "recordid_efni",
                category: "category",
                title: "title",
                original_title: "org_title",
                reference: "reference_number",
                description: "description",
                numbering: "series",
                episode_attr: "episode",
                season_attr: "series_number",
                availability_days: "netdagar",
                slot_id: "recid_syning",
                live: "live",
                premiere: "premier",
                value_attr: "value",
                flag_true: "true",
            },
        }
    }
}

/// Where each logical field sits in an event. `start_time` and `duration`
/// are attributes of the event element; the rest are child elements whose
/// scalar lives in `value_attr`, except `title`, `original_title` and
/// `description` (text) and `numbering` (`episode_attr`/`season_attr`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedLayout {
    pub event: &'static str,
    pub start_time: &'static str,
    pub duration: &'static str,
    pub series_id: &'static str,
    pub category: &'static str,
    pub title: &'static str,
    pub original_title: &'static str,
    pub reference: &'static str,
    pub description: &'static str,
    pub numbering: &'static str,
    pub episode_attr: &'static str,
    pub season_attr: &'static str,
    pub availability_days: &'static str,
    pub slot_id: &'static str,
    pub live: &'static str,
    pub premiere: &'static str,
    pub value_attr: &'static str,
    pub flag_true: &'static str,
}
