//! Typed properties per record kind.
//!
//! Field names follow the catalog's camelCase wire names. Optional fields that
//! are `None` are left out of the property bag entirely, and unknown fields
//! survive in the flattened `extra` map.

use serde::{Deserialize, Serialize};

use crate::{Properties, Record, RecordId, RecordKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Episode,
    Movie,
    News,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    Live,
    Premiere,
    Regular,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionProps {
    pub external_id: String,
    #[serde(rename = "type")]
    pub collection_type: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Properties,
}

impl CollectionProps {
    pub fn series(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            collection_type: "series".to_string(),
            name: name.into(),
            extra: Properties::new(),
        }
    }
}

impl Record for CollectionProps {
    const KIND: RecordKind = RecordKind::Collection;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_number: Option<u32>,
    /// RFC 3339 air date, news items only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: Properties,
}

impl VideoMetadata {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.episode_number.is_none()
            && self.season_number.is_none()
            && self.date.is_none()
            && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProps {
    pub external_id: String,
    pub source_type: String,
    pub content_type: ContentType,
    pub title: String,
    /// Always sent; `null` detaches the video from a collection it was
    /// filed under before.
    pub collection_id: Option<RecordId>,
    pub published: bool,
    pub allow_moments: bool,
    pub playback_countries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playable_until: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VideoMetadata>,
    #[serde(flatten)]
    pub extra: Properties,
}

impl Record for VideoProps {
    const KIND: RecordKind = RecordKind::Video;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotMetadata {
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<u64>,
    #[serde(flatten)]
    pub extra: Properties,
}

impl SlotMetadata {
    pub fn is_empty(&self) -> bool { self.estimated_duration.is_none() && self.extra.is_empty() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotProps {
    pub external_id: String,
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SlotMetadata>,
    pub video_id: RecordId,
    pub stream_id: RecordId,
    #[serde(flatten)]
    pub extra: Properties,
}

impl Record for SlotProps {
    const KIND: RecordKind = RecordKind::Slot;
}
