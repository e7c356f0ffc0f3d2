use std::fmt;

use epgsync_apply::{Decision, Outcome};
use epgsync_core::RecordKind;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl KindCounts {
    pub fn total(&self) -> usize { self.created + self.updated + self.unchanged }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventFailure {
    /// Position of the event in the feed document.
    pub index: usize,
    pub reference: Option<String>,
    pub error: String,
}

/// What one import run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub channel: String,
    pub station: String,
    pub events: usize,
    pub imported: usize,
    pub skipped_stale: usize,
    pub failed: usize,
    pub collections: KindCounts,
    pub videos: KindCounts,
    pub slots: KindCounts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<EventFailure>,
}

impl ImportReport {
    pub fn new(channel: &str, station: &str) -> Self {
        Self { channel: channel.to_string(), station: station.to_string(), ..Default::default() }
    }

    pub fn counts(&self, kind: RecordKind) -> &KindCounts {
        match kind {
            RecordKind::Collection => &self.collections,
            RecordKind::Video => &self.videos,
            RecordKind::Slot => &self.slots,
        }
    }

    pub fn record(&mut self, outcome: &Outcome) {
        let counts = match outcome.kind {
            RecordKind::Collection => &mut self.collections,
            RecordKind::Video => &mut self.videos,
            RecordKind::Slot => &mut self.slots,
        };
        match outcome.decision {
            Decision::Created => counts.created += 1,
            Decision::Updated { .. } => counts.updated += 1,
            Decision::Unchanged => counts.unchanged += 1,
        }
    }

    /// Number of create and update calls issued.
    pub fn mutations(&self) -> usize {
        RecordKind::ALL.iter().map(|k| self.counts(*k)).map(|c| c.created + c.updated).sum()
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "channel {} ({})", self.channel, self.station)?;
        writeln!(
            f,
            "events: {} imported, {} stale, {} failed (of {})",
            self.imported, self.skipped_stale, self.failed, self.events
        )?;
        for kind in RecordKind::ALL {
            let c = self.counts(kind);
            writeln!(f, "{:<12} +{} ~{} ={}", kind.plural(), c.created, c.updated, c.unchanged)?;
        }
        for fail in &self.failures {
            writeln!(f, "  #{} {}: {}", fail.index, fail.reference.as_deref().unwrap_or("-"), fail.error)?;
        }
        Ok(())
    }
}
