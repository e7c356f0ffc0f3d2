//! epgsync import driver.
//!
//! Resolves the channel's primary stream once, then walks the feed events in
//! document order: normalize, then upsert collection, video and slot, wiring
//! each record's catalog id into the next. Data problems in one event are
//! logged and skipped; catalog failures end the run.

#![forbid(unsafe_code)]

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use epgsync_apply::{reconcile, ApplyError, ReconcileOptions};
use epgsync_catalog::{Catalog, CatalogError};
use epgsync_core::{CoreError, Record, RecordId};
use epgsync_feed::{FeedEvent, FeedKind, FeedLayout};
use epgsync_normalize::{is_stale, normalize, NormalizeContext, NormalizeError, NormalizedEvent, StationTables};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

mod report;

pub use report::{EventFailure, ImportReport, KindCounts};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("no primary stream for channel {channel}")]
    NoPrimaryStream { channel: String },
    #[error("resolving stream for channel {channel}: {source}")]
    Stream {
        channel: String,
        #[source]
        source: CatalogError,
    },
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Record(#[from] CoreError),
}

/// Caller-provided run settings.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub channel: String,
    pub station: String,
    pub feed: FeedKind,
    pub tables: StationTables,
    pub now: DateTime<Utc>,
    pub max_age: Duration,
    /// Force an update (vodify) on every video, changed or not.
    pub vodify: bool,
}

impl RunSettings {
    pub fn new(channel: impl Into<String>, station: impl Into<String>, feed: FeedKind) -> Self {
        Self {
            channel: channel.into(),
            station: station.into(),
            feed,
            tables: StationTables::default(),
            now: Utc::now(),
            max_age: Duration::hours(24),
            vodify: false,
        }
    }
}

/// Settings plus the resolved stream. Never changes once built.
#[derive(Debug, Clone)]
pub struct RunContext {
    settings: RunSettings,
    layout: FeedLayout,
    stream_id: RecordId,
}

impl RunContext {
    pub fn new(settings: RunSettings, stream_id: RecordId) -> Self {
        let layout = settings.feed.layout();
        Self { settings, layout, stream_id }
    }

    /// Resolve the channel's primary stream and build the context.
    pub async fn resolve<C: Catalog + ?Sized>(catalog: &C, settings: RunSettings) -> Result<Self, ImportError> {
        let stream_id = resolve_stream(catalog, &settings.channel).await?;
        Ok(Self::new(settings, stream_id))
    }

    pub fn channel(&self) -> &str { &self.settings.channel }
    pub fn station(&self) -> &str { &self.settings.station }
    pub fn stream_id(&self) -> &RecordId { &self.stream_id }
    pub fn layout(&self) -> &FeedLayout { &self.layout }
    pub fn tables(&self) -> &StationTables { &self.settings.tables }
    pub fn now(&self) -> DateTime<Utc> { self.settings.now }
    pub fn max_age(&self) -> Duration { self.settings.max_age }
    pub fn vodify(&self) -> bool { self.settings.vodify }

    fn normalize_context(&self) -> NormalizeContext<'_> {
        NormalizeContext { station: &self.settings.station, tables: &self.settings.tables, layout: &self.layout }
    }
}

pub async fn resolve_stream<C: Catalog + ?Sized>(catalog: &C, channel: &str) -> Result<RecordId, ImportError> {
    let stream = catalog
        .fetch_primary_stream(channel)
        .await
        .map_err(|source| ImportError::Stream { channel: channel.to_string(), source })?;
    match stream {
        Some(s) => {
            info!(channel = %channel, stream_id = %s.id, "import: primary stream resolved");
            Ok(s.id)
        }
        None => Err(ImportError::NoPrimaryStream { channel: channel.to_string() }),
    }
}

pub struct Importer<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    ctx: &'a RunContext,
}

impl<'a, C: Catalog + ?Sized> Importer<'a, C> {
    pub fn new(catalog: &'a C, ctx: &'a RunContext) -> Self { Self { catalog, ctx } }

    /// Import every event. Returns the first catalog error; records written
    /// before it stay written.
    pub async fn run(&self, events: &[FeedEvent]) -> Result<ImportReport, ImportError> {
        let t0 = Instant::now();
        let mut report = ImportReport::new(self.ctx.channel(), self.ctx.station());
        info!(
            channel = %self.ctx.channel(),
            station = %self.ctx.station(),
            events = events.len(),
            vodify = self.ctx.vodify(),
            "import: start"
        );

        for (index, ev) in events.iter().enumerate() {
            report.events += 1;
            let normalized = match normalize(ev, &self.ctx.normalize_context()) {
                Ok(n) => n,
                Err(err) => {
                    self.skip_failed(&mut report, index, ev, err);
                    continue;
                }
            };
            if is_stale(&normalized.start_time, &self.ctx.now(), self.ctx.max_age()) {
                debug!(reference = %normalized.video.external_id, start = %normalized.slot.start_time, "import: stale event skipped");
                counter!("import_events_total", 1, "result" => "stale");
                report.skipped_stale += 1;
                continue;
            }
            self.import_event(normalized, &mut report).await?;
            counter!("import_events_total", 1, "result" => "imported");
            report.imported += 1;
        }

        histogram!("import_run_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(
            imported = report.imported,
            stale = report.skipped_stale,
            failed = report.failed,
            "import: done"
        );
        Ok(report)
    }

    fn skip_failed(&self, report: &mut ImportReport, index: usize, ev: &FeedEvent, err: NormalizeError) {
        let layout = self.ctx.layout();
        let reference = ev.child_attr(layout.reference, layout.value_attr).map(str::to_string);
        warn!(index, reference = ?reference, error = %err, "import: event skipped");
        counter!("import_events_total", 1, "result" => "failed");
        report.failed += 1;
        report.failures.push(EventFailure { index, reference, error: err.to_string() });
    }

    /// Upsert one event's records in dependency order.
    pub async fn import_event(&self, event: NormalizedEvent, report: &mut ImportReport) -> Result<(), ImportError> {
        let NormalizedEvent { collection, mut video, slot, .. } = event;

        if let Some(collection) = collection {
            let obj = collection.to_core()?;
            let out = reconcile(self.catalog, &obj, ReconcileOptions::default()).await?;
            report.record(&out);
            video.collection_id = Some(out.id);
        }

        let obj = video.to_core()?;
        let out = reconcile(self.catalog, &obj, ReconcileOptions { force: self.ctx.vodify() }).await?;
        report.record(&out);

        let slot = slot.into_props(out.id, self.ctx.stream_id().clone());
        let obj = slot.to_core()?;
        let out = reconcile(self.catalog, &obj, ReconcileOptions::default()).await?;
        report.record(&out);
        Ok(())
    }
}
