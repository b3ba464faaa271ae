//! The two public entry points: `ingest` (bytes → series) and `query`
//! (series → window, KPIs, alerts).
//!
//! Both are synchronous and request-scoped. Nothing is cached between calls,
//! so concurrent uploads never share mutable state.

use serde::Serialize;
use tracing::{debug, info};

use crate::analysis::{evaluate, filter_and_aggregate, Thresholds};
use crate::ingest::{detect, normalize, resolve, IngestOptions, SkipReport};
use crate::{
    AlertEvent, ExportFormat, ExportShape, IngestError, KpiSnapshot, QueryError, RawExport,
    SeriesTable, TimeWindow,
};

// ---

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingestion {
    pub shape: ExportShape,
    pub series: SeriesTable,
    pub skipped: SkipReport,
}

/// Result of a successful query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub window: TimeWindow,
    pub kpis: KpiSnapshot,
    pub series: SeriesTable,
    pub alerts: Vec<AlertEvent>,
}

/// Ingest an upload with default options.
pub fn ingest(bytes: &[u8], format: ExportFormat) -> Result<SeriesTable, IngestError> {
    ingest_with(bytes, format, &IngestOptions::default()).map(|ingestion| ingestion.series)
}

/// Detect, resolve and normalize an upload.
///
/// Per-record failures are absorbed and counted in
/// [`Ingestion::skipped`]; only export-level problems are errors.
pub fn ingest_with(
    bytes: &[u8],
    format: ExportFormat,
    options: &IngestOptions,
) -> Result<Ingestion, IngestError> {
    // ---
    let raw = RawExport { bytes, format };
    debug!("Ingesting {} bytes as {:?}", bytes.len(), format);

    let (shape, document) = detect(&raw)?;
    let field_map = resolve(&shape, &document)?;
    let normalized = normalize(&document, &shape, &field_map, options);

    if normalized.series.is_empty() {
        return Err(IngestError::NoValidRecords {
            skipped: normalized.skipped,
        });
    }

    info!(
        "Ingested {} records from {:?} export, {} skipped",
        normalized.series.len(),
        shape,
        normalized.skipped.total()
    );
    Ok(Ingestion {
        shape,
        series: normalized.series,
        skipped: normalized.skipped,
    })
}

/// Filter `series` to the trailing `window_minutes` ending at its latest
/// record, then aggregate and evaluate alerts.
pub fn query(
    series: &SeriesTable,
    window_minutes: u32,
    thresholds: &Thresholds,
) -> Result<QueryResult, QueryError> {
    // ---
    let window = TimeWindow::trailing(series, window_minutes).ok_or(QueryError::EmptyWindow {
        window_minutes: i64::from(window_minutes),
    })?;
    query_at(series, &window, thresholds)
}

/// Like [`query`] with an explicit window, e.g. one anchored at wall-clock
/// time instead of the latest record.
pub fn query_at(
    series: &SeriesTable,
    window: &TimeWindow,
    thresholds: &Thresholds,
) -> Result<QueryResult, QueryError> {
    // ---
    let (filtered, kpis) = filter_and_aggregate(series, window)?;
    let alerts: Vec<AlertEvent> = evaluate(&filtered, thresholds).collect();

    debug!(
        "Query over {} records produced {} alerts",
        filtered.len(),
        alerts.len()
    );
    Ok(QueryResult {
        window: *window,
        kpis,
        series: filtered,
        alerts,
    })
}
