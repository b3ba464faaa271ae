//! Data models shared by every stage of the telemetry pipeline.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

// ---

/// Declared format of an uploaded export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Tabular,
}

impl ExportFormat {
    /// Parse a caller-supplied format name. `xlsx` and `excel` are accepted
    /// as aliases for tabular input.
    pub fn parse(name: &str) -> Option<Self> {
        // ---
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "tabular" | "xlsx" | "excel" => Some(ExportFormat::Tabular),
            _ => None,
        }
    }
}

/// The uploaded artifact. Lives only for the duration of one ingestion call.
#[derive(Debug, Clone, Copy)]
pub struct RawExport<'a> {
    pub bytes: &'a [u8],
    pub format: ExportFormat,
}

/// Layout of an export, decided once per [`RawExport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportShape {
    /// `[{"topic", "createAt", "payload"}, ...]`
    FlatMessageArray,
    /// `{"messages": [...]}`
    WrappedMessages,
    /// `[{"messages": [...]}, ...]`
    ArrayOfWrappedExports,
    /// Workbook with a sensor sheet and an optional alert sheet.
    TabularSheet {
        data_sheet: usize,
        alert_sheet: Option<usize>,
    },
}

// ---

/// The three sensor channels carried by a kiln export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorField {
    Temperature,
    Moisture,
    Co2,
}

impl SensorField {
    pub const ALL: [SensorField; 3] = [
        SensorField::Temperature,
        SensorField::Moisture,
        SensorField::Co2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SensorField::Temperature => "temperature",
            SensorField::Moisture => "moisture",
            SensorField::Co2 => "co2",
        }
    }

    /// Reading of this channel on `record`, if present.
    pub fn value_of(self, record: &CanonicalRecord) -> Option<f64> {
        match self {
            SensorField::Temperature => record.temperature,
            SensorField::Moisture => record.moisture,
            SensorField::Co2 => record.co2,
        }
    }

    pub(crate) fn slot(self, record: &mut CanonicalRecord) -> &mut Option<f64> {
        match self {
            SensorField::Temperature => &mut record.temperature,
            SensorField::Moisture => &mut record.moisture,
            SensorField::Co2 => &mut record.co2,
        }
    }
}

impl fmt::Display for SensorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Alert already recorded by the exporter, carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertAnnotation {
    pub kind: String,
    pub value: f64,
}

/// One normalized observation.
///
/// `timestamp` is always valid. Sensor channels may be individually absent;
/// absence is never encoded as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    // ---
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub moisture: Option<f64>,
    pub co2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertAnnotation>,
}

impl CanonicalRecord {
    /// Record at `timestamp` with every channel absent.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        CanonicalRecord {
            timestamp,
            temperature: None,
            moisture: None,
            co2: None,
            alert: None,
        }
    }
}

// ---

/// Time-ordered sequence of records.
///
/// The only way to build one is through a stable sort on timestamp, so the
/// sequence is always non-decreasing and ties keep their input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SeriesTable {
    records: Vec<CanonicalRecord>,
}

impl SeriesTable {
    // ---
    pub fn from_unsorted(mut records: Vec<CanonicalRecord>) -> Self {
        // ---
        records.sort_by_key(|r| r.timestamp);
        SeriesTable { records }
    }

    /// Build from records already known to be ordered, such as a filtered
    /// slice of another table.
    pub(crate) fn from_sorted(records: Vec<CanonicalRecord>) -> Self {
        debug_assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        SeriesTable { records }
    }

    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CanonicalRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&CanonicalRecord> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&CanonicalRecord> {
        self.records.last()
    }

    /// Distance between the first and last timestamp.
    pub fn span(&self) -> Duration {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => Duration::zero(),
        }
    }

    pub fn into_records(self) -> Vec<CanonicalRecord> {
        self.records
    }
}

impl<'a> IntoIterator for &'a SeriesTable {
    type Item = &'a CanonicalRecord;
    type IntoIter = std::slice::Iter<'a, CanonicalRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ---

/// Trailing time range `[now - duration, now]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub now: DateTime<Utc>,
    #[serde(serialize_with = "serialize_minutes", rename = "minutes")]
    pub duration: Duration,
}

fn serialize_minutes<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(duration.num_minutes())
}

impl TimeWindow {
    /// Window ending at an explicit instant.
    pub fn ending_at(now: DateTime<Utc>, window_minutes: u32) -> Self {
        TimeWindow {
            now,
            duration: Duration::minutes(i64::from(window_minutes)),
        }
    }

    /// Window ending at the latest record of `series`.
    ///
    /// Returns `None` for an empty series.
    pub fn trailing(series: &SeriesTable, window_minutes: u32) -> Option<Self> {
        series
            .last()
            .map(|last| Self::ending_at(last.timestamp, window_minutes))
    }

    /// Earliest instant inside the window, clamped at the calendar minimum.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.now
            .checked_sub_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.cutoff() && timestamp <= self.now
    }

    pub fn minutes(&self) -> i64 {
        self.duration.num_minutes()
    }
}

// ---

/// Most recent present value of each channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatestReadings {
    pub temperature: Option<f64>,
    pub moisture: Option<f64>,
    pub co2: Option<f64>,
}

/// Aggregates over present values only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Aggregates {
    pub max_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub mean_moisture: Option<f64>,
    pub mean_co2: Option<f64>,
}

/// Dashboard KPIs for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct KpiSnapshot {
    pub latest: LatestReadings,
    pub aggregates: Aggregates,
    /// Records in the window carrying a source alert annotation.
    pub alert_count: usize,
    pub record_count: usize,
}

// ---

/// Where an [`AlertEvent`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertOrigin {
    /// Raised by comparing a reading against a caller threshold.
    Threshold,
    /// Passed through from an annotation in the export.
    Source,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub value: f64,
    pub threshold_exceeded: bool,
    pub origin: AlertOrigin,
}
