//! Record normalization.
//!
//! Each raw message or row is decoded independently into a
//! `Result<CanonicalRecord, RecordSkip>`. Failed records are dropped and
//! counted; a record is either kept whole or not at all. The batch itself
//! never fails here: turning an empty result into an error is the caller's
//! decision.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::detect::{decode_payload, messages, Document};
use super::resolve::{AlertSheetMap, FieldKey, FieldMap};
use super::tabular::{Cell, Sheet};
use super::timestamp;
use super::{IngestOptions, SentinelPolicy};
use crate::{AlertAnnotation, CanonicalRecord, ExportShape, SensorField, SeriesTable};

// ---

/// Why a single raw record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSkip {
    /// The timestamp field is missing or empty.
    MissingTimestamp,
    /// The timestamp is present but matches no accepted layout.
    BadTimestamp,
    /// The message is not an object, or its payload is neither an object
    /// nor a JSON string holding one.
    MalformedPayload,
    /// Message published on a topic other than the requested one.
    TopicMismatch,
    /// Alert-sheet row without an alert kind or numeric value.
    MalformedAlert,
}

/// Per-reason counts of dropped records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipReport {
    pub missing_timestamp: usize,
    pub bad_timestamp: usize,
    pub malformed_payload: usize,
    pub topic_mismatch: usize,
    pub malformed_alert: usize,
}

impl SkipReport {
    pub fn record(&mut self, skip: RecordSkip) {
        // ---
        let counter = match skip {
            RecordSkip::MissingTimestamp => &mut self.missing_timestamp,
            RecordSkip::BadTimestamp => &mut self.bad_timestamp,
            RecordSkip::MalformedPayload => &mut self.malformed_payload,
            RecordSkip::TopicMismatch => &mut self.topic_mismatch,
            RecordSkip::MalformedAlert => &mut self.malformed_alert,
        };
        *counter += 1;
    }

    pub fn total(&self) -> usize {
        self.missing_timestamp
            + self.bad_timestamp
            + self.malformed_payload
            + self.topic_mismatch
            + self.malformed_alert
    }
}

impl fmt::Display for SkipReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} skipped: {} missing timestamp, {} bad timestamp, {} malformed payload, \
             {} topic mismatch, {} malformed alert",
            self.total(),
            self.missing_timestamp,
            self.bad_timestamp,
            self.malformed_payload,
            self.topic_mismatch,
            self.malformed_alert
        )
    }
}

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub series: SeriesTable,
    pub skipped: SkipReport,
}

// ---

/// Decode every raw record of `document` into a time-ordered series.
pub fn normalize(
    document: &Document,
    shape: &ExportShape,
    map: &FieldMap,
    options: &IngestOptions,
) -> Normalized {
    // ---
    let decoded: Vec<Result<CanonicalRecord, RecordSkip>> = match (shape, document) {
        (ExportShape::TabularSheet { data_sheet, .. }, Document::Workbook(workbook)) => {
            let data = workbook
                .sheets
                .get(*data_sheet)
                .map(|sheet| decode_sheet(sheet, map))
                .unwrap_or_default();
            let alerts = map
                .alert_sheet
                .and_then(|alert_map| {
                    let sheet = workbook.sheets.get(alert_map.sheet)?;
                    Some(decode_alert_sheet(sheet, &alert_map))
                })
                .unwrap_or_default();
            data.into_iter().chain(alerts).collect()
        }
        (_, Document::Json(value)) => messages(shape, value)
            .into_iter()
            .map(|message| decode_message(message, map, options.topic.as_deref()))
            .collect(),
        _ => Vec::new(),
    };

    let mut records = Vec::with_capacity(decoded.len());
    let mut skipped = SkipReport::default();
    for (index, result) in decoded.into_iter().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(skip) => {
                debug!("Dropping record {}: {:?}", index, skip);
                skipped.record(skip);
            }
        }
    }

    let mut series = SeriesTable::from_unsorted(records).into_records();
    apply_sentinel_policy(&mut series, options.sentinel_policy);
    let series = SeriesTable::from_sorted(series);

    info!("Normalized {} records ({})", series.len(), skipped);
    Normalized { series, skipped }
}

// ---

fn decode_message(
    message: &Value,
    map: &FieldMap,
    topic: Option<&str>,
) -> Result<CanonicalRecord, RecordSkip> {
    // ---
    let envelope = message.as_object().ok_or(RecordSkip::MalformedPayload)?;

    if let Some(wanted) = topic {
        if envelope.get("topic").and_then(Value::as_str) != Some(wanted) {
            return Err(RecordSkip::TopicMismatch);
        }
    }

    let payload = decode_payload(envelope.get("payload")).ok_or(RecordSkip::MalformedPayload)?;
    let field_value = |key: &FieldKey| lookup(key, envelope, &payload);

    let raw_ts = field_value(&map.timestamp)
        .filter(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()))
        .ok_or(RecordSkip::MissingTimestamp)?;
    let mut record =
        CanonicalRecord::at(timestamp::from_json(raw_ts).ok_or(RecordSkip::BadTimestamp)?);

    for field in SensorField::ALL {
        *field.slot(&mut record) = field_value(map.sensor(field)).and_then(json_reading);
    }

    record.alert = map.alert.as_ref().and_then(|alert| {
        let kind = field_value(&alert.kind).and_then(json_text)?;
        let value = field_value(&alert.value).and_then(json_reading)?;
        Some(AlertAnnotation { kind, value })
    });

    Ok(record)
}

fn decode_sheet(sheet: &Sheet, map: &FieldMap) -> Vec<Result<CanonicalRecord, RecordSkip>> {
    // ---
    sheet
        .data_rows()
        .iter()
        .filter(|row| !row.iter().all(Cell::is_blank))
        .map(|row| decode_row(row, map))
        .collect()
}

fn decode_row(row: &[Cell], map: &FieldMap) -> Result<CanonicalRecord, RecordSkip> {
    // ---
    let cell = |key: &FieldKey| column(row, key);

    let raw_ts = cell(&map.timestamp)
        .filter(|c| !c.is_blank())
        .ok_or(RecordSkip::MissingTimestamp)?;
    let mut record =
        CanonicalRecord::at(timestamp::from_cell(raw_ts).ok_or(RecordSkip::BadTimestamp)?);

    for field in SensorField::ALL {
        *field.slot(&mut record) = cell(map.sensor(field)).and_then(Cell::as_f64);
    }

    record.alert = map.alert.as_ref().and_then(|alert| {
        let kind = cell(&alert.kind).and_then(Cell::as_text)?;
        let value = cell(&alert.value).and_then(Cell::as_f64)?;
        Some(AlertAnnotation { kind, value })
    });

    Ok(record)
}

fn decode_alert_sheet(
    sheet: &Sheet,
    map: &AlertSheetMap,
) -> Vec<Result<CanonicalRecord, RecordSkip>> {
    // ---
    sheet
        .data_rows()
        .iter()
        .filter(|row| !row.iter().all(Cell::is_blank))
        .map(|row| {
            let raw_ts = row
                .get(map.timestamp)
                .filter(|c| !c.is_blank())
                .ok_or(RecordSkip::MissingTimestamp)?;
            let mut record =
                CanonicalRecord::at(timestamp::from_cell(raw_ts).ok_or(RecordSkip::BadTimestamp)?);
            let kind = row.get(map.kind).and_then(Cell::as_text);
            let value = row.get(map.value).and_then(Cell::as_f64);
            match (kind, value) {
                (Some(kind), Some(value)) => {
                    record.alert = Some(AlertAnnotation { kind, value });
                    Ok(record)
                }
                _ => Err(RecordSkip::MalformedAlert),
            }
        })
        .collect()
}

// ---

fn lookup<'v>(
    key: &FieldKey,
    envelope: &'v Map<String, Value>,
    payload: &'v Map<String, Value>,
) -> Option<&'v Value> {
    match key {
        FieldKey::Envelope(name) => envelope.get(name),
        FieldKey::Payload(name) => payload.get(name),
        FieldKey::Column(_) => None,
    }
}

fn column<'r>(row: &'r [Cell], key: &FieldKey) -> Option<&'r Cell> {
    match key {
        FieldKey::Column(index) => row.get(*index),
        _ => None,
    }
}

/// Numeric reading from a JSON value; anything non-numeric is absent.
fn json_reading(value: &Value) -> Option<f64> {
    let reading = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    reading.is_finite().then_some(reading)
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_sentinel(value: f64) -> bool {
    value <= 0.0
}

/// Apply `policy` to a time-ordered slice of records.
fn apply_sentinel_policy(records: &mut [CanonicalRecord], policy: SentinelPolicy) {
    // ---
    match policy {
        SentinelPolicy::Literal => {}
        SentinelPolicy::Absent => {
            for record in records.iter_mut() {
                for field in SensorField::ALL {
                    let slot = field.slot(record);
                    if slot.is_some_and(is_sentinel) {
                        *slot = None;
                    }
                }
            }
        }
        SentinelPolicy::ForwardFill => {
            for field in SensorField::ALL {
                let mut carried: Option<f64> = None;
                for record in records.iter_mut() {
                    if is_annotation_only(record) {
                        continue;
                    }
                    let slot = field.slot(record);
                    match *slot {
                        Some(value) if !is_sentinel(value) => carried = Some(value),
                        _ => *slot = carried,
                    }
                }
            }
        }
    }
}

fn is_annotation_only(record: &CanonicalRecord) -> bool {
    record.alert.is_some() && SensorField::ALL.iter().all(|f| f.value_of(record).is_none())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::ingest::{resolve, AlertFields, Workbook};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn payload_map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn message_map() -> FieldMap {
        FieldMap {
            timestamp: FieldKey::Envelope("createAt".into()),
            temperature: FieldKey::Payload("temp".into()),
            moisture: FieldKey::Payload("moisture".into()),
            co2: FieldKey::Payload("co2".into()),
            alert: None,
            alert_sheet: None,
        }
    }

    fn run(value: Value, options: &IngestOptions) -> Normalized {
        let doc = Document::Json(value);
        normalize(&doc, &ExportShape::FlatMessageArray, &message_map(), options)
    }

    #[test]
    fn test_bad_timestamps_are_dropped_not_fatal() {
        // ---
        let out = run(
            json!([
                {"createAt": "2025-01-01T00:00:00Z", "payload": {"temp": 1}},
                {"createAt": "not a time", "payload": {"temp": 2}},
                {"createAt": "2025-01-01T00:02:00Z", "payload": {"temp": 3}},
                {"createAt": "", "payload": {"temp": 4}},
                {"createAt": "2025-01-01T00:01:00Z", "payload": {"temp": 5}}
            ]),
            &IngestOptions::default(),
        );

        assert_eq!(out.series.len(), 3);
        assert_eq!(out.skipped.bad_timestamp, 1);
        assert_eq!(out.skipped.missing_timestamp, 1);
        let temps: Vec<_> = out.series.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![Some(1.0), Some(5.0), Some(3.0)]);
    }

    #[test]
    fn test_double_encoded_payload() {
        // ---
        let out = run(
            json!([{
                "topic": "sensor1/data",
                "createAt": "2025-01-01T00:00:00Z",
                "payload": "{\"temp\": 451, \"moisture\": 12, \"co2\": 800}"
            }]),
            &IngestOptions::default(),
        );

        let record = &out.series.records()[0];
        assert_eq!(record.temperature, Some(451.0));
        assert_eq!(record.moisture, Some(12.0));
        assert_eq!(record.co2, Some(800.0));
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        // ---
        let out = run(
            json!([
                {"createAt": "2025-01-01T00:00:00Z", "payload": "{\"temp\": 4"},
                {"createAt": "2025-01-01T00:00:00Z", "payload": 17},
                {"createAt": "2025-01-01T00:00:00Z"},
                "stray string",
                {"createAt": "2025-01-01T00:00:00Z", "payload": {"temp": 1}}
            ]),
            &IngestOptions::default(),
        );

        assert_eq!(out.series.len(), 1);
        assert_eq!(out.skipped.malformed_payload, 4);
    }

    #[test]
    fn test_non_numeric_values_are_absent_not_zero() {
        // ---
        let out = run(
            json!([{"createAt": "2025-01-01T00:00:00Z",
                    "payload": {"temp": "n/a", "moisture": "12.5", "co2": null}}]),
            &IngestOptions::default(),
        );

        let record = &out.series.records()[0];
        assert_eq!(record.temperature, None);
        assert_eq!(record.moisture, Some(12.5));
        assert_eq!(record.co2, None);
    }

    #[test]
    fn test_topic_filter() {
        // ---
        let options = IngestOptions {
            topic: Some("sensor1/data".into()),
            ..IngestOptions::default()
        };
        let out = run(
            json!([
                {"topic": "sensor1/data", "createAt": "2025-01-01T00:00:00Z", "payload": {"temp": 1}},
                {"topic": "sensor2/data", "createAt": "2025-01-01T00:00:00Z", "payload": {"temp": 2}},
                {"createAt": "2025-01-01T00:00:00Z", "payload": {"temp": 3}}
            ]),
            &options,
        );

        assert_eq!(out.series.len(), 1);
        assert_eq!(out.skipped.topic_mismatch, 2);
    }

    #[test]
    fn test_alert_annotation_passthrough() {
        // ---
        let map = FieldMap {
            alert: Some(AlertFields {
                kind: FieldKey::Payload("alert".into()),
                value: FieldKey::Payload("value".into()),
            }),
            ..message_map()
        };
        let doc = Document::Json(json!([
            {"createAt": "2025-01-01T00:00:00Z",
             "payload": {"temp": 460, "alert": "HIGH_TEMP", "value": 460}},
            {"createAt": "2025-01-01T00:01:00Z", "payload": {"temp": 20, "alert": ""}}
        ]));

        let out = normalize(&doc, &ExportShape::FlatMessageArray, &map, &IngestOptions::default());
        assert_eq!(
            out.series.records()[0].alert,
            Some(AlertAnnotation {
                kind: "HIGH_TEMP".into(),
                value: 460.0
            })
        );
        assert_eq!(out.series.records()[1].alert, None);
    }

    #[test]
    fn test_sentinel_policies() {
        // ---
        let value = json!([
            {"createAt": "2025-01-01T00:00:00Z", "payload": {"temp": 0}},
            {"createAt": "2025-01-01T00:01:00Z", "payload": {"temp": 20}},
            {"createAt": "2025-01-01T00:02:00Z", "payload": {"temp": 0}},
            {"createAt": "2025-01-01T00:03:00Z", "payload": {"temp": -1}},
            {"createAt": "2025-01-01T00:04:00Z", "payload": {}}
        ]);
        let temps = |policy| {
            let options = IngestOptions {
                sentinel_policy: policy,
                ..IngestOptions::default()
            };
            run(value.clone(), &options)
                .series
                .iter()
                .map(|r| r.temperature)
                .collect::<Vec<_>>()
        };

        assert_eq!(
            temps(SentinelPolicy::Literal),
            vec![Some(0.0), Some(20.0), Some(0.0), Some(-1.0), None]
        );
        assert_eq!(
            temps(SentinelPolicy::Absent),
            vec![None, Some(20.0), None, None, None]
        );
        assert_eq!(
            temps(SentinelPolicy::ForwardFill),
            vec![None, Some(20.0), Some(20.0), Some(20.0), Some(20.0)]
        );
    }

    #[test]
    fn test_workbook_rows_and_alert_sheet() {
        // ---
        let text = |s: &str| Cell::Text(s.to_string());
        let workbook = Workbook {
            sheets: vec![
                Sheet::new(
                    "Sensor Data",
                    vec![
                        vec![text("Timestamp"), text("Temperature"), text("Moisture"), text("CO2")],
                        vec![text("2025-01-01 00:02:00"), Cell::Number(30.0), Cell::Empty, Cell::Number(500.0)],
                        vec![Cell::Empty, Cell::Empty, Cell::Empty, Cell::Empty],
                        vec![text("garbage"), Cell::Number(31.0), Cell::Number(10.0), Cell::Number(510.0)],
                        vec![Cell::Number(45658.0), Cell::Number(29.0), Cell::Number(11.0), Cell::Empty],
                    ],
                ),
                Sheet::new(
                    "Alerts",
                    vec![
                        vec![text("Timestamp"), text("Alert"), text("Value")],
                        vec![text("2025-01-01 00:01:00"), text("HIGH_CO2"), Cell::Number(900.0)],
                        vec![text("2025-01-01 00:03:00"), Cell::Empty, Cell::Number(1.0)],
                    ],
                ),
            ],
        };
        let doc = Document::Workbook(workbook);
        let shape = ExportShape::TabularSheet {
            data_sheet: 0,
            alert_sheet: Some(1),
        };
        let map = resolve(&shape, &doc).unwrap();

        let out = normalize(&doc, &shape, &map, &IngestOptions::default());
        let records = out.series.records();

        assert_eq!(records.len(), 3);
        assert_eq!(out.skipped.bad_timestamp, 1);
        assert_eq!(out.skipped.malformed_alert, 1);
        assert_eq!(records[0].timestamp, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(records[0].co2, None);
        assert_eq!(records[1].alert.as_ref().map(|a| a.kind.as_str()), Some("HIGH_CO2"));
        assert_eq!(records[1].temperature, None);
        assert_eq!(records[2].moisture, None);
    }

    #[test]
    fn test_forward_fill_skips_annotation_rows() {
        // ---
        let mut records = vec![
            CanonicalRecord {
                temperature: Some(10.0),
                ..CanonicalRecord::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            },
            CanonicalRecord {
                alert: Some(AlertAnnotation {
                    kind: "HIGH_TEMP".into(),
                    value: 99.0,
                }),
                ..CanonicalRecord::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 1, 0).unwrap())
            },
        ];
        apply_sentinel_policy(&mut records, SentinelPolicy::ForwardFill);
        assert_eq!(records[1].temperature, None);
    }

    #[test]
    fn test_json_reading() {
        // ---
        let payload = payload_map(&[("a", json!(1.5)), ("b", json!(" 2 ")), ("c", json!(true))]);
        assert_eq!(json_reading(&payload["a"]), Some(1.5));
        assert_eq!(json_reading(&payload["b"]), Some(2.0));
        assert_eq!(json_reading(&payload["c"]), None);
        assert_eq!(json_reading(&json!("NaN")), None);
    }
}
