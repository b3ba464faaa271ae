//! Tolerant timestamp parsing.
//!
//! Naive values (no offset) are read as UTC. Epoch numbers of magnitude
//! `>= 1e11` are milliseconds, smaller ones seconds.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use super::Cell;

const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Spreadsheet numbers below this are Excel serial dates, not epoch seconds.
const EXCEL_SERIAL_LIMIT: f64 = 1e6;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

// ---

/// Parse a textual timestamp in any of the accepted layouts.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    // ---
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = text.strip_suffix(['Z', 'z']).unwrap_or(text);
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(dt.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(naive, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    text.parse::<f64>().ok().and_then(from_epoch)
}

/// Epoch seconds or milliseconds.
pub(crate) fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    // ---
    if !value.is_finite() {
        return None;
    }
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        return DateTime::from_timestamp_millis(value as i64);
    }
    let secs = value.floor();
    let nanos = ((value - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

/// Excel serial date: days since 1899-12-30, fractional part is time of day.
pub(crate) fn from_excel_serial(value: f64) -> Option<DateTime<Utc>> {
    // ---
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (value * 86_400_000.0).round() as i64;
    base.checked_add_signed(Duration::milliseconds(millis))
        .map(|dt| dt.and_utc())
}

/// Timestamp from a JSON envelope or payload value.
pub(crate) fn from_json(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp(text),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

/// Timestamp from a spreadsheet cell.
pub(crate) fn from_cell(cell: &Cell) -> Option<DateTime<Utc>> {
    match cell {
        Cell::DateTime(dt) => Some(dt.and_utc()),
        Cell::Text(text) => parse_timestamp(text),
        Cell::Number(n) if n.abs() < EXCEL_SERIAL_LIMIT => from_excel_serial(*n),
        Cell::Number(n) => from_epoch(*n),
        _ => None,
    }
}
