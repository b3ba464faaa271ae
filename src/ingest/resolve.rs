//! Field resolution: map raw keys or columns onto canonical fields.
//!
//! Sensor and timestamp aliases are case-insensitive substring matches on
//! trimmed names; the first candidate in column (or first-seen key) order
//! wins, and a candidate claimed by an earlier field is never reused.
//! Alert fields use exact (case-insensitive) names.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::detect::{decode_payload, messages, Document};
use crate::{ExportShape, IngestError, SensorField};

const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "time", "date", "createat"];
const TEMPERATURE_ALIASES: &[&str] = &["temp"];
const MOISTURE_ALIASES: &[&str] = &["moisture", "humidity"];
const CO2_ALIASES: &[&str] = &["co2", "co", "gas", "smoke"];

const ALERT_KIND_NAMES: &[&str] = &["alert", "alert_type"];
const ALERT_VALUE_NAMES: &[&str] = &["value", "alert value"];

// ---

/// Where a canonical field lives in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "in", content = "key", rename_all = "snake_case")]
pub enum FieldKey {
    /// Key on the message envelope (next to `topic` and `payload`).
    Envelope(String),
    /// Key inside the (possibly double-encoded) message payload.
    Payload(String),
    /// Column index on the data sheet.
    Column(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertFields {
    pub kind: FieldKey,
    pub value: FieldKey,
}

/// Column layout of a separate alert sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertSheetMap {
    pub sheet: usize,
    pub timestamp: usize,
    pub kind: usize,
    pub value: usize,
}

/// Resolved source location of every canonical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMap {
    pub timestamp: FieldKey,
    pub temperature: FieldKey,
    pub moisture: FieldKey,
    pub co2: FieldKey,
    pub alert: Option<AlertFields>,
    pub alert_sheet: Option<AlertSheetMap>,
}

impl FieldMap {
    pub fn sensor(&self, field: SensorField) -> &FieldKey {
        match field {
            SensorField::Temperature => &self.temperature,
            SensorField::Moisture => &self.moisture,
            SensorField::Co2 => &self.co2,
        }
    }
}

// ---

/// Resolve canonical fields for a detected export.
///
/// A missing timestamp is reported before any sensor field is considered.
pub fn resolve(shape: &ExportShape, document: &Document) -> Result<FieldMap, IngestError> {
    // ---
    let map = match (shape, document) {
        (ExportShape::TabularSheet { data_sheet, alert_sheet }, Document::Workbook(workbook)) => {
            let headers = workbook
                .sheets
                .get(*data_sheet)
                .map(|sheet| sheet.headers())
                .unwrap_or_default();
            let alert_sheet = alert_sheet.and_then(|index| {
                let sheet = workbook.sheets.get(index)?;
                alert_sheet_map(index, &sheet.headers())
            });
            resolve_columns(&headers, alert_sheet)?
        }
        (_, Document::Json(value)) => resolve_messages(&messages(shape, value))?,
        (shape, _) => {
            return Err(IngestError::UnrecognizedFormat(format!(
                "shape {shape:?} does not match the uploaded document"
            )));
        }
    };

    debug!("Resolved field map {:?}", map);
    Ok(map)
}

/// Sensor channel named by `name`, using the same aliases as column
/// resolution (`"HIGH_TEMP"` → temperature).
pub fn sensor_field_for(name: &str) -> Option<SensorField> {
    // ---
    let name = normalize_name(name);
    [
        (SensorField::Temperature, TEMPERATURE_ALIASES),
        (SensorField::Moisture, MOISTURE_ALIASES),
        (SensorField::Co2, CO2_ALIASES),
    ]
    .into_iter()
    .find(|(_, aliases)| aliases.iter().any(|alias| name.contains(alias)))
    .map(|(field, _)| field)
}

/// A sheet holds sensor data when timestamp, temperature, moisture and co2
/// can all be claimed from its headers, each on a distinct column.
pub(crate) fn qualifies_as_data_sheet(headers: &[String]) -> bool {
    claim_columns(headers).is_ok()
}

pub(crate) fn qualifies_as_alert_sheet(headers: &[String]) -> bool {
    alert_sheet_map(0, headers).is_some()
}

// ---

fn resolve_columns(
    headers: &[String],
    alert_sheet: Option<AlertSheetMap>,
) -> Result<FieldMap, IngestError> {
    // ---
    let columns = claim_columns(headers)?;
    let [timestamp, temperature, moisture, co2] = columns;
    let mut claimed = columns.to_vec();

    let alert = find_exact(headers, ALERT_KIND_NAMES, &claimed).and_then(|kind| {
        claimed.push(kind);
        let value = find_exact(headers, ALERT_VALUE_NAMES, &claimed)?;
        Some(AlertFields {
            kind: FieldKey::Column(kind),
            value: FieldKey::Column(value),
        })
    });

    Ok(FieldMap {
        timestamp: FieldKey::Column(timestamp),
        temperature: FieldKey::Column(temperature),
        moisture: FieldKey::Column(moisture),
        co2: FieldKey::Column(co2),
        alert,
        alert_sheet,
    })
}

/// Claim timestamp, temperature, moisture and co2 columns in that order.
fn claim_columns(headers: &[String]) -> Result<[usize; 4], IngestError> {
    // ---
    let mut claimed = Vec::with_capacity(4);
    Ok([
        claim_alias(headers, TIMESTAMP_ALIASES, &mut claimed, "timestamp")?,
        claim_alias(headers, TEMPERATURE_ALIASES, &mut claimed, "temperature")?,
        claim_alias(headers, MOISTURE_ALIASES, &mut claimed, "moisture")?,
        claim_alias(headers, CO2_ALIASES, &mut claimed, "co2")?,
    ])
}

fn resolve_messages(messages: &[&Value]) -> Result<FieldMap, IngestError> {
    // ---
    let mut envelope_keys: Vec<String> = Vec::new();
    let mut payload_keys: Vec<String> = Vec::new();

    for message in messages {
        let Some(envelope) = message.as_object() else {
            continue;
        };
        push_unique(&mut envelope_keys, envelope.keys().filter(|k| *k != "payload"));
        if let Some(payload) = decode_payload(envelope.get("payload")) {
            push_unique(&mut payload_keys, payload.keys());
        }
    }

    let mut claimed = Vec::new();
    let timestamp = match find_alias(&envelope_keys, TIMESTAMP_ALIASES, &[]) {
        Some(index) => FieldKey::Envelope(envelope_keys[index].clone()),
        None => {
            let index = claim_alias(&payload_keys, TIMESTAMP_ALIASES, &mut claimed, "timestamp")?;
            FieldKey::Payload(payload_keys[index].clone())
        }
    };

    let mut payload_field = |aliases: &[&str], name: &str| {
        claim_alias(&payload_keys, aliases, &mut claimed, name)
            .map(|index| FieldKey::Payload(payload_keys[index].clone()))
    };
    let temperature = payload_field(TEMPERATURE_ALIASES, "temperature")?;
    let moisture = payload_field(MOISTURE_ALIASES, "moisture")?;
    let co2 = payload_field(CO2_ALIASES, "co2")?;

    let alert = find_exact(&payload_keys, ALERT_KIND_NAMES, &claimed).and_then(|kind| {
        claimed.push(kind);
        let value = find_exact(&payload_keys, ALERT_VALUE_NAMES, &claimed)?;
        Some(AlertFields {
            kind: FieldKey::Payload(payload_keys[kind].clone()),
            value: FieldKey::Payload(payload_keys[value].clone()),
        })
    });

    Ok(FieldMap {
        timestamp,
        temperature,
        moisture,
        co2,
        alert,
        alert_sheet: None,
    })
}

fn alert_sheet_map(sheet: usize, headers: &[String]) -> Option<AlertSheetMap> {
    // ---
    let timestamp = find_alias(headers, TIMESTAMP_ALIASES, &[])?;
    let kind = find_exact(headers, ALERT_KIND_NAMES, &[timestamp])?;
    let value = find_exact(headers, ALERT_VALUE_NAMES, &[timestamp, kind])?;
    Some(AlertSheetMap {
        sheet,
        timestamp,
        kind,
        value,
    })
}

// ---

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn push_unique<'k>(keys: &mut Vec<String>, candidates: impl Iterator<Item = &'k String>) {
    for key in candidates {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
}

fn find_alias(names: &[String], aliases: &[&str], claimed: &[usize]) -> Option<usize> {
    // ---
    names
        .iter()
        .enumerate()
        .filter(|(index, _)| !claimed.contains(index))
        .find(|(_, name)| {
            let name = normalize_name(name);
            aliases.iter().any(|alias| name.contains(alias))
        })
        .map(|(index, _)| index)
}

fn find_exact(names: &[String], exact: &[&str], claimed: &[usize]) -> Option<usize> {
    // ---
    names
        .iter()
        .enumerate()
        .filter(|(index, _)| !claimed.contains(index))
        .find(|(_, name)| exact.contains(&normalize_name(name).as_str()))
        .map(|(index, _)| index)
}

fn claim_alias(
    names: &[String],
    aliases: &[&str],
    claimed: &mut Vec<usize>,
    field: &str,
) -> Result<usize, IngestError> {
    // ---
    let index = find_alias(names, aliases, claimed)
        .ok_or_else(|| IngestError::MissingRequiredField(field.to_string()))?;
    claimed.push(index);
    Ok(index)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::ingest::{Cell, Sheet, Workbook};
    use serde_json::json;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn workbook(sheets: Vec<(&str, &[&str])>) -> Document {
        Document::Workbook(Workbook {
            sheets: sheets
                .into_iter()
                .map(|(name, cols)| {
                    Sheet::new(name, vec![cols.iter().map(|c| Cell::Text(c.to_string())).collect()])
                })
                .collect(),
        })
    }

    #[test]
    fn test_column_aliases_case_insensitive() {
        // ---
        let map = resolve_columns(
            &headers(&[" Date ", "Kiln TEMP", "Relative Humidity", "Smoke ppm"]),
            None,
        )
        .unwrap();

        assert_eq!(map.timestamp, FieldKey::Column(0));
        assert_eq!(map.temperature, FieldKey::Column(1));
        assert_eq!(map.moisture, FieldKey::Column(2));
        assert_eq!(map.co2, FieldKey::Column(3));
        assert!(map.alert.is_none());
    }

    #[test]
    fn test_first_match_wins_in_column_order() {
        // ---
        let map = resolve_columns(
            &headers(&["timestamp", "temp_inner", "temp_outer", "moisture", "co2"]),
            None,
        )
        .unwrap();
        assert_eq!(map.temperature, FieldKey::Column(1));
    }

    #[test]
    fn test_claimed_columns_are_not_reused() {
        // ---
        // "co2_time" would match the timestamp alias; once claimed by
        // timestamp it must not also become the co2 column.
        let map = resolve_columns(
            &headers(&["co2_time", "temperature", "moisture", "co2"]),
            None,
        )
        .unwrap();
        assert_eq!(map.timestamp, FieldKey::Column(0));
        assert_eq!(map.co2, FieldKey::Column(3));
    }

    #[test]
    fn test_missing_fields() {
        // ---
        let err = resolve_columns(&headers(&["temperature", "moisture", "co2"]), None).unwrap_err();
        assert!(matches!(err, IngestError::MissingRequiredField(f) if f == "timestamp"));

        let err = resolve_columns(&headers(&["timestamp", "temperature", "co2"]), None).unwrap_err();
        assert!(matches!(err, IngestError::MissingRequiredField(f) if f == "moisture"));
    }

    #[test]
    fn test_alert_columns_on_data_sheet() {
        // ---
        let map = resolve_columns(
            &headers(&["timestamp", "temperature", "moisture", "co2", "Alert_Type", "Alert Value"]),
            None,
        )
        .unwrap();
        assert_eq!(
            map.alert,
            Some(AlertFields {
                kind: FieldKey::Column(4),
                value: FieldKey::Column(5),
            })
        );
    }

    #[test]
    fn test_tabular_resolution_with_alert_sheet() {
        // ---
        let doc = workbook(vec![
            ("Readings", &["Timestamp", "Temperature", "Moisture", "CO2"][..]),
            ("Alerts", &["Alert", "Time", "Value"][..]),
        ]);
        let shape = ExportShape::TabularSheet {
            data_sheet: 0,
            alert_sheet: Some(1),
        };

        let map = resolve(&shape, &doc).unwrap();
        assert_eq!(
            map.alert_sheet,
            Some(AlertSheetMap {
                sheet: 1,
                timestamp: 1,
                kind: 0,
                value: 2,
            })
        );
    }

    #[test]
    fn test_message_payload_keys() {
        // ---
        let doc = Document::Json(json!([
            {"topic": "sensor1/data", "createAt": "2025-01-01T00:00:00Z",
             "payload": {"temp": 1, "moisture": 2}},
            {"topic": "sensor1/data", "createAt": "2025-01-01T00:01:00Z",
             "payload": "{\"co2\": 400, \"alert\": \"HIGH_TEMP\", \"value\": 451}"},
            {"topic": "sensor1/data", "createAt": "2025-01-01T00:02:00Z", "payload": "{oops"}
        ]));

        let map = resolve(&ExportShape::FlatMessageArray, &doc).unwrap();
        assert_eq!(map.timestamp, FieldKey::Envelope("createAt".into()));
        assert_eq!(map.temperature, FieldKey::Payload("temp".into()));
        assert_eq!(map.moisture, FieldKey::Payload("moisture".into()));
        assert_eq!(map.co2, FieldKey::Payload("co2".into()));
        assert_eq!(
            map.alert,
            Some(AlertFields {
                kind: FieldKey::Payload("alert".into()),
                value: FieldKey::Payload("value".into()),
            })
        );
    }

    #[test]
    fn test_timestamp_falls_back_to_payload() {
        // ---
        let doc = Document::Json(json!({"messages": [
            {"payload": {"ts_date": "2025-01-01", "temperature": 1, "humidity": 2, "gas": 3}}
        ]}));
        let map = resolve(&ExportShape::WrappedMessages, &doc).unwrap();
        assert_eq!(map.timestamp, FieldKey::Payload("ts_date".into()));
        assert_eq!(map.co2, FieldKey::Payload("gas".into()));
    }

    #[test]
    fn test_message_without_timestamp_is_fatal() {
        // ---
        let doc = Document::Json(json!([{"topic": "t", "payload": {"temp": 1, "moisture": 2, "co2": 3}}]));
        let err = resolve(&ExportShape::FlatMessageArray, &doc).unwrap_err();
        assert!(matches!(err, IngestError::MissingRequiredField(f) if f == "timestamp"));
    }

    #[test]
    fn test_data_sheet_needs_every_column() {
        // ---
        assert!(qualifies_as_data_sheet(&headers(&["Timestamp", "Temperature", "Moisture", "CO2"])));
        assert!(!qualifies_as_data_sheet(&headers(&["Timestamp", "Alert", "Value", "Comment"])));
        assert!(!qualifies_as_data_sheet(&headers(&["Time", "Temp", "Humidity"])));
    }

    #[test]
    fn test_payload_keys_keep_document_order() {
        // ---
        // "alarm_count" sorts before "co2" and contains "co"; document order
        // must still hand co2 to the real column.
        let doc = Document::Json(json!([
            {"createAt": "2025-01-01T00:00:00Z",
             "payload": {"temp": 451, "moisture": 12, "co2": 800, "alarm_count": 0}}
        ]));
        let map = resolve(&ExportShape::FlatMessageArray, &doc).unwrap();
        assert_eq!(map.co2, FieldKey::Payload("co2".into()));
    }

    #[test]
    fn test_sensor_field_for_alert_kinds() {
        // ---
        assert_eq!(sensor_field_for("HIGH_TEMP"), Some(SensorField::Temperature));
        assert_eq!(sensor_field_for("humidity_low"), Some(SensorField::Moisture));
        assert_eq!(sensor_field_for("smoke"), Some(SensorField::Co2));
        assert_eq!(sensor_field_for("door_open"), None);
    }
}
