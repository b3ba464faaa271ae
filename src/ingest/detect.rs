//! Schema detection: which export layout does an upload follow?

use std::borrow::Cow;

use serde_json::{Map, Value};
use tracing::debug;

use super::resolve::{qualifies_as_alert_sheet, qualifies_as_data_sheet};
use super::tabular::{read_workbook, Workbook};
use crate::{ExportFormat, ExportShape, IngestError, RawExport};

// ---

/// Parsed body of an upload, kept alongside its [`ExportShape`] so later
/// stages never parse the bytes twice.
#[derive(Debug, Clone)]
pub enum Document {
    Json(Value),
    Workbook(Workbook),
}

/// Parse `raw` and decide its shape.
pub fn detect(raw: &RawExport<'_>) -> Result<(ExportShape, Document), IngestError> {
    // ---
    match raw.format {
        ExportFormat::Json => {
            let value: Value = serde_json::from_slice(raw.bytes)
                .map_err(|e| IngestError::UnrecognizedFormat(format!("invalid JSON: {e}")))?;
            let shape = detect_json(&value)?;
            Ok((shape, Document::Json(value)))
        }
        ExportFormat::Tabular => {
            let workbook = read_workbook(raw.bytes)?;
            let shape = detect_workbook(&workbook)?;
            Ok((shape, Document::Workbook(workbook)))
        }
    }
}

/// Classify a decoded JSON export.
pub fn detect_json(value: &Value) -> Result<ExportShape, IngestError> {
    // ---
    let shape = match value {
        Value::Object(obj) if obj.get("messages").is_some_and(Value::is_array) => {
            ExportShape::WrappedMessages
        }
        Value::Array(items) if items.is_empty() => {
            return Err(IngestError::UnrecognizedFormat(
                "export contains no messages".into(),
            ));
        }
        Value::Array(items) if items.iter().all(is_wrapped_export) => {
            ExportShape::ArrayOfWrappedExports
        }
        Value::Array(items) if items.iter().any(is_message) => ExportShape::FlatMessageArray,
        Value::Array(_) => {
            return Err(IngestError::UnrecognizedFormat(
                "array elements carry neither `payload` nor `messages`".into(),
            ));
        }
        Value::Object(_) => {
            return Err(IngestError::UnrecognizedFormat(
                "object export without a `messages` array".into(),
            ));
        }
        _ => {
            return Err(IngestError::UnrecognizedFormat(
                "top-level JSON value must be an array or object".into(),
            ));
        }
    };

    debug!("Detected JSON export shape {:?}", shape);
    Ok(shape)
}

/// Pick the sensor sheet (and optional alert sheet) of a workbook.
pub fn detect_workbook(workbook: &Workbook) -> Result<ExportShape, IngestError> {
    // ---
    let data_sheet = workbook
        .sheets
        .iter()
        .position(|sheet| qualifies_as_data_sheet(&sheet.headers()))
        .ok_or_else(|| {
            IngestError::UnrecognizedFormat(format!(
                "none of {} sheet(s) has timestamp, temperature, moisture and co2 columns",
                workbook.sheets.len()
            ))
        })?;

    let alert_sheet = workbook
        .sheets
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != data_sheet)
        .find(|(_, sheet)| qualifies_as_alert_sheet(&sheet.headers()))
        .map(|(index, _)| index);

    debug!(
        "Detected workbook data sheet '{}' (alert sheet: {:?})",
        workbook.sheets[data_sheet].name,
        alert_sheet.map(|i| &workbook.sheets[i].name)
    );
    Ok(ExportShape::TabularSheet {
        data_sheet,
        alert_sheet,
    })
}

// ---

fn is_message(item: &Value) -> bool {
    item.get("payload").is_some()
}

fn is_wrapped_export(item: &Value) -> bool {
    item.get("messages").is_some_and(Value::is_array)
}

/// Every message envelope of a message-shaped export, in document order.
pub(crate) fn messages<'v>(shape: &ExportShape, value: &'v Value) -> Vec<&'v Value> {
    // ---
    let as_slice = |v: &'v Value| v.as_array().map(Vec::as_slice).unwrap_or(&[]);

    match shape {
        ExportShape::FlatMessageArray => as_slice(value).iter().collect(),
        ExportShape::WrappedMessages => as_slice(&value["messages"]).iter().collect(),
        ExportShape::ArrayOfWrappedExports => as_slice(value)
            .iter()
            .flat_map(|export| as_slice(&export["messages"]))
            .collect(),
        ExportShape::TabularSheet { .. } => Vec::new(),
    }
}

/// Decode a message payload that is either an object or a JSON-encoded
/// string holding an object. Returns `None` when it is neither.
pub(crate) fn decode_payload(payload: Option<&Value>) -> Option<Cow<'_, Map<String, Value>>> {
    // ---
    match payload? {
        Value::Object(map) => Some(Cow::Borrowed(map)),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(Cow::Owned(map)),
            _ => None,
        },
        _ => None,
    }
}
