//! In-memory workbook model and the spreadsheet reader that fills it.
//!
//! Detection and resolution only ever see [`Workbook`]; `calamine` is
//! confined to [`read_workbook`].

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::NaiveDateTime;
use tracing::debug;

use crate::IngestError;

// ---

/// One spreadsheet cell, reduced to the types the pipeline cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Numeric reading of the cell. Numeric text is accepted; anything
    /// else, including non-finite numbers, is absent.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Cell::Number(n) => *n,
            Cell::Text(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Non-empty textual content of the cell.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        // ---
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            Data::String(s) => Cell::Text(s.clone()),
            Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::DateTime(_) | Data::DateTimeIso(_) => {
                data.as_datetime().map(Cell::DateTime).unwrap_or(Cell::Empty)
            }
        }
    }
}

/// A named sheet. The first row is the header row.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Sheet {
            name: name.into(),
            rows,
        }
    }

    /// Header names, one per column. Non-text headers become empty strings.
    pub fn headers(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.as_text().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rows below the header.
    pub fn data_rows(&self) -> &[Vec<Cell>] {
        self.rows.get(1..).unwrap_or(&[])
    }
}

/// All sheets of a workbook, in workbook order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

// ---

/// Read an xlsx/xls/xlsb/ods workbook from memory.
///
/// Sheets that fail to load are skipped; a workbook that cannot be opened at
/// all is an [`IngestError::UnrecognizedFormat`].
pub fn read_workbook(bytes: &[u8]) -> Result<Workbook, IngestError> {
    // ---
    let mut sheets = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| IngestError::UnrecognizedFormat(format!("unreadable workbook: {e}")))?;

    let mut workbook = Workbook::default();
    for name in sheets.sheet_names() {
        match sheets.worksheet_range(&name) {
            Ok(range) => {
                let rows = range
                    .rows()
                    .map(|row| row.iter().map(Cell::from).collect())
                    .collect();
                workbook.sheets.push(Sheet::new(name, rows));
            }
            Err(e) => debug!("Skipping unreadable sheet '{}': {}", name, e),
        }
    }

    debug!("Read workbook with {} sheets", workbook.sheets.len());
    Ok(workbook)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_cell_numeric_coercion() {
        // ---
        assert_eq!(Cell::Number(21.5).as_f64(), Some(21.5));
        assert_eq!(Cell::Text(" 12 ".into()).as_f64(), Some(12.0));
        assert_eq!(Cell::Text("n/a".into()).as_f64(), None);
        assert_eq!(Cell::Number(f64::NAN).as_f64(), None);
        assert_eq!(Cell::Empty.as_f64(), None);
        assert_eq!(Cell::Bool(true).as_f64(), None);
    }

    #[test]
    fn test_headers_and_rows() {
        // ---
        let sheet = Sheet::new(
            "Data",
            vec![
                vec![Cell::Text("Timestamp".into()), Cell::Empty],
                vec![Cell::Text("2025-01-01".into()), Cell::Number(1.0)],
            ],
        );

        assert_eq!(sheet.headers(), vec!["Timestamp".to_string(), String::new()]);
        assert_eq!(sheet.data_rows().len(), 1);
        assert!(Sheet::new("Empty", vec![]).data_rows().is_empty());
    }

    #[test]
    fn test_garbage_bytes_are_unrecognized() {
        // ---
        let err = read_workbook(b"definitely not a spreadsheet").unwrap_err();
        assert!(matches!(err, IngestError::UnrecognizedFormat(_)));
    }
}
