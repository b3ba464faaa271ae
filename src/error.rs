//! Error types for the ingestion and query entry points.
//!
//! Every variant is a recoverable, user-facing condition scoped to one call.
//! Per-record problems never surface here; they are counted in a
//! [`SkipReport`](crate::ingest::SkipReport) instead.

use thiserror::Error;

use crate::ingest::SkipReport;

/// Errors returned by [`ingest`](crate::ingest()) and friends.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The upload does not match any known export layout.
    #[error("Unrecognized export format: {0}")]
    UnrecognizedFormat(String),

    /// A canonical field could not be mapped to any column or key.
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    /// Every record was dropped during normalization.
    #[error("No valid records in export ({skipped})")]
    NoValidRecords { skipped: SkipReport },
}

impl IngestError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::UnrecognizedFormat(_) => "unrecognized_format",
            IngestError::MissingRequiredField(_) => "missing_required_field",
            IngestError::NoValidRecords { .. } => "no_valid_records",
        }
    }
}

/// Errors returned by [`query`](crate::query()).
#[derive(Debug, Error)]
pub enum QueryError {
    /// No record falls inside the requested window.
    #[error("No records in the last {window_minutes} minutes")]
    EmptyWindow { window_minutes: i64 },
}

impl QueryError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::EmptyWindow { .. } => "empty_window",
        }
    }
}
