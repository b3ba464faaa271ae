//! Schema-tolerant ingestion: detect → resolve → normalize.
//!
//! This is the gateway module for the ingestion stage (EMBP). Siblings stay
//! private; only the types and functions callers need are re-exported here.

use serde::Serialize;

mod detect;
mod normalize;
mod resolve;
mod tabular;
mod timestamp;

pub use detect::{detect, detect_json, detect_workbook, Document};
pub use normalize::{normalize, Normalized, RecordSkip, SkipReport};
pub use resolve::{resolve, sensor_field_for, AlertFields, AlertSheetMap, FieldKey, FieldMap};
pub use tabular::{read_workbook, Cell, Sheet, Workbook};
pub use timestamp::parse_timestamp;

// ---

/// How sentinel readings (zero or negative placeholders some exporters write
/// instead of leaving a cell empty) are treated. Opt-in; never inferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelPolicy {
    /// Zero and negative readings are real measurements.
    #[default]
    Literal,
    /// Readings `<= 0` become absent.
    Absent,
    /// Readings `<= 0` and absent readings carry the previous present
    /// reading of the same channel forward. Leading gaps stay absent and
    /// annotation-only records are left untouched.
    ForwardFill,
}

impl SentinelPolicy {
    pub fn parse(name: &str) -> Option<Self> {
        // ---
        match name.trim().to_ascii_lowercase().as_str() {
            "literal" => Some(SentinelPolicy::Literal),
            "absent" => Some(SentinelPolicy::Absent),
            "forward_fill" | "ffill" => Some(SentinelPolicy::ForwardFill),
            _ => None,
        }
    }
}

/// Request-scoped ingestion settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOptions {
    /// Keep only messages published on this topic (message exports only).
    pub topic: Option<String>,
    pub sentinel_policy: SentinelPolicy,
}
