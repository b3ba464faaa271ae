//! Schema-tolerant ingestion and trailing-window KPIs for exported kiln
//! telemetry (temperature, moisture, CO₂).
//!
//! Uploads are either MQTT JSON exports (flat, wrapped or nested, with
//! payloads that may be double-encoded) or spreadsheets with loosely named
//! columns. The pipeline is:
//!
//! ```text
//! bytes ─ detect ─ resolve ─ normalize ─▶ SeriesTable ─ filter/aggregate ─▶ KPIs
//!                                                      └ evaluate ─▶ AlertEvents
//! ```
//!
//! [`ingest()`] and [`query()`] are the two entry points; [`routes::router`]
//! exposes them over HTTP.

pub mod analysis;
pub mod config;
mod error;
pub mod ingest;
mod models;
mod pipeline;
pub mod routes;

pub use config::Config;
pub use error::{IngestError, QueryError};
pub use models::{
    Aggregates, AlertAnnotation, AlertEvent, AlertOrigin, CanonicalRecord, ExportFormat,
    ExportShape, KpiSnapshot, LatestReadings, RawExport, SensorField, SeriesTable, TimeWindow,
};
pub use pipeline::{ingest, ingest_with, query, query_at, Ingestion, QueryResult};
