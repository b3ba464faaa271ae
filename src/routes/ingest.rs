use axum::{
    body::Bytes, extract::Query, extract::State, http::StatusCode, response::IntoResponse,
    routing::post, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};
use uuid::Uuid;

use super::api_error::ApiError;
use crate::ingest::SkipReport;
use crate::{ingest_with, Config, ExportFormat, ExportShape, Ingestion, SeriesTable};

// ---

pub fn router() -> Router<Config> {
    // ---
    Router::new().route("/ingest", post(handler))
}

/// Query parameters shared by every upload endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct UploadQuery {
    /// `json` or `tabular` (`xlsx` / `excel` accepted).
    pub format: String,
    /// Overrides the configured topic filter.
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    upload_id: Uuid,
    shape: ExportShape,
    record_count: usize,
    skipped: SkipReport,
    series: SeriesTable,
}

async fn handler(
    Query(params): Query<UploadQuery>,
    State(config): State<Config>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    let upload_id = Uuid::new_v4();
    info!("POST /ingest - upload {} ({} bytes)", upload_id, body.len());

    let ingestion = run_ingest(upload_id, &config, &params, &body)?;

    Ok((
        StatusCode::OK,
        Json(IngestResponse {
            upload_id,
            shape: ingestion.shape,
            record_count: ingestion.series.len(),
            skipped: ingestion.skipped,
            series: ingestion.series,
        }),
    ))
}

/// Parse the declared format and run ingestion inside a per-upload span.
pub(super) fn run_ingest(
    upload_id: Uuid,
    config: &Config,
    params: &UploadQuery,
    body: &[u8],
) -> Result<Ingestion, ApiError> {
    // ---
    let format = ExportFormat::parse(&params.format).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "unknown format '{}', expected json or tabular",
            params.format
        ))
    })?;
    let options = config.ingest_options(params.topic.as_deref());

    info_span!("upload", %upload_id)
        .in_scope(|| ingest_with(body, format, &options))
        .map_err(ApiError::from)
}
