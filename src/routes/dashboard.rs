//! One dashboard render cycle: upload → series → window KPIs + alerts.

use axum::{
    body::Bytes, extract::Query, extract::State, http::StatusCode, response::IntoResponse,
    routing::post, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};
use uuid::Uuid;

use super::api_error::ApiError;
use super::ingest::{run_ingest, UploadQuery};
use crate::analysis::Threshold;
use crate::ingest::{parse_timestamp, SkipReport};
use crate::{query_at, Config, ExportShape, QueryError, QueryResult, SensorField, TimeWindow};

// ---

pub fn router() -> Router<Config> {
    // ---
    Router::new().route("/dashboard", post(handler))
}

#[derive(Debug, Deserialize)]
struct DashboardQuery {
    format: String,
    topic: Option<String>,
    /// Trailing window length; defaults to the configured value.
    window_minutes: Option<u32>,
    /// Anchor the window here instead of at the latest record.
    now: Option<String>,
    temp_max: Option<f64>,
    moisture_max: Option<f64>,
    co2_max: Option<f64>,
}

#[derive(Debug, Serialize)]
struct DashboardResponse {
    upload_id: Uuid,
    shape: ExportShape,
    skipped: SkipReport,
    #[serde(flatten)]
    result: QueryResult,
}

async fn handler(
    Query(params): Query<DashboardQuery>,
    State(config): State<Config>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    let upload_id = Uuid::new_v4();
    info!("POST /dashboard - upload {} ({} bytes)", upload_id, body.len());

    let window_minutes = params
        .window_minutes
        .unwrap_or(config.default_window_minutes);
    if !config.window_allowed(window_minutes) {
        return Err(ApiError::BadRequest(format!(
            "window_minutes must be between {} and {}",
            config.min_window_minutes, config.max_window_minutes
        )));
    }
    let now = params
        .now
        .as_deref()
        .map(|text| {
            parse_timestamp(text)
                .ok_or_else(|| ApiError::BadRequest(format!("unparseable now '{text}'")))
        })
        .transpose()?;

    let upload = UploadQuery {
        format: params.format.clone(),
        topic: params.topic.clone(),
    };
    let ingestion = run_ingest(upload_id, &config, &upload, &body)?;

    let mut thresholds = config.thresholds();
    for (field, limit) in [
        (SensorField::Temperature, params.temp_max),
        (SensorField::Moisture, params.moisture_max),
        (SensorField::Co2, params.co2_max),
    ] {
        if let Some(limit) = limit {
            thresholds.set(Threshold::above(field, limit));
        }
    }

    let window = match now {
        Some(now) => TimeWindow::ending_at(now, window_minutes),
        None => TimeWindow::trailing(&ingestion.series, window_minutes)
            .ok_or(QueryError::EmptyWindow {
                window_minutes: i64::from(window_minutes),
            })?,
    };
    let result = info_span!("upload", %upload_id)
        .in_scope(|| query_at(&ingestion.series, &window, &thresholds))?;

    debug!(
        "POST /dashboard - returning {} records, {} alerts",
        result.series.len(),
        result.alerts.len()
    );
    Ok((
        StatusCode::OK,
        Json(DashboardResponse {
            upload_id,
            shape: ingestion.shape,
            skipped: ingestion.skipped,
            result,
        }),
    ))
}
