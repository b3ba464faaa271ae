//! Mapping of pipeline errors onto HTTP responses.
//!
//! Pipeline failures are user-facing and recoverable, so they become `422`
//! with a machine-readable kind; malformed request parameters become `400`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use crate::{IngestError, QueryError};

#[derive(Debug)]
pub(super) enum ApiError {
    BadRequest(String),
    Ingest(IngestError),
    Query(QueryError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Ingest(err)
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "bad_request",
                    message,
                },
            ),
            ApiError::Ingest(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: err.kind(),
                    message: err.to_string(),
                },
            ),
            ApiError::Query(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: err.kind(),
                    message: err.to_string(),
                },
            ),
        };

        warn!("Request failed ({}): {}", body.error, body.message);
        (status, Json(body)).into_response()
    }
}
