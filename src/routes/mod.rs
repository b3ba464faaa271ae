use axum::{extract::DefaultBodyLimit, Router};

use crate::Config;

mod api_error;
mod dashboard;
mod health;
mod ingest;

// ---

pub fn router(config: Config) -> Router {
    // ---
    let body_limit = DefaultBodyLimit::max(config.max_upload_bytes);

    Router::new()
        .merge(ingest::router())
        .merge(dashboard::router())
        .merge(health::router())
        .layer(body_limit)
        .with_state(config)
}
