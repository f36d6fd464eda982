//! HTTP entry point for storage notifications.
//! Accepts an S3-style event batch and returns the per-record outcomes.

use crate::{errors::AppError, models::event::StorageEvent, models::outcome::BatchResult, routes::routes::AppState};
use axum::{Json, body::Bytes, extract::State};
use tracing::info;

/// `POST /events`
///
/// The body is parsed by hand so malformed batches surface as the
/// service's JSON error shape instead of the extractor's plain-text rejection.
/// Record-level failures never fail the request; they are reported in the body.
pub async fn process_events(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BatchResult>, AppError> {
    let event: StorageEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid event batch: {}", e)))?;

    let result = state.pipeline.process_event(&event).await;
    info!(
        records = result.records.len(),
        succeeded = result.succeeded(),
        failed = result.failed(),
        "event batch processed"
    );
    Ok(Json(result))
}
