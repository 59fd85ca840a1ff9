//! Run trigger routes
//!
//! - `POST /api/v1/extract` - Run one extraction
//! - `POST /api/v1/notifications/storage` - Handle one staging notification

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use super::commands::{extract, notify, HandleNotificationCommand, RunExtractCommand};
use crate::error::AppError;
use crate::features::FeatureState;
use crate::ingest::report::LoadDisposition;

pub fn runs_routes() -> Router<FeatureState> {
    Router::new()
        .route("/extract", post(run_extract))
        .route("/notifications/storage", post(handle_notification))
}

/// Run one extraction
///
/// The body is optional; `{"timeout_secs": 120}` shortens the run timeout.
///
/// - `200 OK` - Landing report, including per-file failures
/// - `504 Gateway Timeout` - Run exceeded its timeout
/// - `500 Internal Server Error` - Source unavailable or listing failed
async fn run_extract(
    State(state): State<FeatureState>,
    command: Option<Json<RunExtractCommand>>,
) -> Result<Response, AppError> {
    let command = command.map(|Json(c)| c).unwrap_or_default();
    let report = extract::handle(state.pipeline.clone(), command, state.run_timeout).await?;

    tracing::info!(
        run_id = %report.run_id,
        landed = report.landed,
        failed = report.failed,
        "Extraction triggered via API"
    );

    Ok((StatusCode::OK, Json(report)).into_response())
}

/// Handle one staging notification
///
/// ```json
/// { "bucket": "ferry-staging", "name": "incoming/payments/2025/11/15/payments_2025-11-15T10-00-00-000000Z_batch01.csv.gz" }
/// ```
///
/// - `200 OK` - Load report (loaded, failed, already loaded, ignored, ...)
/// - `409 Conflict` - Another run holds the load reservation; redeliver later
/// - `400 Bad Request` - Missing bucket or name
/// - `504 Gateway Timeout` - Load exceeded the run timeout; redeliver
/// - `500 Internal Server Error` - Ledger unavailable; redeliver
async fn handle_notification(
    State(state): State<FeatureState>,
    Json(command): Json<HandleNotificationCommand>,
) -> Result<Response, AppError> {
    let report = notify::handle(state.pipeline.clone(), command, state.run_timeout).await?;
    let status = match report.disposition {
        LoadDisposition::InProgress => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(report)).into_response())
}
