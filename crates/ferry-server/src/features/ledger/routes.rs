//! Ledger routes
//!
//! `GET /api/v1/ledger?source_path=&object_uri=&status=&limit=`

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use super::queries::{list_entries, ListLedgerEntriesQuery};
use crate::error::AppError;
use crate::features::FeatureState;

pub fn ledger_routes() -> Router<FeatureState> {
    Router::new().route("/", get(list_ledger_entries))
}

async fn list_ledger_entries(
    State(state): State<FeatureState>,
    Query(query): Query<ListLedgerEntriesQuery>,
) -> Result<Response, AppError> {
    let response = list_entries::handle(state.pipeline.clone(), query).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}
