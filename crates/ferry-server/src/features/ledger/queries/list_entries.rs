//! List ledger entries query

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::ingest::{LedgerEntry, LedgerFilter, LedgerStatus, Pipeline};

/// Query parameters for listing ledger entries
///
/// Filters combine with AND. `source_system` defaults to the configured one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListLedgerEntriesQuery {
    pub source_system: Option<String>,
    pub source_path: Option<String>,
    pub object_uri: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListLedgerEntriesResponse {
    pub entries: Vec<LedgerEntry>,
    pub count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ListLedgerEntriesError {
    #[error("Invalid status filter: {0}")]
    InvalidStatus(String),
    #[error("Limit must be between 1 and 1000")]
    InvalidLimit,
    #[error("Ledger error: {0:#}")]
    Ledger(#[from] anyhow::Error),
}

impl From<ListLedgerEntriesError> for AppError {
    fn from(err: ListLedgerEntriesError) -> Self {
        match err {
            ListLedgerEntriesError::Ledger(e) => {
                AppError::Unavailable(format!("Ledger unavailable: {:#}", e))
            },
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl Request<Result<ListLedgerEntriesResponse, ListLedgerEntriesError>>
    for ListLedgerEntriesQuery
{
}

impl ListLedgerEntriesQuery {
    pub fn into_filter(self, default_system: &str) -> Result<LedgerFilter, ListLedgerEntriesError> {
        if let Some(limit) = self.limit {
            if !(1..=1000).contains(&limit) {
                return Err(ListLedgerEntriesError::InvalidLimit);
            }
        }

        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(
                s.parse::<LedgerStatus>()
                    .map_err(|_| ListLedgerEntriesError::InvalidStatus(s.to_string()))?,
            ),
            None => None,
        };

        Ok(LedgerFilter {
            source_system: Some(
                self.source_system
                    .unwrap_or_else(|| default_system.to_string()),
            ),
            source_path: self.source_path,
            object_uri: self.object_uri,
            status,
            limit: self.limit,
        })
    }
}

pub async fn handle(
    pipeline: Arc<Pipeline>,
    query: ListLedgerEntriesQuery,
) -> Result<ListLedgerEntriesResponse, ListLedgerEntriesError> {
    let filter = query.into_filter(&pipeline.settings().source_system)?;
    let entries = pipeline.ledger().list_entries(&filter).await?;

    Ok(ListLedgerEntriesResponse {
        count: entries.len(),
        entries,
    })
}
