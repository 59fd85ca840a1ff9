//! Warehouse bulk-load seam
//!
//! A load is one blocking call: submit the job, wait for its terminal state,
//! and return either the job id or a [`LoadFailure`] that still carries the job
//! id when one was assigned.

pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::routing::Destination;

pub use postgres::PgWarehouse;

/// Compression of the staged object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
}

/// Delimited-text format descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFormat {
    pub delimiter: u8,
    pub quote: u8,
    /// Leading rows to skip; the first one names the columns
    pub skip_leading_rows: usize,
    pub allow_quoted_newlines: bool,
    pub compression: Compression,
    /// Infer column types from the data
    pub autodetect: bool,
}

impl Default for LoadFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            skip_leading_rows: 1,
            allow_quoted_newlines: true,
            compression: Compression::Gzip,
            autodetect: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Append,
    Truncate,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "APPEND",
            WriteMode::Truncate => "TRUNCATE",
        }
    }
}

/// One bulk load
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub source_uri: String,
    pub object_key: String,
    pub destination: Destination,
    pub format: LoadFormat,
    pub write_mode: WriteMode,
}

/// Completed load job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub job_id: String,
    pub rows_loaded: u64,
}

/// Load that did not complete
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadFailure {
    pub job_id: Option<String>,
    pub message: String,
}

impl LoadFailure {
    pub fn new(job_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            job_id,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Submit the load and wait for it to finish
    async fn load(&self, request: &LoadRequest) -> Result<LoadJob, LoadFailure>;
}
