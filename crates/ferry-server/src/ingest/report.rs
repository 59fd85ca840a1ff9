//! Run results returned to triggers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::archiver::ArchiveOutcome;
use super::routing::Destination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Landed,
    Failed,
    Skipped,
}

/// Outcome for one source file of an extraction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub source_path: String,
    pub file_type: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FileResult {
    pub fn landed(source_path: &str, file_type: &str, object_uri: String) -> Self {
        Self {
            source_path: source_path.to_string(),
            file_type: file_type.to_string(),
            status: FileStatus::Landed,
            object_uri: Some(object_uri),
            detail: None,
        }
    }

    pub fn failed(source_path: &str, file_type: &str, error: impl Into<String>) -> Self {
        Self {
            source_path: source_path.to_string(),
            file_type: file_type.to_string(),
            status: FileStatus::Failed,
            object_uri: None,
            detail: Some(error.into()),
        }
    }

    pub fn skipped(source_path: &str, file_type: &str, reason: impl Into<String>) -> Self {
        Self {
            source_path: source_path.to_string(),
            file_type: file_type.to_string(),
            status: FileStatus::Skipped,
            object_uri: None,
            detail: Some(reason.into()),
        }
    }
}

/// Counts and per-file results of one extraction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandingReport {
    pub run_id: Uuid,
    pub source_system: String,
    pub discovered: usize,
    pub landed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files: Vec<FileResult>,
}

impl LandingReport {
    pub fn new(source_system: &str, discovered: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source_system: source_system.to_string(),
            discovered,
            landed: 0,
            failed: 0,
            skipped: 0,
            started_at: Utc::now(),
            finished_at: None,
            files: Vec::new(),
        }
    }

    pub fn record(&mut self, result: FileResult) {
        match result.status {
            FileStatus::Landed => self.landed += 1,
            FileStatus::Failed => self.failed += 1,
            FileStatus::Skipped => self.skipped += 1,
        }
        self.files.push(result);
    }

    /// Sort per-file results by path and stamp the end time
    pub fn complete(&mut self) {
        self.files.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        self.finished_at = Some(Utc::now());
    }
}

/// What happened to one storage notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadDisposition {
    /// Other bucket or outside the incoming namespace
    Ignored,
    /// Key does not parse or its file type has no route
    Unrecognized,
    AlreadyLoaded,
    /// Another run holds the load reservation
    InProgress,
    Loaded,
    Failed,
}

/// Result of handling one storage notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub bucket: String,
    pub object_key: String,
    pub disposition: LoadDisposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveOutcome>,
}

impl LoadReport {
    pub fn new(bucket: &str, object_key: &str, disposition: LoadDisposition) -> Self {
        Self {
            bucket: bucket.to_string(),
            object_key: object_key.to_string(),
            disposition,
            object_uri: None,
            destination: None,
            load_job_id: None,
            error: None,
            archive: None,
        }
    }
}
