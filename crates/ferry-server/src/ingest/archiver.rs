//! Post-load relocation of staged objects
//!
//! Copy into the processed namespace first, delete from incoming second. A
//! failure part-way leaves at worst a duplicate copy, never a lost object.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::key::StagingKey;
use super::staging::StagingStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Archived { processed_uri: String },
    /// Nothing moved; the object is still in incoming
    CopyFailed { error: String },
    /// The processed copy exists but the incoming object was not removed
    DeleteFailed { processed_uri: String, error: String },
}

impl ArchiveOutcome {
    pub fn is_archived(&self) -> bool {
        matches!(self, ArchiveOutcome::Archived { .. })
    }
}

pub struct Archiver {
    staging: Arc<dyn StagingStore>,
    processed_prefix: String,
}

impl Archiver {
    pub fn new(staging: Arc<dyn StagingStore>, processed_prefix: impl Into<String>) -> Self {
        Self {
            staging,
            processed_prefix: processed_prefix.into(),
        }
    }

    /// Best-effort: failures are logged and reported, never raised
    pub async fn archive(&self, key: &StagingKey) -> ArchiveOutcome {
        let from = key.object_key();
        let to = key.relocated(&self.processed_prefix).object_key();
        let processed_uri = self.staging.uri(&to);

        if let Err(e) = self.staging.copy(&from, &to).await {
            warn!(from = %from, to = %to, error = %e, "Archive copy failed");
            return ArchiveOutcome::CopyFailed {
                error: format!("{:#}", e),
            };
        }

        if let Err(e) = self.staging.delete(&from).await {
            warn!(key = %from, error = %e, "Archive delete failed, processed copy kept");
            return ArchiveOutcome::DeleteFailed {
                processed_uri,
                error: format!("{:#}", e),
            };
        }

        info!(from = %from, to = %to, "Archived staged object");
        ArchiveOutcome::Archived { processed_uri }
    }
}
