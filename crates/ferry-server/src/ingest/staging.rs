//! Staging storage seam

use anyhow::Result;
use async_trait::async_trait;

use super::ledger::ObjectFingerprint;

/// Content type of every landed object
pub const STAGED_CONTENT_TYPE: &str = "application/gzip";

/// Result of a staging write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    pub key: String,
    pub uri: String,
    pub fingerprint: ObjectFingerprint,
}

/// Object store holding landed files between landing and loading
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Bucket (or container) name notifications refer to
    fn bucket(&self) -> &str;

    /// Canonical URI of an object, recorded in the ledger
    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket(), key)
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<StagedObject>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn copy(&self, from_key: &str, to_key: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
