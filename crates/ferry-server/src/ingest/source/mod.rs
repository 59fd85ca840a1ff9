//! Remote source access
//!
//! A [`SourceConnector`] opens one [`SourceSession`] per run. The session is
//! shared by every file of the run and must be closed on every exit path.

pub mod ftp;
pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use ftp::{FtpConfig, FtpConnector};
pub use local::LocalDirConnector;

/// One item of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

impl SourceEntry {
    pub fn file(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
            size,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            size: None,
        }
    }
}

/// Factory for per-run sessions
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Open a connected session. Failure here aborts the run.
    async fn open(&self) -> Result<Box<dyn SourceSession>>;
}

/// Connected source, usable from several tasks of the same run
#[async_trait]
pub trait SourceSession: Send + Sync {
    /// List the entries of `dir` (names only, not paths)
    async fn list(&self, dir: &str) -> Result<Vec<SourceEntry>>;

    /// Read a whole file
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;

    /// Release the connection
    async fn close(&self) -> Result<()>;
}

/// Join a base directory and an entry name with a single `/`
pub fn join_path(base_dir: &str, name: &str) -> String {
    let base = base_dir.trim_end_matches('/');
    if base.is_empty() && !base_dir.starts_with('/') {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/outgoing", "a.csv"), "/outgoing/a.csv");
        assert_eq!(join_path("/outgoing/", "a.csv"), "/outgoing/a.csv");
        assert_eq!(join_path("/", "a.csv"), "/a.csv");
        assert_eq!(join_path("", "a.csv"), "a.csv");
    }
}
