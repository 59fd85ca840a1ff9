//! Local directory source, for development and drop-folder deployments

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use super::{SourceConnector, SourceEntry, SourceSession};

/// Reads files under a root directory. Source paths are resolved relative to
/// the root, so `/outgoing/a.csv` maps to `<root>/outgoing/a.csv`.
#[derive(Debug, Clone)]
pub struct LocalDirConnector {
    root: PathBuf,
}

impl LocalDirConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceConnector for LocalDirConnector {
    async fn open(&self) -> Result<Box<dyn SourceSession>> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .with_context(|| format!("Source root not accessible: {}", self.root.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("Source root is not a directory: {}", self.root.display());
        }

        Ok(Box::new(LocalDirSession {
            root: self.root.clone(),
        }))
    }
}

pub struct LocalDirSession {
    root: PathBuf,
}

impl LocalDirSession {
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl SourceSession for LocalDirSession {
    async fn list(&self, dir: &str) -> Result<Vec<SourceEntry>> {
        let dir = self.resolve(dir);
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to list directory: {}", dir.display()))?;

        let mut entries = Vec::new();
        while let Some(item) = read_dir.next_entry().await? {
            let meta = item.metadata().await?;
            let name = item.file_name().to_string_lossy().to_string();
            entries.push(if meta.is_dir() {
                SourceEntry::directory(name)
            } else {
                SourceEntry::file(name, Some(meta.len()))
            });
        }

        Ok(entries)
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read file: {}", full.display()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
