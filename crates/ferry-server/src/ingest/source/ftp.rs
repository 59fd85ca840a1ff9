//! FTP source
//!
//! `suppaftp::FtpStream` is blocking, so every command runs inside
//! `tokio::task::spawn_blocking`. One control connection is opened per run and
//! reused for every listing and download of that run. There are no in-process
//! retries: a failed command fails the file (or the run, for the listing) and
//! the next trigger tries again.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::io::Read;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use suppaftp::list::File;
use suppaftp::FtpStream;
use tracing::{debug, info, instrument, warn};

use super::{SourceConnector, SourceEntry, SourceSession};

/// FTP connection settings
#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: "anonymous@".to_string(),
        }
    }
}

/// Opens authenticated FTP sessions
pub struct FtpConnector {
    config: FtpConfig,
}

impl FtpConnector {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    fn connect_sync(config: &FtpConfig) -> Result<FtpStream> {
        debug!("Connecting to FTP server: {}:{}", config.host, config.port);

        let mut stream = FtpStream::connect(format!("{}:{}", config.host, config.port))
            .context("Failed to connect to FTP server")?;

        // Extended passive mode copes with NAT between us and the partner.
        stream.set_mode(suppaftp::Mode::ExtendedPassive);

        stream
            .login(&config.username, &config.password)
            .context("FTP login failed")?;

        stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .context("Failed to set binary mode")?;

        Ok(stream)
    }
}

#[async_trait]
impl SourceConnector for FtpConnector {
    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn open(&self) -> Result<Box<dyn SourceSession>> {
        let config = self.config.clone();
        let stream = tokio::task::spawn_blocking(move || Self::connect_sync(&config))
            .await
            .map_err(|e| anyhow!("FTP connect task panicked: {}", e))??;

        info!("FTP session opened");
        Ok(Box::new(FtpSession {
            stream: Arc::new(Mutex::new(Some(stream))),
        }))
    }
}

/// One authenticated FTP control connection
pub struct FtpSession {
    stream: Arc<Mutex<Option<FtpStream>>>,
}

impl FtpSession {
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> Result<T> + Send + 'static,
    {
        let stream = self.stream.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = stream
                .lock()
                .map_err(|_| anyhow!("FTP session lock poisoned"))?;
            let stream = guard
                .as_mut()
                .ok_or_else(|| anyhow!("FTP session already closed"))?;
            op(stream)
        })
        .await
        .map_err(|e| anyhow!("FTP task panicked: {}", e))?
    }
}

#[async_trait]
impl SourceSession for FtpSession {
    #[instrument(skip(self))]
    async fn list(&self, dir: &str) -> Result<Vec<SourceEntry>> {
        let path = dir.to_string();
        let lines = self
            .run(move |stream| {
                stream
                    .list(Some(&path))
                    .with_context(|| format!("Failed to list directory: {}", path))
            })
            .await?;

        let entries: Vec<SourceEntry> = lines.iter().filter_map(|l| parse_list_line(l)).collect();
        debug!("Listed {} entries", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let path = path.to_string();
        let data = self
            .run(move |stream| {
                let mut reader = stream
                    .retr_as_buffer(&path)
                    .with_context(|| format!("Failed to download file: {}", path))?;
                let mut data = Vec::new();
                reader
                    .read_to_end(&mut data)
                    .context("Failed to read file data")?;
                Ok(data)
            })
            .await?;

        debug!("Downloaded {} bytes", data.len());
        Ok(data)
    }

    async fn close(&self) -> Result<()> {
        let stream = self.stream.clone();
        tokio::task::spawn_blocking(move || {
            let taken = stream
                .lock()
                .map_err(|_| anyhow!("FTP session lock poisoned"))?
                .take();
            if let Some(mut stream) = taken {
                if let Err(e) = stream.quit() {
                    warn!("Failed to quit FTP session gracefully: {}", e);
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("FTP close task panicked: {}", e))?
    }
}

/// Parse one LIST line, POSIX or DOS style
///
/// `-rw-r--r--   1 ftp ftp  1234 Nov 15 12:00 payments_2025-11-15.csv`
fn parse_list_line(line: &str) -> Option<SourceEntry> {
    let file = File::from_str(line).ok()?;
    let name = file.name();
    if name == "." || name == ".." {
        return None;
    }

    if file.is_directory() {
        return Some(SourceEntry::directory(name));
    }
    Some(SourceEntry::file(name, Some(file.size() as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_line() {
        let entry =
            parse_list_line("-rw-r--r--   1 ftp ftp  123456 Nov 15 12:00 payments_2025-11-15.csv")
                .unwrap();
        assert_eq!(entry.name, "payments_2025-11-15.csv");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, Some(123456));
    }

    #[test]
    fn test_parse_directory_line() {
        let entry = parse_list_line("drwxr-xr-x   2 ftp ftp  4096 Nov 15 12:00 archive").unwrap();
        assert!(entry.is_directory);
        assert_eq!(entry.size, None);
    }

    #[test]
    fn test_parse_skips_noise() {
        assert!(parse_list_line("").is_none());
        assert!(parse_list_line("total 8").is_none());
        assert!(parse_list_line("drwxr-xr-x   2 ftp ftp  4096 Nov 15 12:00 ..").is_none());
    }

    #[test]
    fn test_parse_name_with_spaces() {
        let entry =
            parse_list_line("-rw-r--r--   1 ftp ftp  2048 Nov 15 12:00 payments 2025-11-15 final.csv")
                .unwrap();
        assert_eq!(entry.name, "payments 2025-11-15 final.csv");
        assert_eq!(entry.size, Some(2048));

        let entry = parse_list_line("11-15-25  12:00PM       <DIR>          old runs").unwrap();
        assert!(entry.is_directory);
        assert_eq!(entry.name, "old runs");
    }
}
