//! Pipeline configuration
//!
//! Loaded from environment variables (after `.env` has been read by
//! [`crate::config::Config::load`]). Every setting has a default suitable for
//! local development.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::key::normalize_prefix;
use super::pipeline::PipelineSettings;
use super::routing::{RoutingTable, DEFAULT_DATASET};
use super::warehouse::{LoadFormat, WriteMode};

pub const DEFAULT_SOURCE_SYSTEM: &str = "lifefile";
pub const DEFAULT_INCOMING_PREFIX: &str = "incoming";
pub const DEFAULT_PROCESSED_PREFIX: &str = "processed";
pub const DEFAULT_LANDING_CONCURRENCY: usize = 1;
pub const DEFAULT_LANDING_LEASE_SECS: u64 = 3600;
pub const DEFAULT_LOAD_LEASE_SECS: u64 = 3600;
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_EXTRACT_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_SOURCE_BASE_DIR: &str = "/outgoing";
pub const DEFAULT_SOURCE_PATTERNS: &str = "*.csv";
pub const DEFAULT_SOURCE_LOCAL_ROOT: &str = "./data/source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Ftp,
    Local,
}

impl std::str::FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ftp" => Ok(SourceKind::Ftp),
            "local" => Ok(SourceKind::Local),
            _ => Err(anyhow::anyhow!("Invalid SOURCE_KIND: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(LedgerBackend::Postgres),
            "memory" => Ok(LedgerBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid LEDGER_BACKEND: {}", s)),
        }
    }
}

/// Remote source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Directory listed on every run
    pub base_dir: String,
    /// Root directory for the `local` source kind
    pub local_root: PathBuf,
    pub patterns: Vec<String>,
}

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub source_system: String,
    pub incoming_prefix: String,
    pub processed_prefix: String,
    pub landing_concurrency: usize,
    pub landing_lease_secs: u64,
    pub load_lease_secs: u64,
    pub run_timeout_secs: u64,
    pub schedule_enabled: bool,
    pub extract_interval_secs: u64,
    pub require_route: bool,
    pub ledger_backend: LedgerBackend,
    pub write_mode: WriteMode,
    pub dataset: String,
    /// `type:table,...`; `None` keeps the built-in routes
    pub routes: Option<String>,
    /// Warehouse database; defaults to the ledger database
    pub warehouse_database_url: Option<String>,
    pub source: SourceConfig,
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl IngestConfig {
    /// Load pipeline configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load pipeline configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let write_mode = match lookup("WRITE_MODE").as_deref().map(str::to_lowercase) {
            None => WriteMode::Append,
            Some(mode) if mode == "append" => WriteMode::Append,
            Some(mode) if mode == "truncate" => WriteMode::Truncate,
            Some(other) => anyhow::bail!("Invalid WRITE_MODE: {}", other),
        };

        let config = Self {
            source_system: lookup("SOURCE_SYSTEM")
                .unwrap_or_else(|| DEFAULT_SOURCE_SYSTEM.to_string()),
            incoming_prefix: normalize_prefix(
                &lookup("INCOMING_PREFIX").unwrap_or_else(|| DEFAULT_INCOMING_PREFIX.to_string()),
            ),
            processed_prefix: normalize_prefix(
                &lookup("PROCESSED_PREFIX")
                    .unwrap_or_else(|| DEFAULT_PROCESSED_PREFIX.to_string()),
            ),
            landing_concurrency: parse_or(
                lookup("LANDING_CONCURRENCY"),
                DEFAULT_LANDING_CONCURRENCY,
            ),
            landing_lease_secs: parse_or(lookup("LANDING_LEASE_SECS"), DEFAULT_LANDING_LEASE_SECS),
            load_lease_secs: parse_or(lookup("LOAD_LEASE_SECS"), DEFAULT_LOAD_LEASE_SECS),
            run_timeout_secs: parse_or(lookup("RUN_TIMEOUT_SECS"), DEFAULT_RUN_TIMEOUT_SECS),
            schedule_enabled: parse_or(lookup("EXTRACT_SCHEDULE_ENABLED"), false),
            extract_interval_secs: parse_or(
                lookup("EXTRACT_INTERVAL_SECS"),
                DEFAULT_EXTRACT_INTERVAL_SECS,
            ),
            require_route: parse_or(lookup("EXTRACT_REQUIRE_ROUTE"), true),
            ledger_backend: match lookup("LEDGER_BACKEND") {
                Some(v) => v.parse()?,
                None => LedgerBackend::Postgres,
            },
            write_mode,
            dataset: lookup("WAREHOUSE_DATASET").unwrap_or_else(|| DEFAULT_DATASET.to_string()),
            routes: lookup("ROUTES").filter(|r| !r.trim().is_empty()),
            warehouse_database_url: lookup("WAREHOUSE_DATABASE_URL"),
            source: SourceConfig {
                kind: match lookup("SOURCE_KIND") {
                    Some(v) => v.parse()?,
                    None => SourceKind::Ftp,
                },
                host: lookup("SOURCE_HOST").unwrap_or_else(|| "localhost".to_string()),
                port: parse_or(lookup("SOURCE_PORT"), 21),
                username: lookup("SOURCE_USERNAME").unwrap_or_else(|| "anonymous".to_string()),
                password: lookup("SOURCE_PASSWORD").unwrap_or_default(),
                base_dir: lookup("SOURCE_BASE_DIR")
                    .unwrap_or_else(|| DEFAULT_SOURCE_BASE_DIR.to_string()),
                local_root: PathBuf::from(
                    lookup("SOURCE_LOCAL_ROOT")
                        .unwrap_or_else(|| DEFAULT_SOURCE_LOCAL_ROOT.to_string()),
                ),
                patterns: lookup("SOURCE_PATTERNS")
                    .unwrap_or_else(|| DEFAULT_SOURCE_PATTERNS.to_string())
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.source_system.trim().is_empty() {
            anyhow::bail!("SOURCE_SYSTEM cannot be empty");
        }
        if self.incoming_prefix.is_empty() || self.processed_prefix.is_empty() {
            anyhow::bail!("INCOMING_PREFIX and PROCESSED_PREFIX cannot be empty");
        }
        if self.incoming_prefix == self.processed_prefix {
            anyhow::bail!("INCOMING_PREFIX and PROCESSED_PREFIX must differ");
        }
        if self.landing_concurrency == 0 {
            anyhow::bail!("LANDING_CONCURRENCY must be greater than 0");
        }
        if self.landing_lease_secs == 0 || self.load_lease_secs == 0 {
            anyhow::bail!("Reservation leases must be greater than 0");
        }
        if self.run_timeout_secs == 0 {
            anyhow::bail!("RUN_TIMEOUT_SECS must be greater than 0");
        }
        if self.schedule_enabled && self.extract_interval_secs == 0 {
            anyhow::bail!("EXTRACT_INTERVAL_SECS must be greater than 0");
        }
        if self.source.patterns.is_empty() {
            anyhow::bail!("SOURCE_PATTERNS must contain at least one pattern");
        }
        if self.source.kind == SourceKind::Ftp && self.source.host.trim().is_empty() {
            anyhow::bail!("SOURCE_HOST is required for the ftp source");
        }
        self.routing_table()?;
        Ok(())
    }

    pub fn routing_table(&self) -> Result<RoutingTable> {
        match &self.routes {
            Some(routes) => {
                RoutingTable::parse(self.dataset.clone(), routes).context("Invalid ROUTES")
            },
            None => {
                let defaults = RoutingTable::default();
                let mut table = RoutingTable::new(self.dataset.clone());
                for file_type in defaults.file_types() {
                    if let Some(destination) = defaults.resolve(file_type) {
                        table = table.with_route(file_type.clone(), destination.table);
                    }
                }
                Ok(table)
            },
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            source_system: self.source_system.clone(),
            source_base_dir: self.source.base_dir.clone(),
            patterns: self.source.patterns.clone(),
            require_route: self.require_route,
            incoming_prefix: self.incoming_prefix.clone(),
            processed_prefix: self.processed_prefix.clone(),
            landing_concurrency: self.landing_concurrency,
            landing_lease: Duration::from_secs(self.landing_lease_secs),
            load_lease: Duration::from_secs(self.load_lease_secs),
            format: LoadFormat::default(),
            write_mode: self.write_mode,
        }
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn extract_interval(&self) -> Duration {
        Duration::from_secs(self.extract_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::key::FileType;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<IngestConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.incoming_prefix, "incoming");
        assert_eq!(config.processed_prefix, "processed");
        assert_eq!(config.landing_concurrency, 1);
        assert!(config.require_route);
        assert!(!config.schedule_enabled);
        assert_eq!(config.write_mode, WriteMode::Append);
        assert_eq!(config.source.patterns, vec!["*.csv"]);

        let routes = config.routing_table().unwrap();
        assert_eq!(routes.dataset(), "raw_lifefile");
        assert!(routes.contains(&FileType::new("payments").unwrap()));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("INCOMING_PREFIX", "/raw/incoming/"),
            ("WAREHOUSE_DATASET", "raw_partner"),
            ("ROUTES", "claims:claims_raw"),
            ("SOURCE_KIND", "local"),
            ("SOURCE_PATTERNS", "*.csv, *.txt ,"),
            ("WRITE_MODE", "TRUNCATE"),
            ("LANDING_CONCURRENCY", "4"),
        ])
        .unwrap();

        assert_eq!(config.incoming_prefix, "raw/incoming");
        assert_eq!(config.source.kind, SourceKind::Local);
        assert_eq!(config.source.patterns, vec!["*.csv", "*.txt"]);
        assert_eq!(config.write_mode, WriteMode::Truncate);

        let settings = config.pipeline_settings();
        assert_eq!(settings.landing_concurrency, 4);

        let routes = config.routing_table().unwrap();
        assert_eq!(
            routes.resolve(&FileType::new("claims").unwrap()).unwrap().to_string(),
            "raw_partner.claims_raw"
        );
        assert!(!routes.contains(&FileType::new("payments").unwrap()));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(load(&[("PROCESSED_PREFIX", "incoming")]).is_err());
        assert!(load(&[("LANDING_CONCURRENCY", "0")]).is_err());
        assert!(load(&[("ROUTES", "claims")]).is_err());
        assert!(load(&[("SOURCE_KIND", "sftp")]).is_err());
        assert!(load(&[("WRITE_MODE", "merge")]).is_err());
    }
}
