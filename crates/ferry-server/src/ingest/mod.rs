//! Partner file ingestion
//!
//! Moves partner files through extract -> land -> load -> archive. The
//! [`ledger`] records every unit of work and is the only coordination point
//! between independently triggered runs.
//!
//! # Modules
//!
//! - **key**, **routing**: file type classification, staging key layout,
//!   file type -> warehouse table mapping
//! - **ledger**: idempotency ledger (`PgLedger`, `MemoryLedger`)
//! - **source**, **staging**, **warehouse**: collaborator seams and adapters
//! - **extractor**, **lander**, **loader**, **archiver**: the pipeline stages
//! - **pipeline**: facade exposing `run_extract` and `handle_notification`
//! - **orchestrator**: interval trigger for `run_extract`
//! - **config**: pipeline settings from the environment

pub mod archiver;
pub mod config;
pub mod extractor;
pub mod key;
pub mod lander;
pub mod ledger;
pub mod loader;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod routing;
pub mod source;
pub mod staging;
pub mod warehouse;

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

pub use config::{IngestConfig, LedgerBackend, SourceKind};
pub use ledger::{Ledger, LedgerEntry, LedgerFilter, LedgerStatus, MemoryLedger, PgLedger};
pub use loader::StorageNotification;
pub use orchestrator::ExtractOrchestrator;
pub use pipeline::{Collaborators, Pipeline, PipelineSettings, RunError};
pub use report::{LandingReport, LoadDisposition, LoadReport};

use crate::config::DatabaseConfig;
use crate::storage::Storage;
use source::{FtpConfig, FtpConnector, LocalDirConnector, SourceConnector};
use warehouse::PgWarehouse;

/// Build the production pipeline from configuration.
///
/// `db` hosts the ledger (unless the memory backend is selected) and, when no
/// separate warehouse database is configured, the warehouse tables too.
pub async fn build_pipeline(
    config: &IngestConfig,
    database: &DatabaseConfig,
    db: PgPool,
    storage: Storage,
) -> Result<Pipeline> {
    let ledger: Arc<dyn Ledger> = match config.ledger_backend {
        LedgerBackend::Postgres => Arc::new(PgLedger::new(db.clone())),
        LedgerBackend::Memory => {
            info!("Using in-memory ledger; state is lost on restart");
            Arc::new(MemoryLedger::new())
        },
    };

    let source: Arc<dyn SourceConnector> = match config.source.kind {
        SourceKind::Ftp => Arc::new(FtpConnector::new(FtpConfig {
            host: config.source.host.clone(),
            port: config.source.port,
            username: config.source.username.clone(),
            password: config.source.password.clone(),
        })),
        SourceKind::Local => Arc::new(LocalDirConnector::new(config.source.local_root.clone())),
    };

    let warehouse_pool = match &config.warehouse_database_url {
        Some(url) => {
            let pool = database
                .pool_options()
                .connect(url)
                .await
                .context("Failed to connect to warehouse database")?;
            crate::db::migrate(&pool).await?;
            pool
        },
        None => db,
    };

    let staging = Arc::new(storage);
    let warehouse = Arc::new(PgWarehouse::new(warehouse_pool, staging.clone()));

    Ok(Pipeline::new(
        config.pipeline_settings(),
        config.routing_table()?,
        Collaborators {
            ledger,
            source,
            staging,
            warehouse,
        },
    ))
}
