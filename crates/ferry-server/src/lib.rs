//! Ferry Server Library
#![recursion_limit = "256"]
//!
//! Moves partner files from a remote source into a warehouse, exactly once
//! per file.
//!
//! # Overview
//!
//! - **Extraction**: list the partner source, land each new file in staging
//!   storage as gzip under a deterministic key
//! - **Loading**: on every staging notification, load the object into the
//!   warehouse table routed by its file type, then archive it
//! - **Ledger**: one PostgreSQL table records every landing and load; atomic
//!   reservations keep concurrent runs from duplicating work
//!
//! # Architecture
//!
//! Triggers (the interval orchestrator, `POST /api/v1/extract`, the `ferry`
//! CLI) call into [`ingest::Pipeline`]. Collaborators sit behind traits
//! (`SourceConnector`, `StagingStore`, `Warehouse`, `Ledger`) so the pipeline
//! runs unchanged against FTP, S3 and PostgreSQL in production or in-memory
//! fakes in tests.
//!
//! # Example
//!
//! ```no_run
//! use ferry_server::{api, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let state = api::AppState::from_config(&config).await?;
//!     api::serve(&config, state).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod storage;

// Re-export commonly used types
pub use error::AppError;
