//! Ferry Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging setup and payload helpers for the Ferry
//! workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`FerryError`] and the [`Result`] alias
//! - **Checksums**: content fingerprints for staged objects
//! - **Compression**: gzip encode/decode of partner payloads
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use ferry_common::{checksum, compression, Result};
//!
//! fn stage(raw: &[u8]) -> Result<String> {
//!     let gz = compression::gzip(raw)?;
//!     Ok(checksum::md5_hex(&gz))
//! }
//! ```

pub mod checksum;
pub mod compression;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{FerryError, Result};
