//! Ledger feature module
//!
//! Read-only listing of ledger entries. NO writes are exposed.

pub mod queries;
pub mod routes;

pub use queries::{ListLedgerEntriesError, ListLedgerEntriesQuery, ListLedgerEntriesResponse};
pub use routes::ledger_routes;
