//! Ledger queries

pub mod list_entries;

pub use list_entries::{ListLedgerEntriesError, ListLedgerEntriesQuery, ListLedgerEntriesResponse};
