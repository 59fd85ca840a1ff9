//! Feature modules implementing the Ferry API
//!
//! Each feature is a vertical slice with its own commands or queries and
//! routes. Commands and queries implement the mediator pattern using the
//! `mediator` crate; handlers are standalone async functions.
//!
//! # Features
//!
//! - **runs**: triggers for an extraction run and for staging notifications
//! - **ledger**: read-only listing of ledger entries for operators

pub mod ledger;
pub mod runs;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::Pipeline;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub pipeline: Arc<Pipeline>,
    /// Upper bound for a triggered run
    pub run_timeout: Duration,
}

/// Creates the API router with all feature routes mounted
///
/// - `/extract`, `/notifications/storage` - Run triggers
/// - `/ledger` - Ledger listings
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .merge(runs::runs_routes())
        .nest("/ledger", ledger::ledger_routes())
        .with_state(state)
}
