//! Run triggers
//!
//! `POST /extract` performs one extraction run; `POST /notifications/storage`
//! handles one staging notification. Both are bounded by the configured run
//! timeout.

pub mod commands;
pub mod routes;

pub use commands::{HandleNotificationCommand, RunExtractCommand, RunTriggerError};
pub use routes::runs_routes;
