//! Run trigger commands

pub mod extract;
pub mod notify;

use thiserror::Error;

use crate::error::AppError;
use crate::ingest::RunError;

pub use extract::RunExtractCommand;
pub use notify::HandleNotificationCommand;

/// Errors shared by the run triggers
#[derive(Debug, Error)]
pub enum RunTriggerError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Run(#[from] RunError),
}

impl From<RunTriggerError> for AppError {
    fn from(err: RunTriggerError) -> Self {
        match err {
            RunTriggerError::Validation(message) => AppError::BadRequest(message),
            RunTriggerError::Run(e) => e.into(),
        }
    }
}
