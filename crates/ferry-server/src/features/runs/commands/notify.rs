//! Handle notification command
//!
//! Delivered once per object-finalized event in staging storage. An `Err`
//! result means the ledger could not be consulted and the notifier should
//! redeliver; every other outcome is in the returned report.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::RunTriggerError;
use crate::ingest::{LoadReport, Pipeline, StorageNotification};

/// Command carrying one staging notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleNotificationCommand {
    pub bucket: String,
    /// Object key
    pub name: String,
}

impl Request<Result<LoadReport, RunTriggerError>> for HandleNotificationCommand {}

impl HandleNotificationCommand {
    pub fn validate(&self) -> Result<(), RunTriggerError> {
        if self.bucket.trim().is_empty() {
            return Err(RunTriggerError::Validation("bucket is required".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(RunTriggerError::Validation("name is required".to_string()));
        }
        Ok(())
    }
}

impl From<HandleNotificationCommand> for StorageNotification {
    fn from(command: HandleNotificationCommand) -> Self {
        StorageNotification {
            bucket: command.bucket,
            name: command.name,
        }
    }
}

#[tracing::instrument(skip(pipeline, command), fields(bucket = %command.bucket, name = %command.name))]
pub async fn handle(
    pipeline: Arc<Pipeline>,
    command: HandleNotificationCommand,
    run_timeout: Duration,
) -> Result<LoadReport, RunTriggerError> {
    command.validate()?;

    let report = pipeline
        .handle_notification_within(command.into(), run_timeout)
        .await?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let command = HandleNotificationCommand {
            bucket: "ferry-staging".to_string(),
            name: "incoming/payments/2025/01/15/payments_20250115_0001.csv.gz".to_string(),
        };
        assert!(command.validate().is_ok());

        let missing_name = HandleNotificationCommand {
            name: " ".to_string(),
            ..command.clone()
        };
        assert!(missing_name.validate().is_err());

        let notification: StorageNotification = command.into();
        assert_eq!(notification.bucket, "ferry-staging");
    }
}
