//! Run extract command
//!
//! One extraction run: list the source, land every new matching file and
//! return the per-file report.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::RunTriggerError;
use crate::ingest::{LandingReport, Pipeline};

/// Command to start one extraction run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunExtractCommand {
    /// Overrides the configured run timeout, never extending it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Request<Result<LandingReport, RunTriggerError>> for RunExtractCommand {}

impl RunExtractCommand {
    pub fn validate(&self) -> Result<(), RunTriggerError> {
        if self.timeout_secs == Some(0) {
            return Err(RunTriggerError::Validation(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn effective_timeout(&self, configured: Duration) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .map_or(configured, |requested| requested.min(configured))
    }
}

#[tracing::instrument(skip(pipeline, command))]
pub async fn handle(
    pipeline: Arc<Pipeline>,
    command: RunExtractCommand,
    run_timeout: Duration,
) -> Result<LandingReport, RunTriggerError> {
    command.validate()?;

    let report = pipeline
        .run_extract_within(command.effective_timeout(run_timeout))
        .await?;

    Ok(report)
}
