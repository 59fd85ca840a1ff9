//! Interval-driven extraction
//!
//! Runs [`Pipeline::run_extract`] on a fixed interval in a background task.
//! Each cycle is an independent run; a failed or timed-out cycle is logged and
//! the next tick tries again.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::pipeline::{Pipeline, RunError};

pub struct ExtractOrchestrator {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    run_timeout: Duration,
}

impl ExtractOrchestrator {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration, run_timeout: Duration) -> Self {
        Self {
            pipeline,
            interval,
            run_timeout,
        }
    }

    /// Start the orchestrator in background
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "Extraction orchestrator started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }

    /// Run one extraction cycle
    pub async fn run_cycle(&self) {
        match self.pipeline.run_extract_within(self.run_timeout).await {
            Ok(report) => info!(
                run_id = %report.run_id,
                landed = report.landed,
                failed = report.failed,
                skipped = report.skipped,
                "Scheduled extraction completed"
            ),
            Err(RunError::Timeout(limit)) => {
                error!(timeout = ?limit, "Scheduled extraction timed out")
            },
            Err(RunError::Failed(e)) => error!("Scheduled extraction failed: {:#}", e),
        }
    }
}
