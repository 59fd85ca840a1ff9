//! Pipeline facade
//!
//! Wires extractor, lander, loader and archiver to the injected collaborators
//! and exposes the two trigger entry points.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::archiver::Archiver;
use super::extractor::Extractor;
use super::lander::{Lander, LanderSettings};
use super::ledger::{HeldReservations, Ledger, RUN_TIMED_OUT_ERROR};
use super::loader::{Loader, LoaderSettings, StorageNotification};
use super::report::{LandingReport, LoadReport};
use super::routing::RoutingTable;
use super::source::SourceConnector;
use super::staging::StagingStore;
use super::warehouse::{LoadFormat, Warehouse, WriteMode};

/// Failure of a run started by a trigger
#[derive(Debug, Error)]
pub enum RunError {
    #[error("run exceeded {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub source_system: String,
    pub source_base_dir: String,
    pub patterns: Vec<String>,
    pub require_route: bool,
    pub incoming_prefix: String,
    pub processed_prefix: String,
    pub landing_concurrency: usize,
    pub landing_lease: Duration,
    pub load_lease: Duration,
    pub format: LoadFormat,
    pub write_mode: WriteMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            source_system: "lifefile".to_string(),
            source_base_dir: "/outgoing".to_string(),
            patterns: vec!["*.csv".to_string()],
            require_route: true,
            incoming_prefix: "incoming".to_string(),
            processed_prefix: "processed".to_string(),
            landing_concurrency: 1,
            landing_lease: Duration::from_secs(3600),
            load_lease: Duration::from_secs(3600),
            format: LoadFormat::default(),
            write_mode: WriteMode::Append,
        }
    }
}

/// Collaborators injected into a [`Pipeline`]
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub source: Arc<dyn SourceConnector>,
    pub staging: Arc<dyn StagingStore>,
    pub warehouse: Arc<dyn Warehouse>,
}

pub struct Pipeline {
    settings: PipelineSettings,
    ledger: Arc<dyn Ledger>,
    source: Arc<dyn SourceConnector>,
    extractor: Extractor,
    lander: Lander,
    loader: Loader,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, routing: RoutingTable, deps: Collaborators) -> Self {
        let extractor = Extractor::new(
            settings.source_base_dir.clone(),
            settings.patterns.clone(),
            routing.clone(),
            settings.require_route,
        );

        let lander = Lander::new(
            deps.ledger.clone(),
            deps.staging.clone(),
            LanderSettings {
                source_system: settings.source_system.clone(),
                incoming_prefix: settings.incoming_prefix.clone(),
                concurrency: settings.landing_concurrency,
                landing_lease: settings.landing_lease,
            },
        );

        let archiver = Archiver::new(deps.staging.clone(), settings.processed_prefix.clone());
        let loader = Loader::new(
            deps.ledger.clone(),
            deps.staging.clone(),
            deps.warehouse,
            routing,
            archiver,
            LoaderSettings {
                source_system: settings.source_system.clone(),
                incoming_prefix: settings.incoming_prefix.clone(),
                load_lease: settings.load_lease,
                format: settings.format.clone(),
                write_mode: settings.write_mode,
            },
        );

        Self {
            settings,
            ledger: deps.ledger,
            source: deps.source,
            extractor,
            lander,
            loader,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Scheduled trigger: discover and land every new source file.
    ///
    /// Fails only when the source cannot be opened or listed; per-file
    /// failures are part of the report.
    pub async fn run_extract(&self) -> Result<LandingReport> {
        self.extract(&HeldReservations::new()).await
    }

    #[instrument(skip(self, held), fields(source_system = %self.settings.source_system))]
    async fn extract(&self, held: &HeldReservations<Uuid>) -> Result<LandingReport> {
        let session = self.source.open().await.context("Failed to open source")?;

        let result = async {
            let items = self.extractor.discover(session.as_ref()).await?;
            Ok::<_, anyhow::Error>(self.lander.land_all(session.as_ref(), items, held).await)
        }
        .await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close source session");
        }

        let report = result?;
        info!(
            discovered = report.discovered,
            landed = report.landed,
            failed = report.failed,
            skipped = report.skipped,
            "Extraction run finished"
        );
        Ok(report)
    }

    /// [`run_extract`](Self::run_extract) bounded by `limit`. Files completed
    /// before the deadline stay landed; landings still in flight are closed as
    /// `LAND_FAILED` so the next run retries them.
    pub async fn run_extract_within(&self, limit: Duration) -> Result<LandingReport, RunError> {
        let held = HeldReservations::new();
        match tokio::time::timeout(limit, self.extract(&held)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(timeout = ?limit, "Extraction run timed out");
                for entry_id in held.drain() {
                    match self.ledger.release_landing(entry_id, RUN_TIMED_OUT_ERROR).await {
                        Ok(_) => info!(entry_id = %entry_id, "Released landing reservation"),
                        Err(e) => warn!(
                            entry_id = %entry_id,
                            error = %e,
                            "Failed to release landing reservation"
                        ),
                    }
                }
                Err(RunError::Timeout(limit))
            },
        }
    }

    /// Staging-change trigger: load the notified object if it is new
    pub async fn handle_notification(&self, notification: StorageNotification) -> Result<LoadReport> {
        self.loader.handle(&notification, &HeldReservations::new()).await
    }

    /// [`handle_notification`](Self::handle_notification) bounded by `limit`.
    /// A load cut off by the deadline is closed as `FAILED`, so a redelivered
    /// notification retries it immediately.
    pub async fn handle_notification_within(
        &self,
        notification: StorageNotification,
        limit: Duration,
    ) -> Result<LoadReport, RunError> {
        let held = HeldReservations::new();
        match tokio::time::timeout(limit, self.loader.handle(&notification, &held)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(timeout = ?limit, "Notification handling timed out");
                let system = &self.settings.source_system;
                for object_uri in held.drain() {
                    match self
                        .ledger
                        .release_load(system, &object_uri, RUN_TIMED_OUT_ERROR)
                        .await
                    {
                        Ok(_) => info!(object_uri = %object_uri, "Released load reservation"),
                        Err(e) => warn!(
                            object_uri = %object_uri,
                            error = %e,
                            "Failed to release load reservation"
                        ),
                    }
                }
                Err(RunError::Timeout(limit))
            },
        }
    }
}
