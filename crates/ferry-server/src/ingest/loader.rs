//! Loading: staging notification -> warehouse load -> ledger outcome -> archive

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::archiver::Archiver;
use super::key::{KeyError, StagingKey};
use super::ledger::{HeldReservations, Ledger, LoadOutcome, LoadReservation};
use super::report::{LoadDisposition, LoadReport};
use super::routing::RoutingTable;
use super::staging::StagingStore;
use super::warehouse::{LoadFormat, LoadRequest, Warehouse, WriteMode};

/// Object-finalized event from staging storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNotification {
    pub bucket: String,
    /// Object key
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub source_system: String,
    pub incoming_prefix: String,
    /// Age after which a `LOADING` reservation is considered abandoned
    pub load_lease: Duration,
    pub format: LoadFormat,
    pub write_mode: WriteMode,
}

pub struct Loader {
    ledger: Arc<dyn Ledger>,
    staging: Arc<dyn StagingStore>,
    warehouse: Arc<dyn Warehouse>,
    routing: RoutingTable,
    archiver: Archiver,
    settings: LoaderSettings,
}

impl Loader {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        staging: Arc<dyn StagingStore>,
        warehouse: Arc<dyn Warehouse>,
        routing: RoutingTable,
        archiver: Archiver,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            ledger,
            staging,
            warehouse,
            routing,
            archiver,
            settings,
        }
    }

    /// Handle one notification. Returns an error only when the ledger cannot
    /// be consulted, so the notifier redelivers.
    ///
    /// An acquired load reservation is tracked in `held` (by object uri) until
    /// its outcome is written.
    #[instrument(skip(self, notification, held), fields(bucket = %notification.bucket, key = %notification.name))]
    pub async fn handle(
        &self,
        notification: &StorageNotification,
        held: &HeldReservations<String>,
    ) -> Result<LoadReport> {
        let report = |disposition| {
            LoadReport::new(&notification.bucket, &notification.name, disposition)
        };

        if notification.bucket != self.staging.bucket() {
            debug!("Notification for another bucket");
            return Ok(report(LoadDisposition::Ignored));
        }

        let key = match StagingKey::parse(&self.settings.incoming_prefix, &notification.name) {
            Ok(key) => key,
            Err(KeyError::OutsidePrefix { .. }) => {
                debug!("Object outside the incoming namespace");
                return Ok(report(LoadDisposition::Ignored));
            },
            Err(e) => {
                info!(error = %e, "Unrecognized staged object");
                let mut report = report(LoadDisposition::Unrecognized);
                report.error = Some(e.to_string());
                return Ok(report);
            },
        };

        let Some(destination) = self.routing.resolve(key.file_type()) else {
            info!(file_type = %key.file_type(), "No route for file type");
            return Ok(report(LoadDisposition::Unrecognized));
        };

        let object_uri = self.staging.uri(&notification.name);
        let mut report = report(LoadDisposition::Loaded);
        report.object_uri = Some(object_uri.clone());
        report.destination = Some(destination.clone());

        let system = &self.settings.source_system;
        if self
            .ledger
            .is_already_loaded(system, &object_uri)
            .await
            .context("Failed to check load state")?
        {
            info!(object_uri = %object_uri, "Already loaded");
            report.disposition = LoadDisposition::AlreadyLoaded;
            return Ok(report);
        }

        match self
            .ledger
            .reserve_load(system, &object_uri, self.settings.load_lease)
            .await
            .context("Failed to reserve load")?
        {
            LoadReservation::Acquired => held.hold(object_uri.clone()),
            LoadReservation::AlreadyLoaded => {
                report.disposition = LoadDisposition::AlreadyLoaded;
                return Ok(report);
            },
            LoadReservation::InProgress => {
                info!(object_uri = %object_uri, "Load already in progress");
                report.disposition = LoadDisposition::InProgress;
                return Ok(report);
            },
            LoadReservation::Missing => {
                warn!(object_uri = %object_uri, "No ledger row for staged object, loading anyway");
            },
        }

        let request = LoadRequest {
            source_uri: object_uri.clone(),
            object_key: notification.name.clone(),
            destination: destination.clone(),
            format: self.settings.format.clone(),
            write_mode: self.settings.write_mode,
        };

        match self.warehouse.load(&request).await {
            Ok(job) => {
                info!(
                    object_uri = %object_uri,
                    destination = %destination,
                    job_id = %job.job_id,
                    rows = job.rows_loaded,
                    "Load succeeded"
                );
                let outcome = LoadOutcome::Success {
                    destination,
                    load_job_id: job.job_id.clone(),
                    finished_at: Utc::now(),
                };
                self.record_outcome(&object_uri, &outcome).await;
                held.finish(&object_uri);

                report.load_job_id = Some(job.job_id);
                report.archive = Some(self.archiver.archive(&key).await);
            },
            Err(failure) => {
                warn!(object_uri = %object_uri, error = %failure, "Load failed");
                let outcome = LoadOutcome::Failed {
                    destination: Some(destination),
                    load_job_id: failure.job_id.clone(),
                    error: failure.message.clone(),
                    finished_at: Utc::now(),
                };
                self.record_outcome(&object_uri, &outcome).await;
                held.finish(&object_uri);

                report.disposition = LoadDisposition::Failed;
                report.load_job_id = failure.job_id;
                report.error = Some(failure.message);
            },
        }

        Ok(report)
    }

    async fn record_outcome(&self, object_uri: &str, outcome: &LoadOutcome) {
        match self
            .ledger
            .record_load_outcome(&self.settings.source_system, object_uri, outcome)
            .await
        {
            Ok(0) => warn!(
                object_uri = %object_uri,
                status = %outcome.status(),
                affected = 0,
                "No landed ledger row matched load outcome"
            ),
            Ok(_) => {},
            Err(e) => warn!(
                object_uri = %object_uri,
                status = %outcome.status(),
                error = %e,
                "Failed to write load outcome"
            ),
        }
    }
}
