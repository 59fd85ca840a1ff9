//! Landing: source file -> gzip -> staging object -> ledger row

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ferry_common::compression::gzip;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use tracing::{debug, info, instrument, warn};

use super::extractor::WorkItem;
use super::key::{logical_date_from_source_name, StagingKey};
use super::ledger::{HeldReservations, LandingClaim, Ledger, LedgerEntry, Reservation};
use super::report::{FileResult, LandingReport};
use super::source::SourceSession;
use super::staging::{StagedObject, StagingStore, STAGED_CONTENT_TYPE};

#[derive(Debug, Clone)]
pub struct LanderSettings {
    pub source_system: String,
    pub incoming_prefix: String,
    /// Files landed in parallel within one run
    pub concurrency: usize,
    /// Age after which a `LANDING` reservation is considered abandoned
    pub landing_lease: Duration,
}

pub struct Lander {
    ledger: Arc<dyn Ledger>,
    staging: Arc<dyn StagingStore>,
    settings: LanderSettings,
}

impl Lander {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        staging: Arc<dyn StagingStore>,
        settings: LanderSettings,
    ) -> Self {
        Self {
            ledger,
            staging,
            settings,
        }
    }

    /// Land every item not yet landed. Individual failures are recorded in the
    /// report and never stop the run.
    ///
    /// Landing reservations are tracked in `held` until their terminal record
    /// is written.
    pub async fn land_all(
        &self,
        session: &dyn SourceSession,
        items: Vec<WorkItem>,
        held: &HeldReservations<Uuid>,
    ) -> LandingReport {
        let mut report = LandingReport::new(&self.settings.source_system, items.len());
        let mut pending = Vec::with_capacity(items.len());

        for item in items {
            match self
                .ledger
                .is_already_landed(&self.settings.source_system, &item.source_path)
                .await
            {
                Ok(true) => {
                    debug!(source_path = %item.source_path, "Already landed");
                    report.record(FileResult::skipped(
                        &item.source_path,
                        item.file_type.as_str(),
                        "already landed",
                    ));
                },
                Ok(false) => pending.push(item),
                Err(e) => {
                    warn!(source_path = %item.source_path, error = %e, "Ledger lookup failed");
                    report.record(FileResult::failed(
                        &item.source_path,
                        item.file_type.as_str(),
                        format!("ledger lookup failed: {:#}", e),
                    ));
                },
            }
        }

        // Sequences are fixed before dispatch so names do not depend on scheduling.
        let concurrency = self.settings.concurrency.max(1);
        let results: Vec<FileResult> = stream::iter(
            pending
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.land_one(session, item, i as u32 + 1, held)),
        )
        .buffer_unordered(concurrency)
        .collect()
        .await;

        for result in results {
            report.record(result);
        }
        report.complete();

        info!(
            run_id = %report.run_id,
            landed = report.landed,
            failed = report.failed,
            skipped = report.skipped,
            "Landing run completed"
        );
        report
    }

    #[instrument(skip(self, session, item, held), fields(source_path = %item.source_path))]
    async fn land_one(
        &self,
        session: &dyn SourceSession,
        item: WorkItem,
        sequence: u32,
        held: &HeldReservations<Uuid>,
    ) -> FileResult {
        let claim = LandingClaim {
            source_system: self.settings.source_system.clone(),
            source_path: item.source_path.clone(),
            file_type: item.file_type.clone(),
            lease: self.settings.landing_lease,
        };

        let entry_id = match self.ledger.reserve_landing(&claim).await {
            Ok(Reservation::Acquired(id)) => id,
            Ok(Reservation::Held) => {
                return FileResult::skipped(
                    &item.source_path,
                    item.file_type.as_str(),
                    "landing reserved by another run",
                );
            },
            Err(e) => {
                warn!(error = %e, "Landing reservation failed");
                return FileResult::failed(
                    &item.source_path,
                    item.file_type.as_str(),
                    format!("landing reservation failed: {:#}", e),
                );
            },
        };

        held.hold(entry_id);
        let result = self.land_reserved(session, &item, sequence, entry_id).await;
        held.finish(&entry_id);
        result
    }

    async fn land_reserved(
        &self,
        session: &dyn SourceSession,
        item: &WorkItem,
        sequence: u32,
        entry_id: Uuid,
    ) -> FileResult {
        let started_at = Utc::now();
        match self.transfer(session, item, sequence).await {
            Ok((staged, landed_at)) => {
                let file_date = logical_date_from_source_name(&item.file_name)
                    .or_else(|| Some(landed_at.date_naive()));
                let entry = LedgerEntry::landed(
                    entry_id,
                    &self.settings.source_system,
                    &item.file_type,
                    file_date,
                    &item.source_path,
                    staged.uri.clone(),
                    staged.fingerprint,
                    started_at,
                );
                self.record(&entry).await;

                info!(object_uri = %staged.uri, "Landed source file");
                FileResult::landed(&item.source_path, item.file_type.as_str(), staged.uri)
            },
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(error = %error, "Landing failed");
                let entry = LedgerEntry::land_failed(
                    entry_id,
                    &self.settings.source_system,
                    &item.file_type,
                    logical_date_from_source_name(&item.file_name),
                    &item.source_path,
                    error.clone(),
                    started_at,
                );
                self.record(&entry).await;

                FileResult::failed(&item.source_path, item.file_type.as_str(), error)
            },
        }
    }

    async fn transfer(
        &self,
        session: &dyn SourceSession,
        item: &WorkItem,
        sequence: u32,
    ) -> Result<(StagedObject, DateTime<Utc>)> {
        let raw = session.fetch(&item.source_path).await?;
        let compressed = gzip(&raw).context("Failed to compress source file")?;

        let landed_at = Utc::now();
        let key = StagingKey::for_landing(
            &self.settings.incoming_prefix,
            item.file_type.clone(),
            landed_at,
            sequence,
        );

        let staged = self
            .staging
            .put(&key.object_key(), compressed, STAGED_CONTENT_TYPE)
            .await?;
        Ok((staged, landed_at))
    }

    /// Ledger write failures are logged and never fail the file
    async fn record(&self, entry: &LedgerEntry) {
        match self.ledger.record_landed(entry).await {
            Ok(0) => warn!(
                entry_id = %entry.id,
                status = %entry.status,
                affected = 0,
                "Landing record matched no reservation"
            ),
            Ok(_) => {},
            Err(e) => warn!(
                entry_id = %entry.id,
                status = %entry.status,
                error = %e,
                "Failed to write landing record"
            ),
        }
    }
}
