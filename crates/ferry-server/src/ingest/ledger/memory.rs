//! In-process ledger
//!
//! Same contract as [`PgLedger`](super::PgLedger) behind one mutex. Used by
//! the local development setup and the pipeline tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    Ledger, LedgerEntry, LedgerFilter, LedgerStatus, LoadOutcome, LoadReservation, LandingClaim,
    Reservation, EXPIRED_LANDING_ERROR,
};

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every entry, in insertion order
    pub async fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries.lock().await.clone()
    }

    /// Seed an entry as-is
    pub async fn insert(&self, entry: LedgerEntry) {
        self.entries.lock().await.push(entry);
    }
}

fn lease_expired(since: chrono::DateTime<Utc>, lease: Duration) -> bool {
    chrono::Duration::from_std(lease)
        .map_or(false, |lease| Utc::now().signed_duration_since(since) > lease)
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn is_already_landed(&self, source_system: &str, source_path: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().any(|e| {
            e.source_system == source_system
                && e.source_path.as_deref() == Some(source_path)
                && e.status.proves_landing()
        }))
    }

    async fn is_already_loaded(&self, source_system: &str, object_uri: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().any(|e| {
            e.source_system == source_system
                && e.object_uri.as_deref() == Some(object_uri)
                && e.status == LedgerStatus::Success
                && e.target_dataset.is_some()
                && e.target_table.is_some()
        }))
    }

    async fn reserve_landing(&self, claim: &LandingClaim) -> Result<Reservation> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();

        for entry in entries.iter_mut().filter(|e| {
            e.source_system == claim.source_system
                && e.source_path.as_deref() == Some(claim.source_path.as_str())
                && e.status == LedgerStatus::Landing
                && lease_expired(e.started_at, claim.lease)
        }) {
            entry.status = LedgerStatus::LandFailed;
            entry.error_message = Some(EXPIRED_LANDING_ERROR.to_string());
            entry.finished_at = Some(now);
        }

        let live = entries.iter().any(|e| {
            e.source_system == claim.source_system
                && e.source_path.as_deref() == Some(claim.source_path.as_str())
                && e.status != LedgerStatus::LandFailed
        });
        if live {
            return Ok(Reservation::Held);
        }

        let id = Uuid::new_v4();
        entries.push(LedgerEntry {
            id,
            source_system: claim.source_system.clone(),
            file_type: claim.file_type.to_string(),
            file_date: None,
            source_path: Some(claim.source_path.clone()),
            object_uri: None,
            fingerprint: None,
            target_dataset: None,
            target_table: None,
            load_job_id: None,
            load_attempts: 0,
            started_at: now,
            finished_at: None,
            load_started_at: None,
            status: LedgerStatus::Landing,
            error_message: None,
        });

        Ok(Reservation::Acquired(id))
    }

    async fn record_landed(&self, entry: &LedgerEntry) -> Result<u64> {
        entry.validate_landing()?;
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            if existing.status != LedgerStatus::Landing {
                return Ok(0);
            }
            *existing = entry.clone();
            return Ok(1);
        }

        let conflict = entries.iter().any(|e| {
            e.source_system == entry.source_system
                && e.source_path == entry.source_path
                && e.status != LedgerStatus::LandFailed
        });
        if conflict && entry.status != LedgerStatus::LandFailed {
            anyhow::bail!(
                "A live ledger entry already exists for {:?}",
                entry.source_path
            );
        }

        entries.push(entry.clone());
        Ok(1)
    }

    async fn reserve_load(
        &self,
        source_system: &str,
        object_uri: &str,
        lease: Duration,
    ) -> Result<LoadReservation> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.iter_mut().find(|e| {
            e.source_system == source_system && e.object_uri.as_deref() == Some(object_uri)
        }) else {
            return Ok(LoadReservation::Missing);
        };

        let claimable = match entry.status {
            LedgerStatus::Landed | LedgerStatus::Failed => true,
            LedgerStatus::Loading => entry
                .load_started_at
                .map_or(true, |since| lease_expired(since, lease)),
            _ => false,
        };

        if claimable {
            entry.status = LedgerStatus::Loading;
            entry.load_started_at = Some(Utc::now());
            entry.load_attempts += 1;
            entry.error_message = None;
            return Ok(LoadReservation::Acquired);
        }

        Ok(match entry.status {
            LedgerStatus::Success => LoadReservation::AlreadyLoaded,
            _ => LoadReservation::InProgress,
        })
    }

    async fn record_load_outcome(
        &self,
        source_system: &str,
        object_uri: &str,
        outcome: &LoadOutcome,
    ) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let mut affected = 0;

        for entry in entries.iter_mut().filter(|e| {
            e.source_system == source_system
                && e.object_uri.as_deref() == Some(object_uri)
                && e.status.accepts_load_outcome()
        }) {
            entry.status = outcome.status();
            if let Some(destination) = outcome.destination() {
                entry.target_dataset = Some(destination.dataset.clone());
                entry.target_table = Some(destination.table.clone());
            }
            if let Some(job_id) = outcome.load_job_id() {
                entry.load_job_id = Some(job_id.to_string());
            }
            entry.error_message = outcome.error().map(str::to_string);
            entry.finished_at = Some(outcome.finished_at());
            affected += 1;
        }

        Ok(affected)
    }

    async fn release_landing(&self, entry_id: Uuid, error: &str) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries
            .iter_mut()
            .find(|e| e.id == entry_id && e.status == LedgerStatus::Landing)
        else {
            return Ok(0);
        };

        entry.status = LedgerStatus::LandFailed;
        entry.error_message = Some(error.to_string());
        entry.finished_at = Some(Utc::now());
        Ok(1)
    }

    async fn release_load(
        &self,
        source_system: &str,
        object_uri: &str,
        error: &str,
    ) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let mut affected = 0;

        for entry in entries.iter_mut().filter(|e| {
            e.source_system == source_system
                && e.object_uri.as_deref() == Some(object_uri)
                && e.status == LedgerStatus::Loading
        }) {
            entry.status = LedgerStatus::Failed;
            entry.error_message = Some(error.to_string());
            entry.finished_at = Some(Utc::now());
            affected += 1;
        }

        Ok(affected)
    }

    async fn find_by_source_path(
        &self,
        source_system: &str,
        source_path: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| {
                e.source_system == source_system && e.source_path.as_deref() == Some(source_path)
            })
            .cloned()
            .collect())
    }

    async fn find_by_object_uri(
        &self,
        source_system: &str,
        object_uri: &str,
    ) -> Result<Option<LedgerEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .find(|e| e.source_system == source_system && e.object_uri.as_deref() == Some(object_uri))
            .cloned())
    }

    async fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(filter.effective_limit() as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::key::FileType;
    use crate::ingest::ledger::{ObjectFingerprint, RUN_TIMED_OUT_ERROR};
    use crate::ingest::routing::Destination;
    use std::sync::Arc;

    const SYSTEM: &str = "lifefile";
    const PATH: &str = "/outgoing/payments_2025-11-15.csv";
    const URI: &str = "s3://staging/incoming/payments/2025/11/15/p.csv.gz";

    fn claim(lease: Duration) -> LandingClaim {
        LandingClaim {
            source_system: SYSTEM.to_string(),
            source_path: PATH.to_string(),
            file_type: FileType::new("payments").unwrap(),
            lease,
        }
    }

    fn landed(id: Uuid) -> LedgerEntry {
        LedgerEntry::landed(
            id,
            SYSTEM,
            &FileType::new("payments").unwrap(),
            None,
            PATH,
            URI.to_string(),
            ObjectFingerprint {
                md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                size_bytes: 20,
                generation: Some("1".to_string()),
            },
            Utc::now(),
        )
    }

    async fn landed_ledger() -> MemoryLedger {
        let ledger = MemoryLedger::new();
        let Reservation::Acquired(id) = ledger.reserve_landing(&claim(Duration::from_secs(60))).await.unwrap() else {
            panic!("expected reservation");
        };
        assert_eq!(ledger.record_landed(&landed(id)).await.unwrap(), 1);
        ledger
    }

    #[tokio::test]
    async fn test_concurrent_landing_reservations_single_winner() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve_landing(&claim(Duration::from_secs(60))).await.unwrap()
            }));
        }

        let mut acquired = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Reservation::Acquired(_)) {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn test_expired_landing_is_taken_over() {
        let ledger = MemoryLedger::new();
        let first = ledger.reserve_landing(&claim(Duration::ZERO)).await.unwrap();
        assert!(matches!(first, Reservation::Acquired(_)));

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = ledger.reserve_landing(&claim(Duration::ZERO)).await.unwrap();
        assert!(matches!(second, Reservation::Acquired(_)));

        let rows = ledger.find_by_source_path(SYSTEM, PATH).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|e| e.status == LedgerStatus::LandFailed
            && e.error_message.as_deref() == Some(EXPIRED_LANDING_ERROR)));
    }

    #[tokio::test]
    async fn test_landed_blocks_new_reservation() {
        let ledger = landed_ledger().await;
        assert!(ledger.is_already_landed(SYSTEM, PATH).await.unwrap());
        assert_eq!(
            ledger.reserve_landing(&claim(Duration::ZERO)).await.unwrap(),
            Reservation::Held
        );
    }

    #[tokio::test]
    async fn test_load_failure_keeps_landing_evidence() {
        let ledger = landed_ledger().await;
        let before = ledger.find_by_object_uri(SYSTEM, URI).await.unwrap().unwrap();

        assert_eq!(
            ledger.reserve_load(SYSTEM, URI, Duration::from_secs(60)).await.unwrap(),
            LoadReservation::Acquired
        );
        let affected = ledger
            .record_load_outcome(
                SYSTEM,
                URI,
                &LoadOutcome::Failed {
                    destination: None,
                    load_job_id: None,
                    error: "boom".to_string(),
                    finished_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let after = ledger.find_by_object_uri(SYSTEM, URI).await.unwrap().unwrap();
        assert_eq!(after.status, LedgerStatus::Failed);
        assert_eq!(after.fingerprint, before.fingerprint);
        assert_eq!(after.object_uri, before.object_uri);
        assert!(ledger.is_already_landed(SYSTEM, PATH).await.unwrap());
        assert!(!ledger.is_already_loaded(SYSTEM, URI).await.unwrap());
    }

    #[tokio::test]
    async fn test_success_is_never_downgraded() {
        let ledger = landed_ledger().await;
        ledger.reserve_load(SYSTEM, URI, Duration::from_secs(60)).await.unwrap();

        let success = LoadOutcome::Success {
            destination: Destination {
                dataset: "raw_lifefile".to_string(),
                table: "payments_raw".to_string(),
            },
            load_job_id: "job-1".to_string(),
            finished_at: Utc::now(),
        };
        assert_eq!(ledger.record_load_outcome(SYSTEM, URI, &success).await.unwrap(), 1);
        assert!(ledger.is_already_loaded(SYSTEM, URI).await.unwrap());
        assert_eq!(
            ledger.reserve_load(SYSTEM, URI, Duration::ZERO).await.unwrap(),
            LoadReservation::AlreadyLoaded
        );

        let failure = LoadOutcome::Failed {
            destination: None,
            load_job_id: None,
            error: "late failure".to_string(),
            finished_at: Utc::now(),
        };
        assert_eq!(ledger.record_load_outcome(SYSTEM, URI, &failure).await.unwrap(), 0);
        assert!(ledger.is_already_loaded(SYSTEM, URI).await.unwrap());
    }

    #[tokio::test]
    async fn test_reserve_load_states() {
        let ledger = landed_ledger().await;
        assert_eq!(
            ledger.reserve_load(SYSTEM, "s3://staging/other", Duration::ZERO).await.unwrap(),
            LoadReservation::Missing
        );
        assert_eq!(
            ledger.reserve_load(SYSTEM, URI, Duration::from_secs(60)).await.unwrap(),
            LoadReservation::Acquired
        );
        assert_eq!(
            ledger.reserve_load(SYSTEM, URI, Duration::from_secs(60)).await.unwrap(),
            LoadReservation::InProgress
        );

        let entry = ledger.find_by_object_uri(SYSTEM, URI).await.unwrap().unwrap();
        assert_eq!(entry.load_attempts, 1);
    }

    #[tokio::test]
    async fn test_release_reopens_abandoned_reservations() {
        let ledger = MemoryLedger::new();
        let Reservation::Acquired(id) = ledger.reserve_landing(&claim(Duration::from_secs(60))).await.unwrap() else {
            panic!("expected reservation");
        };
        assert_eq!(ledger.release_landing(id, RUN_TIMED_OUT_ERROR).await.unwrap(), 1);
        assert_eq!(ledger.release_landing(id, RUN_TIMED_OUT_ERROR).await.unwrap(), 0);
        assert!(matches!(
            ledger.reserve_landing(&claim(Duration::from_secs(60))).await.unwrap(),
            Reservation::Acquired(_)
        ));

        let ledger = landed_ledger().await;
        // Only a LOADING row is released
        assert_eq!(ledger.release_load(SYSTEM, URI, RUN_TIMED_OUT_ERROR).await.unwrap(), 0);

        ledger.reserve_load(SYSTEM, URI, Duration::from_secs(60)).await.unwrap();
        assert_eq!(ledger.release_load(SYSTEM, URI, RUN_TIMED_OUT_ERROR).await.unwrap(), 1);

        let entry = ledger.find_by_object_uri(SYSTEM, URI).await.unwrap().unwrap();
        assert_eq!(entry.status, LedgerStatus::Failed);
        assert_eq!(entry.error_message.as_deref(), Some(RUN_TIMED_OUT_ERROR));
        assert!(entry.fingerprint.is_some());
        assert_eq!(
            ledger.reserve_load(SYSTEM, URI, Duration::from_secs(60)).await.unwrap(),
            LoadReservation::Acquired
        );
    }

    #[tokio::test]
    async fn test_list_entries_filters_by_status() {
        let ledger = landed_ledger().await;
        let filter = LedgerFilter {
            status: Some(LedgerStatus::Landed),
            ..Default::default()
        };
        assert_eq!(ledger.list_entries(&filter).await.unwrap().len(), 1);

        let filter = LedgerFilter {
            status: Some(LedgerStatus::Success),
            ..Default::default()
        };
        assert!(ledger.list_entries(&filter).await.unwrap().is_empty());
    }
}
