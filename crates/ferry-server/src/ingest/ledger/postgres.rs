//! Postgres-backed ledger
//!
//! Reservations rely on two properties of the `ingestion_ledger` table:
//! the partial unique index on `(source_system, source_path)` for live rows,
//! and single-statement conditional updates for load claims.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Ledger, LedgerEntry, LedgerFilter, LedgerStatus, LoadOutcome, LoadReservation,
    ObjectFingerprint, LandingClaim, Reservation, EXPIRED_LANDING_ERROR,
};

const ENTRY_COLUMNS: &str = r#"
    id, source_system, file_type, file_date, source_path, object_uri,
    object_md5, object_size_bytes, object_generation,
    target_dataset, target_table, load_job_id, load_attempts,
    started_at, finished_at, load_started_at, status, error_message
"#;

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    source_system: String,
    file_type: String,
    file_date: Option<NaiveDate>,
    source_path: Option<String>,
    object_uri: Option<String>,
    object_md5: Option<String>,
    object_size_bytes: Option<i64>,
    object_generation: Option<String>,
    target_dataset: Option<String>,
    target_table: Option<String>,
    load_job_id: Option<String>,
    load_attempts: i32,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    load_started_at: Option<DateTime<Utc>>,
    status: String,
    error_message: Option<String>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = anyhow::Error;

    fn try_from(row: LedgerRow) -> Result<Self> {
        let fingerprint = match (row.object_md5, row.object_size_bytes) {
            (Some(md5), Some(size_bytes)) => Some(ObjectFingerprint {
                md5,
                size_bytes,
                generation: row.object_generation,
            }),
            _ => None,
        };

        Ok(LedgerEntry {
            id: row.id,
            source_system: row.source_system,
            file_type: row.file_type,
            file_date: row.file_date,
            source_path: row.source_path,
            object_uri: row.object_uri,
            fingerprint,
            target_dataset: row.target_dataset,
            target_table: row.target_table,
            load_job_id: row.load_job_id,
            load_attempts: row.load_attempts,
            started_at: row.started_at,
            finished_at: row.finished_at,
            load_started_at: row.load_started_at,
            status: row.status.parse()?,
            error_message: row.error_message,
        })
    }
}

/// Ledger stored in the `ingestion_ledger` table
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn close_expired_landing(&self, claim: &LandingClaim) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_ledger
            SET status = 'LAND_FAILED',
                error_message = $3,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE source_system = $1
              AND source_path = $2
              AND status = 'LANDING'
              AND started_at < NOW() - make_interval(secs => $4)
            "#,
        )
        .bind(&claim.source_system)
        .bind(&claim.source_path)
        .bind(EXPIRED_LANDING_ERROR)
        .bind(claim.lease.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("Failed to expire stale landing reservation")?;

        Ok(result.rows_affected())
    }

    async fn current_status(
        &self,
        source_system: &str,
        object_uri: &str,
    ) -> Result<Option<LedgerStatus>> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status FROM ingestion_ledger
            WHERE source_system = $1 AND object_uri = $2
            LIMIT 1
            "#,
        )
        .bind(source_system)
        .bind(object_uri)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read ledger status")?;

        status.map(|s| s.parse()).transpose()
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn is_already_landed(&self, source_system: &str, source_path: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM ingestion_ledger
                WHERE source_system = $1
                  AND source_path = $2
                  AND status IN ('LANDED', 'LOADING', 'SUCCESS', 'FAILED')
            )
            "#,
        )
        .bind(source_system)
        .bind(source_path)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check landing state")?;

        Ok(exists)
    }

    async fn is_already_loaded(&self, source_system: &str, object_uri: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM ingestion_ledger
                WHERE source_system = $1
                  AND object_uri = $2
                  AND status = 'SUCCESS'
                  AND target_dataset IS NOT NULL
                  AND target_table IS NOT NULL
            )
            "#,
        )
        .bind(source_system)
        .bind(object_uri)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check load state")?;

        Ok(exists)
    }

    async fn reserve_landing(&self, claim: &LandingClaim) -> Result<Reservation> {
        let expired = self.close_expired_landing(claim).await?;
        if expired > 0 {
            warn!(
                source_path = %claim.source_path,
                "Closed abandoned landing reservation"
            );
        }

        let id = Uuid::new_v4();
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO ingestion_ledger (id, source_system, file_type, source_path, status, started_at)
            VALUES ($1, $2, $3, $4, 'LANDING', NOW())
            ON CONFLICT (source_system, source_path) WHERE status <> 'LAND_FAILED'
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&claim.source_system)
        .bind(claim.file_type.as_str())
        .bind(&claim.source_path)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to reserve landing")?;

        Ok(match inserted {
            Some(id) => Reservation::Acquired(id),
            None => {
                debug!(source_path = %claim.source_path, "Landing already reserved");
                Reservation::Held
            },
        })
    }

    async fn record_landed(&self, entry: &LedgerEntry) -> Result<u64> {
        entry.validate_landing()?;

        let fingerprint = entry.fingerprint.as_ref();
        let result = sqlx::query(
            r#"
            INSERT INTO ingestion_ledger (
                id, source_system, file_type, file_date, source_path, object_uri,
                object_md5, object_size_bytes, object_generation,
                started_at, finished_at, status, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                file_type = EXCLUDED.file_type,
                file_date = EXCLUDED.file_date,
                object_uri = EXCLUDED.object_uri,
                object_md5 = EXCLUDED.object_md5,
                object_size_bytes = EXCLUDED.object_size_bytes,
                object_generation = EXCLUDED.object_generation,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                updated_at = NOW()
            WHERE ingestion_ledger.status = 'LANDING'
            "#,
        )
        .bind(entry.id)
        .bind(&entry.source_system)
        .bind(&entry.file_type)
        .bind(entry.file_date)
        .bind(&entry.source_path)
        .bind(&entry.object_uri)
        .bind(fingerprint.map(|f| f.md5.as_str()))
        .bind(fingerprint.map(|f| f.size_bytes))
        .bind(fingerprint.and_then(|f| f.generation.as_deref()))
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await
        .context("Failed to record landing")?;

        Ok(result.rows_affected())
    }

    async fn reserve_load(
        &self,
        source_system: &str,
        object_uri: &str,
        lease: Duration,
    ) -> Result<LoadReservation> {
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE ingestion_ledger
            SET status = 'LOADING',
                load_started_at = NOW(),
                load_attempts = load_attempts + 1,
                error_message = NULL,
                updated_at = NOW()
            WHERE source_system = $1
              AND object_uri = $2
              AND (
                  status IN ('LANDED', 'FAILED')
                  OR (status = 'LOADING' AND load_started_at < NOW() - make_interval(secs => $3))
              )
            RETURNING id
            "#,
        )
        .bind(source_system)
        .bind(object_uri)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to reserve load")?;

        if claimed.is_some() {
            return Ok(LoadReservation::Acquired);
        }

        Ok(match self.current_status(source_system, object_uri).await? {
            None => LoadReservation::Missing,
            Some(LedgerStatus::Success) => LoadReservation::AlreadyLoaded,
            Some(_) => LoadReservation::InProgress,
        })
    }

    async fn record_load_outcome(
        &self,
        source_system: &str,
        object_uri: &str,
        outcome: &LoadOutcome,
    ) -> Result<u64> {
        let destination = outcome.destination();
        let result = sqlx::query(
            r#"
            UPDATE ingestion_ledger
            SET status = $3,
                target_dataset = COALESCE($4, target_dataset),
                target_table = COALESCE($5, target_table),
                load_job_id = COALESCE($6, load_job_id),
                error_message = $7,
                finished_at = $8,
                updated_at = NOW()
            WHERE source_system = $1
              AND object_uri = $2
              AND status IN ('LANDED', 'LOADING', 'FAILED')
            "#,
        )
        .bind(source_system)
        .bind(object_uri)
        .bind(outcome.status().as_str())
        .bind(destination.map(|d| d.dataset.as_str()))
        .bind(destination.map(|d| d.table.as_str()))
        .bind(outcome.load_job_id())
        .bind(outcome.error())
        .bind(outcome.finished_at())
        .execute(&self.pool)
        .await
        .context("Failed to record load outcome")?;

        Ok(result.rows_affected())
    }

    async fn release_landing(&self, entry_id: Uuid, error: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_ledger
            SET status = 'LAND_FAILED',
                error_message = $2,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'LANDING'
            "#,
        )
        .bind(entry_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to release landing reservation")?;

        Ok(result.rows_affected())
    }

    async fn release_load(
        &self,
        source_system: &str,
        object_uri: &str,
        error: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_ledger
            SET status = 'FAILED',
                error_message = $3,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE source_system = $1
              AND object_uri = $2
              AND status = 'LOADING'
            "#,
        )
        .bind(source_system)
        .bind(object_uri)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to release load reservation")?;

        Ok(result.rows_affected())
    }

    async fn find_by_source_path(
        &self,
        source_system: &str,
        source_path: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ingestion_ledger \
             WHERE source_system = $1 AND source_path = $2 \
             ORDER BY started_at DESC",
            ENTRY_COLUMNS
        ))
        .bind(source_system)
        .bind(source_path)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query ledger by source path")?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn find_by_object_uri(
        &self,
        source_system: &str,
        object_uri: &str,
    ) -> Result<Option<LedgerEntry>> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ingestion_ledger \
             WHERE source_system = $1 AND object_uri = $2",
            ENTRY_COLUMNS
        ))
        .bind(source_system)
        .bind(object_uri)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query ledger by object uri")?;

        row.map(LedgerEntry::try_from).transpose()
    }

    async fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ingestion_ledger \
             WHERE ($1::text IS NULL OR source_system = $1) \
               AND ($2::text IS NULL OR source_path = $2) \
               AND ($3::text IS NULL OR object_uri = $3) \
               AND ($4::text IS NULL OR status = $4) \
             ORDER BY started_at DESC \
             LIMIT $5",
            ENTRY_COLUMNS
        ))
        .bind(filter.source_system.as_deref())
        .bind(filter.source_path.as_deref())
        .bind(filter.object_uri.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ledger entries")?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}
