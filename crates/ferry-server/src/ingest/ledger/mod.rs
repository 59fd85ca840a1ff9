//! Ingestion ledger
//!
//! One row per unit of work, keyed by `(source_system, source_path)` and, once
//! the file is staged, by `(source_system, object_uri)`. The ledger is the only
//! shared mutable state of the pipeline: every idempotency decision is a point
//! lookup or a single-row conditional write against it.
//!
//! Status machine:
//!
//! ```text
//! (none) -> LANDING -> LANDED -> LOADING -> SUCCESS
//!                  \                    \-> FAILED -> LOADING (re-trigger)
//!                   \-> LAND_FAILED
//! ```
//!
//! `LANDING` and `LOADING` are reservations: they are taken atomically before
//! any side effect so that two concurrent triggers for the same key cannot
//! both proceed. A reservation older than its lease is treated as abandoned.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use super::key::FileType;
use super::routing::Destination;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Error text written when an abandoned landing reservation is closed
pub const EXPIRED_LANDING_ERROR: &str = "landing reservation expired";

/// Error text written when a run is cut off while holding a reservation
pub const RUN_TIMED_OUT_ERROR: &str = "run timed out";

/// Default number of rows returned by ledger listings
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Ledger row status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Landing,
    Landed,
    LandFailed,
    Loading,
    Success,
    Failed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Landing => "LANDING",
            LedgerStatus::Landed => "LANDED",
            LedgerStatus::LandFailed => "LAND_FAILED",
            LedgerStatus::Loading => "LOADING",
            LedgerStatus::Success => "SUCCESS",
            LedgerStatus::Failed => "FAILED",
        }
    }

    /// Landing finished successfully at some point. `LOADING` and `FAILED`
    /// are only reachable from `LANDED`, so they keep proving the file
    /// reached staging.
    pub fn proves_landing(&self) -> bool {
        matches!(
            self,
            LedgerStatus::Landed
                | LedgerStatus::Loading
                | LedgerStatus::Success
                | LedgerStatus::Failed
        )
    }

    /// States a load outcome may be written over
    pub fn accepts_load_outcome(&self) -> bool {
        matches!(
            self,
            LedgerStatus::Landed | LedgerStatus::Loading | LedgerStatus::Failed
        )
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LedgerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LANDING" => Ok(LedgerStatus::Landing),
            "LANDED" => Ok(LedgerStatus::Landed),
            "LAND_FAILED" => Ok(LedgerStatus::LandFailed),
            "LOADING" => Ok(LedgerStatus::Loading),
            "SUCCESS" => Ok(LedgerStatus::Success),
            "FAILED" => Ok(LedgerStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown ledger status: {}", other)),
        }
    }
}

/// Identity of a staged object as reported by staging storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFingerprint {
    /// Hex MD5 of the stored bytes
    pub md5: String,
    pub size_bytes: i64,
    /// Storage-assigned version, when the bucket keeps versions
    pub generation: Option<String>,
}

/// One unit of work tracked end to end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub source_system: String,
    pub file_type: String,
    pub file_date: Option<NaiveDate>,
    pub source_path: Option<String>,
    pub object_uri: Option<String>,
    pub fingerprint: Option<ObjectFingerprint>,
    pub target_dataset: Option<String>,
    pub target_table: Option<String>,
    pub load_job_id: Option<String>,
    pub load_attempts: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub load_started_at: Option<DateTime<Utc>>,
    pub status: LedgerStatus,
    pub error_message: Option<String>,
}

impl LedgerEntry {
    /// Entry for a file that reached staging
    #[allow(clippy::too_many_arguments)]
    pub fn landed(
        id: Uuid,
        source_system: &str,
        file_type: &FileType,
        file_date: Option<NaiveDate>,
        source_path: &str,
        object_uri: String,
        fingerprint: ObjectFingerprint,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_system: source_system.to_string(),
            file_type: file_type.to_string(),
            file_date,
            source_path: Some(source_path.to_string()),
            object_uri: Some(object_uri),
            fingerprint: Some(fingerprint),
            target_dataset: None,
            target_table: None,
            load_job_id: None,
            load_attempts: 0,
            started_at,
            finished_at: Some(Utc::now()),
            load_started_at: None,
            status: LedgerStatus::Landed,
            error_message: None,
        }
    }

    /// Entry for a file whose fetch, transform or upload failed
    pub fn land_failed(
        id: Uuid,
        source_system: &str,
        file_type: &FileType,
        file_date: Option<NaiveDate>,
        source_path: &str,
        error: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_system: source_system.to_string(),
            file_type: file_type.to_string(),
            file_date,
            source_path: Some(source_path.to_string()),
            object_uri: None,
            fingerprint: None,
            target_dataset: None,
            target_table: None,
            load_job_id: None,
            load_attempts: 0,
            started_at,
            finished_at: Some(Utc::now()),
            load_started_at: None,
            status: LedgerStatus::LandFailed,
            error_message: Some(error),
        }
    }

    pub(crate) fn validate_landing(&self) -> Result<()> {
        match self.status {
            LedgerStatus::Landed => {
                if self.object_uri.is_none() || self.fingerprint.is_none() {
                    anyhow::bail!(
                        "LANDED entry {} must carry an object uri and fingerprint",
                        self.id
                    );
                }
            },
            LedgerStatus::LandFailed => {},
            other => anyhow::bail!("Cannot record landing with status {}", other),
        }

        if self.source_path.is_none() {
            anyhow::bail!("Landing entry {} has no source path", self.id);
        }

        Ok(())
    }
}

/// Request to reserve the landing of one source file
#[derive(Debug, Clone)]
pub struct LandingClaim {
    pub source_system: String,
    pub source_path: String,
    pub file_type: FileType,
    /// How long a `LANDING` row may stay open before another run may take over
    pub lease: Duration,
}

/// Result of a landing reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller owns the row with this id and must finish it via
    /// [`Ledger::record_landed`]
    Acquired(Uuid),
    /// Another run holds or already completed this key
    Held,
}

/// Reservations a run currently holds, so they can be released when the run
/// is cancelled part-way.
///
/// Keys are added right after a reservation is acquired and removed once the
/// matching terminal write was attempted.
#[derive(Debug)]
pub struct HeldReservations<K> {
    keys: Mutex<HashSet<K>>,
}

impl<K: Eq + Hash> Default for HeldReservations<K> {
    fn default() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
        }
    }
}

impl<K: Eq + Hash> HeldReservations<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, key: K) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }

    pub fn finish(&self, key: &K) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Take every key still held
    pub fn drain(&self) -> Vec<K> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect()
    }
}

/// Result of a load reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadReservation {
    Acquired,
    AlreadyLoaded,
    InProgress,
    /// No ledger row visible for the object (yet)
    Missing,
}

/// Terminal result of one load attempt.
///
/// A success always carries its destination and job id.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Success {
        destination: Destination,
        load_job_id: String,
        finished_at: DateTime<Utc>,
    },
    Failed {
        destination: Option<Destination>,
        load_job_id: Option<String>,
        error: String,
        finished_at: DateTime<Utc>,
    },
}

impl LoadOutcome {
    pub fn status(&self) -> LedgerStatus {
        match self {
            LoadOutcome::Success { .. } => LedgerStatus::Success,
            LoadOutcome::Failed { .. } => LedgerStatus::Failed,
        }
    }

    pub fn destination(&self) -> Option<&Destination> {
        match self {
            LoadOutcome::Success { destination, .. } => Some(destination),
            LoadOutcome::Failed { destination, .. } => destination.as_ref(),
        }
    }

    pub fn load_job_id(&self) -> Option<&str> {
        match self {
            LoadOutcome::Success { load_job_id, .. } => Some(load_job_id),
            LoadOutcome::Failed { load_job_id, .. } => load_job_id.as_deref(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LoadOutcome::Success { .. } => None,
            LoadOutcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        match self {
            LoadOutcome::Success { finished_at, .. } | LoadOutcome::Failed { finished_at, .. } => {
                *finished_at
            },
        }
    }
}

/// Filter for operator listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub source_system: Option<String>,
    pub source_path: Option<String>,
    pub object_uri: Option<String>,
    pub status: Option<LedgerStatus>,
    pub limit: Option<i64>,
}

impl LedgerFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1000)
    }

    pub(crate) fn matches(&self, entry: &LedgerEntry) -> bool {
        self.source_system
            .as_deref()
            .map_or(true, |s| entry.source_system == s)
            && self
                .source_path
                .as_deref()
                .map_or(true, |p| entry.source_path.as_deref() == Some(p))
            && self
                .object_uri
                .as_deref()
                .map_or(true, |u| entry.object_uri.as_deref() == Some(u))
            && self.status.map_or(true, |s| entry.status == s)
    }
}

/// Durable store of ledger entries.
///
/// Every write reports the number of affected rows; zero means the expected
/// row was not there and is for the caller to report.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// A completed landing exists for this source file
    async fn is_already_landed(&self, source_system: &str, source_path: &str) -> Result<bool>;

    /// A successful load with a resolved destination exists for this object
    async fn is_already_loaded(&self, source_system: &str, object_uri: &str) -> Result<bool>;

    /// Atomically claim the landing of a source file
    async fn reserve_landing(&self, claim: &LandingClaim) -> Result<Reservation>;

    /// Write a `LANDED` or `LAND_FAILED` entry, completing the reservation
    /// with the same id when there is one
    async fn record_landed(&self, entry: &LedgerEntry) -> Result<u64>;

    /// Atomically claim the load of a staged object
    async fn reserve_load(
        &self,
        source_system: &str,
        object_uri: &str,
        lease: Duration,
    ) -> Result<LoadReservation>;

    /// Write the terminal result of a load attempt. Landing evidence (object
    /// uri, fingerprint, file date) is never modified and a `SUCCESS` row is
    /// never overwritten.
    async fn record_load_outcome(
        &self,
        source_system: &str,
        object_uri: &str,
        outcome: &LoadOutcome,
    ) -> Result<u64>;

    /// Close a `LANDING` reservation this run abandoned as `LAND_FAILED`
    async fn release_landing(&self, entry_id: Uuid, error: &str) -> Result<u64>;

    /// Close a `LOADING` reservation this run abandoned as `FAILED`, so the
    /// next notification may retry at once
    async fn release_load(&self, source_system: &str, object_uri: &str, error: &str)
        -> Result<u64>;

    async fn find_by_source_path(
        &self,
        source_system: &str,
        source_path: &str,
    ) -> Result<Vec<LedgerEntry>>;

    async fn find_by_object_uri(
        &self,
        source_system: &str,
        object_uri: &str,
    ) -> Result<Option<LedgerEntry>>;

    async fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>>;
}
