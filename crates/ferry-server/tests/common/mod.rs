//! Common test utilities for Ferry server integration tests
//!
//! In-memory collaborators (`FakeSource`, `FakeStaging`, `FakeWarehouse`)
//! that count every call, plus a PostgreSQL testcontainer with migrations
//! applied for the ledger and warehouse tests.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{FakeSource, FakeStaging, FakeWarehouse, TestPipeline};
//!
//! #[tokio::test]
//! async fn test_landing() {
//!     let env = TestPipeline::new();
//!     env.source.add_file("payments_2025-11-15.csv", b"id,amount\n1,10\n");
//!     let report = env.pipeline.run_extract().await.unwrap();
//!     assert_eq!(report.landed, 1);
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

use ferry_common::checksum::md5_hex;
use ferry_server::ingest::{
    ledger::ObjectFingerprint,
    routing::RoutingTable,
    source::{SourceConnector, SourceEntry, SourceSession},
    staging::{StagedObject, StagingStore},
    warehouse::{LoadFailure, LoadJob, LoadRequest, Warehouse},
    Collaborators, MemoryLedger, Pipeline, PipelineSettings,
};

pub const TEST_BUCKET: &str = "ferry-staging";
pub const SOURCE_DIR: &str = "/outgoing";

// ============================================================================
// Source
// ============================================================================

#[derive(Default)]
struct SourceState {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    fetch_delay: Mutex<Option<Duration>>,
    fail_open: AtomicBool,
    opens: AtomicUsize,
    lists: AtomicUsize,
    fetches: AtomicUsize,
    closes: AtomicUsize,
}

/// Flat remote directory at [`SOURCE_DIR`]
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<SourceState>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, name: &str, data: &[u8]) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
    }

    /// Fetches of `name` fail until [`Self::heal`] is called
    pub fn fail_fetch(&self, name: &str) {
        self.state.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn heal(&self, name: &str) {
        self.state.failing.lock().unwrap().remove(name);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.state.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for FakeSource {
    async fn open(&self) -> Result<Box<dyn SourceSession>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

struct FakeSession {
    state: Arc<SourceState>,
}

#[async_trait]
impl SourceSession for FakeSession {
    async fn list(&self, dir: &str) -> Result<Vec<SourceEntry>> {
        self.state.lists.fetch_add(1, Ordering::SeqCst);
        if dir.trim_end_matches('/') != SOURCE_DIR {
            return Ok(Vec::new());
        }
        let files = self.state.files.lock().unwrap();
        Ok(files
            .iter()
            .map(|(name, data)| SourceEntry::file(name.clone(), Some(data.len() as u64)))
            .collect())
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let name = path
            .strip_prefix(SOURCE_DIR)
            .map(|n| n.trim_start_matches('/'))
            .context("path outside source dir")?;
        if self.state.failing.lock().unwrap().contains(name) {
            anyhow::bail!("550 {}: transfer aborted", name);
        }
        self.state
            .files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .with_context(|| format!("550 {}: no such file", name))
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Staging
// ============================================================================

#[derive(Default)]
struct StagingState {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    generation: AtomicUsize,
    puts: AtomicUsize,
    copies: AtomicUsize,
    deletes: AtomicUsize,
    fail_copy: AtomicBool,
    fail_delete: AtomicBool,
}

#[derive(Clone, Default)]
pub struct FakeStaging {
    state: Arc<StagingState>,
}

impl FakeStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    /// Seed an object without going through `put`
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.objects.lock().unwrap().get(key).cloned()
    }

    pub fn puts(&self) -> usize {
        self.state.puts.load(Ordering::SeqCst)
    }

    pub fn copies(&self) -> usize {
        self.state.copies.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.state.deletes.load(Ordering::SeqCst)
    }

    pub fn set_fail_copy(&self, fail: bool) {
        self.state.fail_copy.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.state.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StagingStore for FakeStaging {
    fn bucket(&self) -> &str {
        TEST_BUCKET
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<StagedObject> {
        self.state.puts.fetch_add(1, Ordering::SeqCst);
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fingerprint = ObjectFingerprint {
            md5: md5_hex(&data),
            size_bytes: data.len() as i64,
            generation: Some(generation.to_string()),
        };
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data);

        Ok(StagedObject {
            key: key.to_string(),
            uri: self.uri(key),
            fingerprint,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.object(key)
            .with_context(|| format!("NoSuchKey: {}", key))
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        self.state.copies.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_copy.load(Ordering::SeqCst) {
            anyhow::bail!("copy rejected");
        }
        let mut objects = self.state.objects.lock().unwrap();
        let data = objects
            .get(from_key)
            .cloned()
            .with_context(|| format!("NoSuchKey: {}", from_key))?;
        objects.insert(to_key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.deletes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_delete.load(Ordering::SeqCst) {
            anyhow::bail!("delete rejected");
        }
        self.state.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// ============================================================================
// Warehouse
// ============================================================================

#[derive(Default)]
struct WarehouseState {
    requests: Mutex<Vec<LoadRequest>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct FakeWarehouse {
    state: Arc<WarehouseState>,
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loads(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<LoadRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn load(&self, request: &LoadRequest) -> Result<LoadJob, LoadFailure> {
        let job_number = {
            let mut requests = self.state.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let job_id = format!("job-{}", job_number);

        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.fail.load(Ordering::SeqCst) {
            return Err(LoadFailure::new(
                Some(job_id),
                "CSV table encountered too many errors",
            ));
        }

        Ok(LoadJob {
            job_id,
            rows_loaded: 1,
        })
    }
}

// ============================================================================
// Pipeline wiring
// ============================================================================

/// Pipeline over in-memory collaborators with handles to each of them
pub struct TestPipeline {
    pub ledger: Arc<MemoryLedger>,
    pub source: FakeSource,
    pub staging: FakeStaging,
    pub warehouse: FakeWarehouse,
    pub pipeline: Arc<Pipeline>,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_settings(PipelineSettings::default())
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        Self::build(Arc::new(MemoryLedger::new()), settings)
    }

    /// Second pipeline sharing every collaborator, as a concurrent run would
    pub fn sibling(&self) -> Arc<Pipeline> {
        Arc::new(Self::pipeline(
            self.ledger.clone(),
            self.source.clone(),
            self.staging.clone(),
            self.warehouse.clone(),
            self.pipeline.settings().clone(),
        ))
    }

    fn build(ledger: Arc<MemoryLedger>, settings: PipelineSettings) -> Self {
        let source = FakeSource::new();
        let staging = FakeStaging::new();
        let warehouse = FakeWarehouse::new();
        let pipeline = Arc::new(Self::pipeline(
            ledger.clone(),
            source.clone(),
            staging.clone(),
            warehouse.clone(),
            settings,
        ));

        Self {
            ledger,
            source,
            staging,
            warehouse,
            pipeline,
        }
    }

    fn pipeline(
        ledger: Arc<MemoryLedger>,
        source: FakeSource,
        staging: FakeStaging,
        warehouse: FakeWarehouse,
        settings: PipelineSettings,
    ) -> Pipeline {
        Pipeline::new(
            settings,
            RoutingTable::default(),
            Collaborators {
                ledger,
                source: Arc::new(source),
                staging: Arc::new(staging),
                warehouse: Arc::new(warehouse),
            },
        )
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        ferry_server::db::migrate(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
