//! Common test utilities for reconciliation-service integration tests.
//!
//! The service runs against an in-memory store with the same conditional
//! write semantics as the Postgres store, and against scripted channel and
//! platform sources whose failures can be switched on per test.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reconciliation_service::config::{
    ChannelSourceConfig, DatabaseConfig, PlatformSourceConfig, ReconciliationConfig, ReportConfig,
    SchedulerConfig,
};
use reconciliation_service::error::{ReconciliationError, Result};
use reconciliation_service::models::{
    generate_file_no, progress, Channel, ChannelPayment, ChannelSettlementFile, DownloadedFile,
    FileFilters, FileStatus, Pagination, PlatformPayment, ReconciliationRecord,
    ReconciliationTask, RecordBreakdown, RecordFilters, SettlementFileUpdate, TaskAggregates,
    TaskFilters, TaskRun, TaskStatus,
};
use reconciliation_service::services::{
    ChannelSource, Database, FileReportGenerator, PlatformSource, ReconciliationService,
    ReconciliationStore,
};
use reconciliation_service::startup::Application;
use secrecy::Secret;
use service_core::config::Config as CommonConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

static INIT: Once = Once::new();

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,reconciliation_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn platform_payment(trade_no: &str, amount: i64, status: &str) -> PlatformPayment {
    PlatformPayment {
        payment_no: format!("PAY-{}", trade_no),
        order_no: Some(format!("ORD-{}", trade_no)),
        merchant_id: None,
        channel_trade_no: trade_no.to_string(),
        amount,
        currency: "USD".to_string(),
        status: status.to_string(),
    }
}

pub fn channel_payment(trade_no: &str, amount: i64, status: &str) -> ChannelPayment {
    ChannelPayment {
        channel_trade_no: trade_no.to_string(),
        amount,
        currency: "USD".to_string(),
        status: status.to_string(),
        settled_at: None,
    }
}

// ============================================================================
// Postgres
// ============================================================================

/// Connect to `TEST_DATABASE_URL` inside a fresh schema with migrations
/// applied. Returns `None` when the variable is unset so Postgres-backed tests
/// are skipped on machines without a database.
pub async fn test_database() -> Option<Database> {
    init_tracing();

    let Ok(base_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping Postgres-backed test");
        return None;
    };

    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    let schema_name = format!("test_recon_{}_{}", std::process::id(), counter);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&base_url)
        .await
        .expect("Failed to connect to test database");
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
        .execute(&pool)
        .await
        .ok();
    sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
        .execute(&pool)
        .await
        .expect("Failed to create test schema");
    pool.close().await;

    let separator = if base_url.contains('?') { "&" } else { "?" };
    let url = format!(
        "{}{}options=-c search_path%3D{}",
        base_url, separator, schema_name
    );

    let db = Database::new(&Secret::new(url), 5, 1)
        .await
        .expect("Failed to create test database");
    db.run_migrations()
        .await
        .expect("Failed to run migrations");
    Some(db)
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct State {
    tasks: Vec<ReconciliationTask>,
    records: Vec<ReconciliationRecord>,
    files: Vec<ChannelSettlementFile>,
}

impl State {
    /// The task, if `run` still holds it.
    fn held_by(&mut self, run: &TaskRun) -> Option<&mut ReconciliationTask> {
        self.tasks.iter_mut().find(|t| {
            t.task_id == run.task_id
                && t.status() == TaskStatus::Processing
                && t.started_at == Some(run.started_at)
        })
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

fn paginate<T: Clone>(items: Vec<T>, page: Pagination) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let page_items = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.page_size as usize)
        .collect();
    (page_items, total)
}

impl InMemoryStore {
    pub async fn task(&self, task_id: Uuid) -> Option<ReconciliationTask> {
        self.state
            .lock()
            .await
            .tasks
            .iter()
            .find(|t| t.task_id == task_id)
            .cloned()
    }

    pub async fn records_of(&self, task_id: Uuid) -> Vec<ReconciliationRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Put a task into `failed` regardless of its current status.
    pub async fn force_fail(&self, task_id: Uuid, error_message: &str) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.tasks.iter_mut().find(|t| t.task_id == task_id) {
            task.status = TaskStatus::Failed.as_str().to_string();
            task.error_message = Some(error_message.to_string());
        }
    }

    pub async fn file_count(&self) -> usize {
        self.state.lock().await.files.len()
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn create_task(&self, task: &ReconciliationTask) -> Result<ReconciliationTask> {
        let mut state = self.state.lock().await;
        if state
            .tasks
            .iter()
            .any(|t| t.task_date == task.task_date && t.channel == task.channel)
        {
            return Err(ReconciliationError::DuplicateTask {
                date: task.task_date,
                channel: task.channel.clone(),
            });
        }
        state.tasks.push(task.clone());
        Ok(task.clone())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<ReconciliationTask>> {
        Ok(self.task(task_id).await)
    }

    async fn get_task_by_date_and_channel(
        &self,
        task_date: NaiveDate,
        channel: &str,
    ) -> Result<Option<ReconciliationTask>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .iter()
            .find(|t| t.task_date == task_date && t.channel == channel)
            .cloned())
    }

    async fn list_tasks(
        &self,
        filters: &TaskFilters,
        page: Pagination,
    ) -> Result<(Vec<ReconciliationTask>, i64)> {
        let state = self.state.lock().await;
        let mut tasks: Vec<_> = state
            .tasks
            .iter()
            .filter(|t| filters.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.task_date
                .cmp(&a.task_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(paginate(tasks, page))
    }

    async fn begin_processing(
        &self,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationTask>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.iter_mut().find(|t| t.task_id == task_id) else {
            return Ok(None);
        };
        if !task.status().is_executable() {
            return Ok(None);
        }
        task.status = TaskStatus::Processing.as_str().to_string();
        task.progress = progress::STARTED;
        task.started_at = Some(now);
        task.completed_at = None;
        task.error_message = None;
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn reset_failed_task(&self, task_id: Uuid) -> Result<Option<ReconciliationTask>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.iter_mut().find(|t| t.task_id == task_id) else {
            return Ok(None);
        };
        if task.status() != TaskStatus::Failed {
            return Ok(None);
        }
        task.status = TaskStatus::Pending.as_str().to_string();
        task.progress = progress::STARTED;
        task.error_message = None;
        task.started_at = None;
        task.completed_at = None;
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn update_progress(&self, run: &TaskRun, value: i32) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.held_by(run) else {
            return Ok(false);
        };
        if task.progress > value {
            return Ok(false);
        }
        task.progress = value;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_channel_file_url(&self, run: &TaskRun, file_url: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.held_by(run) else {
            return Ok(false);
        };
        task.channel_file_url = Some(file_url.to_string());
        Ok(true)
    }

    async fn complete_task(
        &self,
        run: &TaskRun,
        totals: &TaskAggregates,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationTask>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.held_by(run) else {
            return Ok(None);
        };
        task.status = TaskStatus::Completed.as_str().to_string();
        task.progress = progress::DONE;
        task.platform_count = totals.platform_count;
        task.platform_amount = totals.platform_amount;
        task.channel_count = totals.channel_count;
        task.channel_amount = totals.channel_amount;
        task.matched_count = totals.matched_count;
        task.matched_amount = totals.matched_amount;
        task.diff_count = totals.diff_count;
        task.diff_amount = totals.diff_amount;
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn fail_task(&self, run: &TaskRun, error_message: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.held_by(run) else {
            return Ok(false);
        };
        task.status = TaskStatus::Failed.as_str().to_string();
        task.error_message = Some(error_message.to_string());
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_report_url(
        &self,
        task_id: Uuid,
        report_url: &str,
    ) -> Result<Option<ReconciliationTask>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.iter_mut().find(|t| t.task_id == task_id) else {
            return Ok(None);
        };
        if task.status() != TaskStatus::Completed {
            return Ok(None);
        }
        task.report_file_url = Some(report_url.to_string());
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn fail_stale_tasks(
        &self,
        started_before: DateTime<Utc>,
        error_message: &str,
    ) -> Result<Vec<ReconciliationTask>> {
        let mut state = self.state.lock().await;
        let mut failed = Vec::new();
        for task in state.tasks.iter_mut() {
            let stale = task.status() == TaskStatus::Processing
                && task.started_at.is_some_and(|s| s < started_before);
            if stale {
                task.status = TaskStatus::Failed.as_str().to_string();
                task.error_message = Some(error_message.to_string());
                task.updated_at = Utc::now();
                failed.push(task.clone());
            }
        }
        Ok(failed)
    }

    async fn replace_records(
        &self,
        run: &TaskRun,
        records: &[ReconciliationRecord],
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.held_by(run).is_none() {
            return Ok(false);
        }
        state.records.retain(|r| r.task_id != run.task_id);
        state.records.extend(records.iter().cloned());
        Ok(true)
    }

    async fn get_record(&self, record_id: Uuid) -> Result<Option<ReconciliationRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .find(|r| r.record_id == record_id)
            .cloned())
    }

    async fn list_records(
        &self,
        filters: &RecordFilters,
        page: Pagination,
    ) -> Result<(Vec<ReconciliationRecord>, i64)> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .iter()
            .filter(|r| filters.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(records, page))
    }

    async fn count_records_by_type(&self, task_id: Uuid) -> Result<RecordBreakdown> {
        let state = self.state.lock().await;
        let mut breakdown = RecordBreakdown::default();
        for record in state.records.iter().filter(|r| r.task_id == task_id) {
            breakdown.add(record.diff_type(), 1);
            if !record.is_resolved {
                breakdown.unresolved += 1;
            }
        }
        Ok(breakdown)
    }

    async fn resolve_record(
        &self,
        record_id: Uuid,
        resolved_by: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationRecord>> {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.iter_mut().find(|r| r.record_id == record_id) else {
            return Ok(None);
        };
        if record.is_resolved {
            return Ok(None);
        }
        record.is_resolved = true;
        record.resolved_by = Some(resolved_by.to_string());
        record.resolved_at = Some(now);
        record.resolution_note = Some(note.to_string());
        Ok(Some(record.clone()))
    }

    async fn get_file_by_date_and_channel(
        &self,
        settlement_date: NaiveDate,
        channel: &str,
    ) -> Result<Option<ChannelSettlementFile>> {
        let state = self.state.lock().await;
        Ok(state
            .files
            .iter()
            .find(|f| f.settlement_date == settlement_date && f.channel == channel)
            .cloned())
    }

    async fn get_file_by_no(&self, file_no: &str) -> Result<Option<ChannelSettlementFile>> {
        let state = self.state.lock().await;
        Ok(state.files.iter().find(|f| f.file_no == file_no).cloned())
    }

    async fn upsert_file(
        &self,
        update: &SettlementFileUpdate,
        now: DateTime<Utc>,
    ) -> Result<ChannelSettlementFile> {
        let mut state = self.state.lock().await;
        let file = update.file.as_ref();
        let imported_at = (update.status == FileStatus::Imported).then_some(now);

        if let Some(existing) = state.files.iter_mut().find(|f| {
            f.settlement_date == update.settlement_date && f.channel == update.channel.as_str()
        }) {
            if let Some(file) = file {
                existing.file_url = Some(file.file_url.clone());
                existing.file_size = file.file_size;
                existing.file_hash = Some(file.file_hash.clone());
                existing.downloaded_at = Some(now);
            }
            if let Some(count) = update.record_count {
                existing.record_count = count;
            }
            if let Some(amount) = update.total_amount {
                existing.total_amount = amount;
            }
            existing.status = update.status.as_str().to_string();
            existing.error_message = update.error_message.clone();
            existing.imported_at = imported_at.or(existing.imported_at);
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let stored = ChannelSettlementFile {
            file_id: Uuid::new_v4(),
            file_no: generate_file_no(update.channel, update.settlement_date),
            channel: update.channel.as_str().to_string(),
            settlement_date: update.settlement_date,
            file_url: file.map(|f| f.file_url.clone()),
            file_size: file.map_or(0, |f| f.file_size),
            file_hash: file.map(|f| f.file_hash.clone()),
            record_count: update.record_count.unwrap_or(0),
            total_amount: update.total_amount.unwrap_or(0),
            status: update.status.as_str().to_string(),
            error_message: update.error_message.clone(),
            downloaded_at: file.map(|_| now),
            imported_at,
            created_at: now,
            updated_at: now,
        };
        state.files.push(stored.clone());
        Ok(stored)
    }

    async fn list_files(
        &self,
        filters: &FileFilters,
        page: Pagination,
    ) -> Result<(Vec<ChannelSettlementFile>, i64)> {
        let state = self.state.lock().await;
        let mut files: Vec<_> = state
            .files
            .iter()
            .filter(|f| filters.matches(f))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.settlement_date.cmp(&a.settlement_date));
        Ok(paginate(files, page))
    }
}

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Channel source serving a fixed set of channel payments.
#[derive(Default)]
pub struct ScriptedChannelSource {
    payments: std::sync::Mutex<Vec<ChannelPayment>>,
    fail_download: AtomicBool,
    fail_parse: AtomicBool,
    downloads: AtomicUsize,
    gate: std::sync::Mutex<Option<Arc<Notify>>>,
}

impl ScriptedChannelSource {
    pub fn set_payments(&self, payments: Vec<ChannelPayment>) {
        *self.payments.lock().unwrap() = payments;
    }

    pub fn fail_download(&self, fail: bool) {
        self.fail_download.store(fail, Ordering::SeqCst);
    }

    pub fn fail_parse(&self, fail: bool) {
        self.fail_parse.store(fail, Ordering::SeqCst);
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Block every download until the returned handle is notified.
    pub fn hold_downloads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ChannelSource for ScriptedChannelSource {
    async fn download(&self, channel: Channel, settlement_date: NaiveDate) -> Result<DownloadedFile> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_download.load(Ordering::SeqCst) {
            return Err(ReconciliationError::Download(anyhow::anyhow!(
                "settlement endpoint returned 503"
            )));
        }

        Ok(DownloadedFile {
            file_url: format!("memory://{}/{}.csv", channel, settlement_date),
            file_size: 256,
            file_hash: "ab".repeat(32),
        })
    }

    async fn parse(&self, _file_url: &str) -> Result<Vec<ChannelPayment>> {
        if self.fail_parse.load(Ordering::SeqCst) {
            return Err(ReconciliationError::Parse(anyhow::anyhow!(
                "line 3: missing amount column"
            )));
        }
        Ok(self.payments.lock().unwrap().clone())
    }
}

/// Platform source serving a fixed set of platform payments.
#[derive(Default)]
pub struct ScriptedPlatformSource {
    payments: std::sync::Mutex<Vec<PlatformPayment>>,
    fail: AtomicBool,
}

impl ScriptedPlatformSource {
    pub fn set_payments(&self, payments: Vec<PlatformPayment>) {
        *self.payments.lock().unwrap() = payments;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlatformSource for ScriptedPlatformSource {
    async fn fetch_payments(
        &self,
        _settlement_date: NaiveDate,
        _channel: Channel,
    ) -> Result<Vec<PlatformPayment>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ReconciliationError::Fetch(anyhow::anyhow!(
                "payment gateway unreachable"
            )));
        }
        Ok(self.payments.lock().unwrap().clone())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestContext {
    pub service: Arc<ReconciliationService>,
    pub store: Arc<InMemoryStore>,
    pub channel: Arc<ScriptedChannelSource>,
    pub platform: Arc<ScriptedPlatformSource>,
    pub report_dir: TempDir,
}

impl TestContext {
    pub fn report_path(&self) -> PathBuf {
        self.report_dir.path().to_path_buf()
    }
}

pub fn test_context() -> TestContext {
    test_context_with_deadline(Duration::from_secs(2 * 60 * 60))
}

pub fn test_context_with_deadline(processing_deadline: Duration) -> TestContext {
    init_tracing();

    let store = Arc::new(InMemoryStore::default());
    let channel = Arc::new(ScriptedChannelSource::default());
    let platform = Arc::new(ScriptedPlatformSource::default());
    let report_dir = tempfile::tempdir().expect("Failed to create report dir");

    let service = Arc::new(ReconciliationService::new(
        store.clone(),
        channel.clone(),
        platform.clone(),
        Arc::new(FileReportGenerator::new(store.clone(), report_dir.path())),
        processing_deadline,
    ));

    TestContext {
        service,
        store,
        channel,
        platform,
        report_dir,
    }
}

/// Test configuration: ephemeral port, scheduler off, no OTLP export.
pub fn test_config(report_dir: PathBuf) -> ReconciliationConfig {
    ReconciliationConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "reconciliation-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 1,
            min_connections: 1,
        },
        channel_source: ChannelSourceConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            settlement_dir: report_dir.clone(),
            timeout: Duration::from_secs(5),
        },
        platform_source: PlatformSourceConfig {
            payment_gateway_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(5),
        },
        report: ReportConfig { report_dir },
        scheduler: SchedulerConfig::default(),
    }
}

/// Test application wrapper.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub ctx: TestContext,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

/// Spawn the HTTP server on an ephemeral port around a fresh test context.
pub async fn spawn_app() -> TestApp {
    let ctx = test_context();
    let config = test_config(ctx.report_path());

    let app = Application::with_service(config, ctx.service.clone())
        .await
        .expect("Failed to build application");
    let address = format!("http://127.0.0.1:{}", app.http_port());

    // Start the application in the background
    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
        ctx,
    }
}
