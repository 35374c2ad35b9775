//! PostgreSQL store for reconciliation-service.

use crate::error::{ReconciliationError, Result};
use crate::models::{
    generate_file_no, ChannelSettlementFile, DiffType, FileFilters, FileStatus, Pagination,
    ReconciliationRecord, ReconciliationTask, RecordBreakdown, RecordFilters,
    SettlementFileUpdate, TaskAggregates, TaskFilters, TaskRun,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::ReconciliationStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Rows per multi-value INSERT when persisting diff records.
const INSERT_BATCH_SIZE: usize = 100;

const TASK_COLUMNS: &str = "task_id, task_no, task_date, channel, task_type, status, progress, \
    error_message, platform_count, platform_amount, channel_count, channel_amount, \
    matched_count, matched_amount, diff_count, diff_amount, channel_file_url, report_file_url, \
    started_at, completed_at, created_at, updated_at";

const RECORD_COLUMNS: &str = "record_id, task_id, task_no, payment_no, channel_trade_no, \
    order_no, merchant_id, platform_amount, channel_amount, diff_amount, currency, \
    platform_status, channel_status, diff_type, diff_reason, is_resolved, resolved_by, \
    resolved_at, resolution_note, created_at";

const FILE_COLUMNS: &str = "file_id, file_no, channel, settlement_date, file_url, file_size, \
    file_hash, record_count, total_amount, status, error_message, downloaded_at, imported_at, \
    created_at, updated_at";

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> ReconciliationError {
    move |e| ReconciliationError::persist(context, e)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "reconciliation-service"))]
    pub async fn new(
        database_url: &Secret<String>,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url.expose_secret())
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl ReconciliationStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("health check failed"))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    #[instrument(skip(self, task), fields(task_no = %task.task_no))]
    async fn create_task(&self, task: &ReconciliationTask) -> Result<ReconciliationTask> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_task"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO reconciliation_tasks (task_id, task_no, task_date, channel, task_type, status, progress, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {TASK_COLUMNS}
            "#
        );

        let created = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(task.task_id)
            .bind(&task.task_no)
            .bind(task.task_date)
            .bind(&task.channel)
            .bind(&task.task_type)
            .bind(&task.status)
            .bind(task.progress)
            .bind(task.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    ReconciliationError::DuplicateTask {
                        date: task.task_date,
                        channel: task.channel.clone(),
                    }
                }
                _ => ReconciliationError::persist("failed to create task", e),
            })?;

        timer.observe_duration();
        info!(task_id = %created.task_id, "Reconciliation task created");

        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn get_task(&self, task_id: Uuid) -> Result<Option<ReconciliationTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_task"])
            .start_timer();

        let sql = format!("SELECT {TASK_COLUMNS} FROM reconciliation_tasks WHERE task_id = $1");
        let task = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to get task"))?;

        timer.observe_duration();
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn get_task_by_date_and_channel(
        &self,
        task_date: NaiveDate,
        channel: &str,
    ) -> Result<Option<ReconciliationTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_task_by_date_and_channel"])
            .start_timer();

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM reconciliation_tasks WHERE task_date = $1 AND channel = $2"
        );
        let task = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(task_date)
            .bind(channel)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to get task by date and channel"))?;

        timer.observe_duration();
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn list_tasks(
        &self,
        filters: &TaskFilters,
        page: Pagination,
    ) -> Result<(Vec<ReconciliationTask>, i64)> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_tasks"])
            .start_timer();

        const WHERE: &str = r#"
            WHERE ($1::date IS NULL OR task_date = $1)
              AND ($2::varchar IS NULL OR channel = $2)
              AND ($3::varchar IS NULL OR status = $3)
              AND ($4::date IS NULL OR task_date >= $4)
              AND ($5::date IS NULL OR task_date <= $5)
        "#;
        let status = filters.status.map(|s| s.as_str());

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM reconciliation_tasks {WHERE}"))
                .bind(filters.task_date)
                .bind(filters.channel.as_deref())
                .bind(status)
                .bind(filters.start_date)
                .bind(filters.end_date)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("failed to count tasks"))?;

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM reconciliation_tasks {WHERE} \
             ORDER BY task_date DESC, created_at DESC LIMIT $6 OFFSET $7"
        );
        let tasks = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(filters.task_date)
            .bind(filters.channel.as_deref())
            .bind(status)
            .bind(filters.start_date)
            .bind(filters.end_date)
            .bind(page.page_size)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("failed to list tasks"))?;

        timer.observe_duration();
        Ok((tasks, total))
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn begin_processing(
        &self,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["begin_processing"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE reconciliation_tasks
            SET status = 'processing', progress = 0, started_at = $2, completed_at = NULL,
                error_message = NULL, updated_at = $2
            WHERE task_id = $1 AND status IN ('pending', 'failed')
            RETURNING {TASK_COLUMNS}
            "#
        );
        let task = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(task_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to start task"))?;

        timer.observe_duration();
        Ok(task)
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn reset_failed_task(&self, task_id: Uuid) -> Result<Option<ReconciliationTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reset_failed_task"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE reconciliation_tasks
            SET status = 'pending', progress = 0, error_message = NULL, started_at = NULL,
                completed_at = NULL, updated_at = NOW()
            WHERE task_id = $1 AND status = 'failed'
            RETURNING {TASK_COLUMNS}
            "#
        );
        let task = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to reset task"))?;

        timer.observe_duration();
        Ok(task)
    }

    #[instrument(skip(self), fields(task_id = %run.task_id))]
    async fn update_progress(&self, run: &TaskRun, progress: i32) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_progress"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE reconciliation_tasks
            SET progress = $3, updated_at = NOW()
            WHERE task_id = $1 AND status = 'processing' AND started_at = $2 AND progress <= $3
            "#,
        )
        .bind(run.task_id)
        .bind(run.started_at)
        .bind(progress)
        .execute(&self.pool)
        .await
        .map_err(db_error("failed to update progress"))?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(task_id = %run.task_id))]
    async fn set_channel_file_url(&self, run: &TaskRun, file_url: &str) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_channel_file_url"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE reconciliation_tasks
            SET channel_file_url = $3, updated_at = NOW()
            WHERE task_id = $1 AND status = 'processing' AND started_at = $2
            "#,
        )
        .bind(run.task_id)
        .bind(run.started_at)
        .bind(file_url)
        .execute(&self.pool)
        .await
        .map_err(db_error("failed to store channel file url"))?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, totals), fields(task_id = %run.task_id))]
    async fn complete_task(
        &self,
        run: &TaskRun,
        totals: &TaskAggregates,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_task"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE reconciliation_tasks
            SET status = 'completed', progress = 100,
                platform_count = $3, platform_amount = $4, channel_count = $5, channel_amount = $6,
                matched_count = $7, matched_amount = $8, diff_count = $9, diff_amount = $10,
                completed_at = $11, updated_at = $11
            WHERE task_id = $1 AND status = 'processing' AND started_at = $2
            RETURNING {TASK_COLUMNS}
            "#
        );
        let task = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(run.task_id)
            .bind(run.started_at)
            .bind(totals.platform_count)
            .bind(totals.platform_amount)
            .bind(totals.channel_count)
            .bind(totals.channel_amount)
            .bind(totals.matched_count)
            .bind(totals.matched_amount)
            .bind(totals.diff_count)
            .bind(totals.diff_amount)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to complete task"))?;

        timer.observe_duration();
        Ok(task)
    }

    #[instrument(skip(self), fields(task_id = %run.task_id))]
    async fn fail_task(&self, run: &TaskRun, error_message: &str) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_task"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE reconciliation_tasks
            SET status = 'failed', error_message = $3, updated_at = NOW()
            WHERE task_id = $1 AND status = 'processing' AND started_at = $2
            "#,
        )
        .bind(run.task_id)
        .bind(run.started_at)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(db_error("failed to mark task failed"))?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn set_report_url(
        &self,
        task_id: Uuid,
        report_url: &str,
    ) -> Result<Option<ReconciliationTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_report_url"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE reconciliation_tasks
            SET report_file_url = $2, updated_at = NOW()
            WHERE task_id = $1 AND status = 'completed'
            RETURNING {TASK_COLUMNS}
            "#
        );
        let task = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(task_id)
            .bind(report_url)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to store report url"))?;

        timer.observe_duration();
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn fail_stale_tasks(
        &self,
        started_before: DateTime<Utc>,
        error_message: &str,
    ) -> Result<Vec<ReconciliationTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_stale_tasks"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE reconciliation_tasks
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE status = 'processing' AND started_at < $1
            RETURNING {TASK_COLUMNS}
            "#
        );
        let tasks = sqlx::query_as::<_, ReconciliationTask>(&sql)
            .bind(started_before)
            .bind(error_message)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("failed to sweep stale tasks"))?;

        timer.observe_duration();
        if !tasks.is_empty() {
            warn!(count = tasks.len(), "Stale processing tasks failed");
        }
        Ok(tasks)
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    #[instrument(skip(self, records), fields(task_id = %run.task_id, count = records.len()))]
    async fn replace_records(
        &self,
        run: &TaskRun,
        records: &[ReconciliationRecord],
    ) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_records"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("failed to begin transaction"))?;

        // Lock the task row so the sweep cannot fail the run mid-replace.
        let held: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT task_id FROM reconciliation_tasks
            WHERE task_id = $1 AND status = 'processing' AND started_at = $2
            FOR UPDATE
            "#,
        )
        .bind(run.task_id)
        .bind(run.started_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("failed to lock task"))?;

        if held.is_none() {
            tx.rollback()
                .await
                .map_err(db_error("failed to roll back"))?;
            warn!("Run no longer holds the task, records left untouched");
            return Ok(false);
        }

        let deleted = sqlx::query("DELETE FROM reconciliation_records WHERE task_id = $1")
            .bind(run.task_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("failed to delete previous records"))?
            .rows_affected();

        for chunk in records.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO reconciliation_records ({RECORD_COLUMNS}) "));
            builder.push_values(chunk, |mut row, r| {
                row.push_bind(r.record_id)
                    .push_bind(r.task_id)
                    .push_bind(&r.task_no)
                    .push_bind(&r.payment_no)
                    .push_bind(&r.channel_trade_no)
                    .push_bind(&r.order_no)
                    .push_bind(r.merchant_id)
                    .push_bind(r.platform_amount)
                    .push_bind(r.channel_amount)
                    .push_bind(r.diff_amount)
                    .push_bind(&r.currency)
                    .push_bind(&r.platform_status)
                    .push_bind(&r.channel_status)
                    .push_bind(&r.diff_type)
                    .push_bind(&r.diff_reason)
                    .push_bind(r.is_resolved)
                    .push_bind(&r.resolved_by)
                    .push_bind(r.resolved_at)
                    .push_bind(&r.resolution_note)
                    .push_bind(r.created_at);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_error("failed to insert records"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("failed to commit records"))?;

        timer.observe_duration();
        info!(
            inserted = records.len(),
            replaced = deleted,
            "Reconciliation records persisted"
        );
        Ok(true)
    }

    #[instrument(skip(self), fields(record_id = %record_id))]
    async fn get_record(&self, record_id: Uuid) -> Result<Option<ReconciliationRecord>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_record"])
            .start_timer();

        let sql = format!("SELECT {RECORD_COLUMNS} FROM reconciliation_records WHERE record_id = $1");
        let record = sqlx::query_as::<_, ReconciliationRecord>(&sql)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to get record"))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn list_records(
        &self,
        filters: &RecordFilters,
        page: Pagination,
    ) -> Result<(Vec<ReconciliationRecord>, i64)> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_records"])
            .start_timer();

        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR task_id = $1)
              AND ($2::varchar IS NULL OR diff_type = $2)
              AND ($3::bool IS NULL OR is_resolved = $3)
              AND ($4::uuid IS NULL OR merchant_id = $4)
        "#;
        let diff_type = filters.diff_type.map(|t| t.as_str());

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM reconciliation_records {WHERE}"))
                .bind(filters.task_id)
                .bind(diff_type)
                .bind(filters.is_resolved)
                .bind(filters.merchant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("failed to count records"))?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM reconciliation_records {WHERE} \
             ORDER BY created_at DESC, record_id LIMIT $5 OFFSET $6"
        );
        let records = sqlx::query_as::<_, ReconciliationRecord>(&sql)
            .bind(filters.task_id)
            .bind(diff_type)
            .bind(filters.is_resolved)
            .bind(filters.merchant_id)
            .bind(page.page_size)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("failed to list records"))?;

        timer.observe_duration();
        Ok((records, total))
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn count_records_by_type(&self, task_id: Uuid) -> Result<RecordBreakdown> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_records_by_type"])
            .start_timer();

        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT diff_type, COUNT(*), COUNT(*) FILTER (WHERE NOT is_resolved)
            FROM reconciliation_records
            WHERE task_id = $1
            GROUP BY diff_type
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("failed to count records"))?;

        let mut breakdown = RecordBreakdown::default();
        for (diff_type, count, unresolved) in rows {
            if let Some(diff_type) = DiffType::parse(&diff_type) {
                breakdown.add(diff_type, count);
            }
            breakdown.unresolved += unresolved;
        }

        timer.observe_duration();
        Ok(breakdown)
    }

    #[instrument(skip(self, note), fields(record_id = %record_id))]
    async fn resolve_record(
        &self,
        record_id: Uuid,
        resolved_by: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationRecord>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["resolve_record"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE reconciliation_records
            SET is_resolved = TRUE, resolved_by = $2, resolved_at = $3, resolution_note = $4
            WHERE record_id = $1 AND is_resolved = FALSE
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, ReconciliationRecord>(&sql)
            .bind(record_id)
            .bind(resolved_by)
            .bind(now)
            .bind(note)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to resolve record"))?;

        timer.observe_duration();
        Ok(record)
    }

    // =========================================================================
    // Settlement File Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_file_by_date_and_channel(
        &self,
        settlement_date: NaiveDate,
        channel: &str,
    ) -> Result<Option<ChannelSettlementFile>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_file_by_date_and_channel"])
            .start_timer();

        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM channel_settlement_files WHERE settlement_date = $1 AND channel = $2"
        );
        let file = sqlx::query_as::<_, ChannelSettlementFile>(&sql)
            .bind(settlement_date)
            .bind(channel)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to get settlement file"))?;

        timer.observe_duration();
        Ok(file)
    }

    #[instrument(skip(self))]
    async fn get_file_by_no(&self, file_no: &str) -> Result<Option<ChannelSettlementFile>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_file_by_no"])
            .start_timer();

        let sql = format!("SELECT {FILE_COLUMNS} FROM channel_settlement_files WHERE file_no = $1");
        let file = sqlx::query_as::<_, ChannelSettlementFile>(&sql)
            .bind(file_no)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to get settlement file"))?;

        timer.observe_duration();
        Ok(file)
    }

    #[instrument(skip(self, update), fields(channel = %update.channel, settlement_date = %update.settlement_date))]
    async fn upsert_file(
        &self,
        update: &SettlementFileUpdate,
        now: DateTime<Utc>,
    ) -> Result<ChannelSettlementFile> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_file"])
            .start_timer();

        let file = update.file.as_ref();
        let downloaded_at = file.map(|_| now);
        let imported_at = (update.status == FileStatus::Imported).then_some(now);

        let sql = format!(
            r#"
            INSERT INTO channel_settlement_files
                (file_id, file_no, channel, settlement_date, file_url, file_size, file_hash,
                 record_count, total_amount, status, error_message, downloaded_at, imported_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, 0), $7, COALESCE($8, 0), COALESCE($9, 0),
                    $10, $11, $12, $13, $14, $14)
            ON CONFLICT (settlement_date, channel) DO UPDATE SET
                file_url = COALESCE(EXCLUDED.file_url, channel_settlement_files.file_url),
                file_size = COALESCE($6, channel_settlement_files.file_size),
                file_hash = COALESCE(EXCLUDED.file_hash, channel_settlement_files.file_hash),
                record_count = COALESCE($8, channel_settlement_files.record_count),
                total_amount = COALESCE($9, channel_settlement_files.total_amount),
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                downloaded_at = COALESCE(EXCLUDED.downloaded_at, channel_settlement_files.downloaded_at),
                imported_at = COALESCE(EXCLUDED.imported_at, channel_settlement_files.imported_at),
                updated_at = EXCLUDED.updated_at
            RETURNING {FILE_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, ChannelSettlementFile>(&sql)
            .bind(Uuid::new_v4())
            .bind(generate_file_no(update.channel, update.settlement_date))
            .bind(update.channel.as_str())
            .bind(update.settlement_date)
            .bind(file.map(|f| f.file_url.as_str()))
            .bind(file.map(|f| f.file_size))
            .bind(file.map(|f| f.file_hash.as_str()))
            .bind(update.record_count)
            .bind(update.total_amount)
            .bind(update.status.as_str())
            .bind(update.error_message.as_deref())
            .bind(downloaded_at)
            .bind(imported_at)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("failed to upsert settlement file"))?;

        timer.observe_duration();
        info!(file_no = %stored.file_no, status = %stored.status, "Settlement file metadata stored");
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn list_files(
        &self,
        filters: &FileFilters,
        page: Pagination,
    ) -> Result<(Vec<ChannelSettlementFile>, i64)> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_files"])
            .start_timer();

        const WHERE: &str = r#"
            WHERE ($1::varchar IS NULL OR channel = $1)
              AND ($2::date IS NULL OR settlement_date = $2)
              AND ($3::varchar IS NULL OR status = $3)
              AND ($4::date IS NULL OR settlement_date >= $4)
              AND ($5::date IS NULL OR settlement_date <= $5)
        "#;
        let status = filters.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM channel_settlement_files {WHERE}"
        ))
        .bind(filters.channel.as_deref())
        .bind(filters.settlement_date)
        .bind(status)
        .bind(filters.start_date)
        .bind(filters.end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("failed to count settlement files"))?;

        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM channel_settlement_files {WHERE} \
             ORDER BY settlement_date DESC, created_at DESC LIMIT $6 OFFSET $7"
        );
        let files = sqlx::query_as::<_, ChannelSettlementFile>(&sql)
            .bind(filters.channel.as_deref())
            .bind(filters.settlement_date)
            .bind(status)
            .bind(filters.start_date)
            .bind(filters.end_date)
            .bind(page.page_size)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("failed to list settlement files"))?;

        timer.observe_duration();
        Ok((files, total))
    }
}

