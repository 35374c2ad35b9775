//! Durable store contract for tasks, diff records and settlement files.

use crate::error::Result;
use crate::models::{
    ChannelSettlementFile, FileFilters, Pagination, ReconciliationRecord, ReconciliationTask,
    RecordBreakdown, RecordFilters, SettlementFileUpdate, TaskAggregates, TaskFilters, TaskRun,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Every state transition is a conditional write: methods returning
/// `Option`/`bool` report `None`/`false` when the guard did not hold, and the
/// caller decides which domain error that means.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    // Tasks

    /// Insert a new task. A (task_date, channel) collision is `DuplicateTask`.
    async fn create_task(&self, task: &ReconciliationTask) -> Result<ReconciliationTask>;

    async fn get_task(&self, task_id: Uuid) -> Result<Option<ReconciliationTask>>;

    async fn get_task_by_date_and_channel(
        &self,
        task_date: NaiveDate,
        channel: &str,
    ) -> Result<Option<ReconciliationTask>>;

    /// Newest business date first, then newest creation.
    async fn list_tasks(
        &self,
        filters: &TaskFilters,
        page: Pagination,
    ) -> Result<(Vec<ReconciliationTask>, i64)>;

    /// pending|failed -> processing with progress 0 and a fresh `started_at`.
    async fn begin_processing(
        &self,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationTask>>;

    /// failed -> pending, clearing progress, error and timestamps.
    async fn reset_failed_task(&self, task_id: Uuid) -> Result<Option<ReconciliationTask>>;

    // Per-run writes apply only while the task is processing under
    // `run.started_at`.

    /// Never lowers progress.
    async fn update_progress(&self, run: &TaskRun, progress: i32) -> Result<bool>;

    async fn set_channel_file_url(&self, run: &TaskRun, file_url: &str) -> Result<bool>;

    /// processing -> completed with aggregates and progress 100.
    async fn complete_task(
        &self,
        run: &TaskRun,
        totals: &TaskAggregates,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationTask>>;

    /// processing -> failed with the message recorded.
    async fn fail_task(&self, run: &TaskRun, error_message: &str) -> Result<bool>;

    async fn set_report_url(
        &self,
        task_id: Uuid,
        report_url: &str,
    ) -> Result<Option<ReconciliationTask>>;

    /// Fail every processing task started before `started_before`.
    async fn fail_stale_tasks(
        &self,
        started_before: DateTime<Utc>,
        error_message: &str,
    ) -> Result<Vec<ReconciliationTask>>;

    // Records

    /// Atomically drop the task's previous records and insert `records`.
    /// `false` when `run` no longer holds the task; nothing is written then.
    async fn replace_records(
        &self,
        run: &TaskRun,
        records: &[ReconciliationRecord],
    ) -> Result<bool>;

    async fn get_record(&self, record_id: Uuid) -> Result<Option<ReconciliationRecord>>;

    /// Newest first.
    async fn list_records(
        &self,
        filters: &RecordFilters,
        page: Pagination,
    ) -> Result<(Vec<ReconciliationRecord>, i64)>;

    async fn count_records_by_type(&self, task_id: Uuid) -> Result<RecordBreakdown>;

    /// unresolved -> resolved. `None` when the record is missing or already resolved.
    async fn resolve_record(
        &self,
        record_id: Uuid,
        resolved_by: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReconciliationRecord>>;

    // Settlement files

    async fn get_file_by_date_and_channel(
        &self,
        settlement_date: NaiveDate,
        channel: &str,
    ) -> Result<Option<ChannelSettlementFile>>;

    async fn get_file_by_no(&self, file_no: &str) -> Result<Option<ChannelSettlementFile>>;

    /// Insert or update the row for (settlement_date, channel). Fields left
    /// `None` in the update keep their stored value.
    async fn upsert_file(
        &self,
        update: &SettlementFileUpdate,
        now: DateTime<Utc>,
    ) -> Result<ChannelSettlementFile>;

    /// Newest settlement date first.
    async fn list_files(
        &self,
        filters: &FileFilters,
        page: Pagination,
    ) -> Result<(Vec<ChannelSettlementFile>, i64)>;
}
