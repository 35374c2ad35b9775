//! Task lifecycle: creation, execution, retry, resolution and reporting.

use crate::error::{ReconciliationError, Result};
use crate::models::{
    progress, Channel, ChannelSettlementFile, DiffType, FileFilters, FileStatus, Pagination,
    ReconciliationRecord, ReconciliationTask, RecordFilters, SettlementFileUpdate, TaskFilters,
    TaskRun, TaskStatus, TaskSummary, TaskType,
};
use crate::services::channel_source::ChannelSource;
use crate::services::matching::{aggregate, checked_total, match_records};
use crate::services::metrics::{
    record_diff_records, record_error, record_resolution, record_task_duration,
    record_task_execution,
};
use crate::services::platform_source::PlatformSource;
use crate::services::report::ReportGenerator;
use crate::services::store::ReconciliationStore;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

/// Message recorded on tasks failed by the stale-task sweep.
pub const DEADLINE_EXCEEDED: &str = "processing deadline exceeded";

/// Task detail view: the task, a page of its records, its settlement file and
/// a summary computed over every record of the task.
#[derive(Debug, Clone)]
pub struct TaskDetails {
    pub task: ReconciliationTask,
    pub records: Vec<ReconciliationRecord>,
    pub records_total: i64,
    pub settlement_file: Option<ChannelSettlementFile>,
    pub summary: TaskSummary,
}

/// Pipeline stage a failure happened in; prefixes the task's error message.
#[derive(Debug, Clone, Copy)]
enum Step {
    Start,
    Download,
    Fetch,
    Parse,
    Match,
    Persist,
    Complete,
}

impl Step {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Download => "download",
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Match => "match",
            Self::Persist => "persist",
            Self::Complete => "complete",
        }
    }
}

struct StepFailure {
    step: Step,
    error: ReconciliationError,
}

trait AtStep<T> {
    fn at(self, step: Step) -> std::result::Result<T, StepFailure>;
}

impl<T> AtStep<T> for Result<T> {
    fn at(self, step: Step) -> std::result::Result<T, StepFailure> {
        self.map_err(|error| StepFailure { step, error })
    }
}

#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn ReconciliationStore>,
    channel_source: Arc<dyn ChannelSource>,
    platform_source: Arc<dyn PlatformSource>,
    report_generator: Arc<dyn ReportGenerator>,
    processing_deadline: Duration,
}

fn lost_run(run: &TaskRun) -> ReconciliationError {
    ReconciliationError::Persist(anyhow::anyhow!(
        "task {} is no longer held by the run started at {}",
        run.task_id,
        run.started_at
    ))
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        channel_source: Arc<dyn ChannelSource>,
        platform_source: Arc<dyn PlatformSource>,
        report_generator: Arc<dyn ReportGenerator>,
        processing_deadline: Duration,
    ) -> Self {
        Self {
            store,
            channel_source,
            platform_source,
            report_generator,
            processing_deadline,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReconciliationStore> {
        &self.store
    }

    // =========================================================================
    // Task lifecycle
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn create_task(
        &self,
        task_date: NaiveDate,
        channel: &str,
        task_type: &str,
    ) -> Result<ReconciliationTask> {
        let channel = Channel::parse(channel)
            .ok_or_else(|| ReconciliationError::InvalidInput(format!("unknown channel: {}", channel)))?;
        let task_type = TaskType::parse(task_type).ok_or_else(|| {
            ReconciliationError::InvalidInput(format!("unknown task type: {}", task_type))
        })?;

        if self
            .store
            .get_task_by_date_and_channel(task_date, channel.as_str())
            .await?
            .is_some()
        {
            return Err(ReconciliationError::DuplicateTask {
                date: task_date,
                channel: channel.as_str().to_string(),
            });
        }

        let task = ReconciliationTask::new_pending(task_date, channel, task_type, Utc::now());
        let task = self.store.create_task(&task).await?;

        info!(
            task_id = %task.task_id,
            task_no = %task.task_no,
            channel = %task.channel,
            task_date = %task.task_date,
            "Reconciliation task created"
        );
        Ok(task)
    }

    /// Claim the task and run the full pipeline. On failure the task is left
    /// `failed` with the step and cause recorded, and the error is returned.
    ///
    /// Once claimed, the run continues on its own task: dropping the returned
    /// future does not stop it.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn execute_task(&self, task_id: Uuid) -> Result<ReconciliationTask> {
        let task = match self.store.begin_processing(task_id, Utc::now()).await? {
            Some(task) => task,
            None => {
                let err = self.claim_rejection(task_id).await;
                record_error(err.kind());
                return Err(err);
            }
        };
        let run = task.current_run().ok_or_else(|| {
            ReconciliationError::Persist(anyhow::anyhow!(
                "claimed task {} has no start time",
                task_id
            ))
        })?;

        info!(task_no = %task.task_no, channel = %task.channel, "Reconciliation task started");

        let service = self.clone();
        tokio::spawn(async move { service.run_claimed(task, run).await }.in_current_span())
            .await
            .map_err(|e| {
                error!(error = %e, "Reconciliation run aborted");
                ReconciliationError::Persist(anyhow::anyhow!("reconciliation run aborted: {}", e))
            })?
    }

    async fn run_claimed(
        &self,
        task: ReconciliationTask,
        run: TaskRun,
    ) -> Result<ReconciliationTask> {
        let started = Instant::now();

        match self.run_pipeline(&task, &run).await {
            Ok(done) => {
                record_task_execution(&done.channel, "completed");
                record_task_duration(&done.channel, started.elapsed().as_secs_f64());
                info!(
                    task_no = %done.task_no,
                    matched_count = done.matched_count,
                    diff_count = done.diff_count,
                    diff_amount = done.diff_amount,
                    "Reconciliation task completed"
                );
                Ok(done)
            }
            Err(StepFailure { step, error: err }) => {
                let message = format!("{}: {}", step.as_str(), err);
                match self.store.fail_task(&run, &message).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Run no longer holds the task, failure not recorded"),
                    Err(e) => error!(error = %e, "Failed to record task failure"),
                }
                record_task_execution(&task.channel, "failed");
                record_error(err.kind());
                error!(step = step.as_str(), error = %err, "Reconciliation task failed");
                Err(err)
            }
        }
    }

    /// Work out why the pending|failed -> processing claim matched no row.
    async fn claim_rejection(&self, task_id: Uuid) -> ReconciliationError {
        match self.store.get_task(task_id).await {
            Ok(None) => ReconciliationError::task_not_found(task_id),
            Ok(Some(task)) => match task.status() {
                TaskStatus::Completed => ReconciliationError::AlreadyCompleted,
                // Pending/failed here means another caller claimed it in between.
                _ => ReconciliationError::AlreadyProcessing,
            },
            Err(e) => e,
        }
    }

    async fn checkpoint(
        &self,
        run: &TaskRun,
        value: i32,
        step: Step,
    ) -> std::result::Result<(), StepFailure> {
        let applied = self.store.update_progress(run, value).await.at(step)?;
        if !applied {
            return Err(StepFailure {
                step,
                error: lost_run(run),
            });
        }
        Ok(())
    }

    async fn run_pipeline(
        &self,
        task: &ReconciliationTask,
        run: &TaskRun,
    ) -> std::result::Result<ReconciliationTask, StepFailure> {
        let channel = Channel::parse(&task.channel)
            .ok_or_else(|| {
                ReconciliationError::InvalidInput(format!("unknown channel: {}", task.channel))
            })
            .at(Step::Start)?;

        self.checkpoint(run, progress::DOWNLOADING, Step::Download).await?;
        let file = self
            .obtain_settlement_file(channel, task.task_date)
            .await
            .at(Step::Download)?;
        let file_url = file
            .file_url
            .clone()
            .ok_or_else(|| {
                ReconciliationError::Download(anyhow::anyhow!(
                    "settlement file {} has no location",
                    file.file_no
                ))
            })
            .at(Step::Download)?;
        if !self
            .store
            .set_channel_file_url(run, &file_url)
            .await
            .at(Step::Download)?
        {
            return Err(StepFailure {
                step: Step::Download,
                error: lost_run(run),
            });
        }

        self.checkpoint(run, progress::FETCHING, Step::Fetch).await?;
        let platform = self
            .platform_source
            .fetch_payments(task.task_date, channel)
            .await
            .at(Step::Fetch)?;

        self.checkpoint(run, progress::PARSING, Step::Parse).await?;
        let channel_payments = self.channel_source.parse(&file_url).await.at(Step::Parse)?;
        self.mark_file_imported(channel, task.task_date, &channel_payments)
            .await
            .at(Step::Parse)?;

        self.checkpoint(run, progress::MATCHING, Step::Match).await?;
        let diffs = match_records(&platform, &channel_payments).at(Step::Match)?;
        let totals = aggregate(&platform, &channel_payments, &diffs).at(Step::Match)?;

        self.checkpoint(run, progress::SAVING, Step::Persist).await?;
        let mut by_type: HashMap<DiffType, u64> = HashMap::new();
        let now = Utc::now();
        let records: Vec<ReconciliationRecord> = diffs
            .into_iter()
            .map(|d| {
                *by_type.entry(d.diff_type).or_default() += 1;
                d.into_record(task, now)
            })
            .collect();
        if !self
            .store
            .replace_records(run, &records)
            .await
            .at(Step::Persist)?
        {
            return Err(StepFailure {
                step: Step::Persist,
                error: lost_run(run),
            });
        }

        let done = self
            .store
            .complete_task(run, &totals, Utc::now())
            .await
            .at(Step::Complete)?
            .ok_or_else(|| lost_run(run))
            .at(Step::Complete)?;

        for (diff_type, count) in by_type {
            record_diff_records(&done.channel, diff_type.as_str(), count);
        }
        Ok(done)
    }

    async fn mark_file_imported(
        &self,
        channel: Channel,
        settlement_date: NaiveDate,
        payments: &[crate::models::ChannelPayment],
    ) -> Result<ChannelSettlementFile> {
        let update = SettlementFileUpdate {
            channel,
            settlement_date,
            status: FileStatus::Imported,
            file: None,
            record_count: Some(payments.len() as i64),
            total_amount: Some(checked_total(payments.iter().map(|p| p.amount))?),
            error_message: None,
        };
        self.store.upsert_file(&update, Utc::now()).await
    }

    /// Reuse an imported file for (channel, date) or download a fresh one,
    /// keeping the metadata row current either way.
    async fn obtain_settlement_file(
        &self,
        channel: Channel,
        settlement_date: NaiveDate,
    ) -> Result<ChannelSettlementFile> {
        if let Some(existing) = self
            .store
            .get_file_by_date_and_channel(settlement_date, channel.as_str())
            .await?
        {
            if existing.is_imported() {
                info!(file_no = %existing.file_no, "Reusing imported settlement file");
                return Ok(existing);
            }
        }

        match self.channel_source.download(channel, settlement_date).await {
            Ok(file) => {
                let update = SettlementFileUpdate {
                    channel,
                    settlement_date,
                    status: FileStatus::Downloaded,
                    file: Some(file),
                    record_count: None,
                    total_amount: None,
                    error_message: None,
                };
                self.store.upsert_file(&update, Utc::now()).await
            }
            Err(err) => {
                let update = SettlementFileUpdate {
                    channel,
                    settlement_date,
                    status: FileStatus::Failed,
                    file: None,
                    record_count: None,
                    total_amount: None,
                    error_message: Some(err.to_string()),
                };
                if let Err(e) = self.store.upsert_file(&update, Utc::now()).await {
                    warn!(error = %e, "Failed to record settlement file failure");
                }
                Err(err)
            }
        }
    }

    /// failed -> pending -> execute. Anything but `failed` is refused.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn retry_task(&self, task_id: Uuid) -> Result<ReconciliationTask> {
        if self.store.reset_failed_task(task_id).await?.is_none() {
            let err = match self.store.get_task(task_id).await? {
                None => ReconciliationError::task_not_found(task_id),
                Some(task) => ReconciliationError::NotFailed {
                    status: task.status.clone(),
                },
            };
            record_error(err.kind());
            return Err(err);
        }

        info!("Retrying failed reconciliation task");
        self.execute_task(task_id).await
    }

    /// Fail every task that has sat in `processing` past the deadline.
    #[instrument(skip(self))]
    pub async fn sweep_stale_tasks(&self) -> Result<Vec<ReconciliationTask>> {
        let deadline = chrono::Duration::from_std(self.processing_deadline)
            .map_err(|e| ReconciliationError::InvalidInput(format!("processing deadline: {}", e)))?;
        let cutoff = Utc::now() - deadline;

        let failed = self.store.fail_stale_tasks(cutoff, DEADLINE_EXCEEDED).await?;
        for task in &failed {
            record_task_execution(&task.channel, "timed_out");
            warn!(
                task_id = %task.task_id,
                task_no = %task.task_no,
                started_at = ?task.started_at,
                "Processing deadline exceeded, task failed"
            );
        }
        Ok(failed)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_task(&self, task_id: Uuid) -> Result<ReconciliationTask> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| ReconciliationError::task_not_found(task_id))
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn get_task_details(&self, task_id: Uuid, page: Pagination) -> Result<TaskDetails> {
        let task = self.get_task(task_id).await?;
        let (records, records_total) = self
            .store
            .list_records(&RecordFilters::for_task(task_id), page)
            .await?;
        let breakdown = self.store.count_records_by_type(task_id).await?;
        let settlement_file = self
            .store
            .get_file_by_date_and_channel(task.task_date, &task.channel)
            .await?;

        Ok(TaskDetails {
            summary: TaskSummary::new(&task, breakdown),
            task,
            records,
            records_total,
            settlement_file,
        })
    }

    pub async fn list_tasks(
        &self,
        filters: &TaskFilters,
        page: Pagination,
    ) -> Result<(Vec<ReconciliationTask>, i64)> {
        self.store.list_tasks(filters, page).await
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Mark a diff record resolved. A record can be resolved exactly once.
    #[instrument(skip(self, note), fields(record_id = %record_id))]
    pub async fn resolve_record(
        &self,
        record_id: Uuid,
        resolved_by: &str,
        note: &str,
    ) -> Result<ReconciliationRecord> {
        let resolved_by = resolved_by.trim();
        if resolved_by.is_empty() {
            return Err(ReconciliationError::InvalidInput(
                "resolved_by is required".to_string(),
            ));
        }

        match self
            .store
            .resolve_record(record_id, resolved_by, note, Utc::now())
            .await?
        {
            Some(record) => {
                record_resolution(&record.diff_type);
                info!(
                    task_no = %record.task_no,
                    diff_type = %record.diff_type,
                    resolved_by = %resolved_by,
                    "Reconciliation record resolved"
                );
                Ok(record)
            }
            None => {
                let err = match self.store.get_record(record_id).await? {
                    None => ReconciliationError::record_not_found(record_id),
                    Some(_) => ReconciliationError::AlreadyResolved,
                };
                record_error(err.kind());
                Err(err)
            }
        }
    }

    pub async fn get_record(&self, record_id: Uuid) -> Result<ReconciliationRecord> {
        self.store
            .get_record(record_id)
            .await?
            .ok_or_else(|| ReconciliationError::record_not_found(record_id))
    }

    pub async fn list_records(
        &self,
        filters: &RecordFilters,
        page: Pagination,
    ) -> Result<(Vec<ReconciliationRecord>, i64)> {
        self.store.list_records(filters, page).await
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Regenerate the report for a completed task and store its location.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn generate_report(&self, task_id: Uuid) -> Result<ReconciliationTask> {
        let task = self.get_task(task_id).await?;
        if task.status() != TaskStatus::Completed {
            return Err(ReconciliationError::NotCompleted);
        }

        let report_url = self.report_generator.generate(&task).await.map_err(|e| {
            record_error(e.kind());
            e
        })?;

        self.store
            .set_report_url(task_id, &report_url)
            .await?
            .ok_or(ReconciliationError::NotCompleted)
    }

    // =========================================================================
    // Settlement files
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn download_settlement_file(
        &self,
        channel: &str,
        settlement_date: NaiveDate,
    ) -> Result<ChannelSettlementFile> {
        let channel = Channel::parse(channel)
            .ok_or_else(|| ReconciliationError::InvalidInput(format!("unknown channel: {}", channel)))?;
        self.obtain_settlement_file(channel, settlement_date).await
    }

    pub async fn get_file(&self, file_no: &str) -> Result<ChannelSettlementFile> {
        self.store
            .get_file_by_no(file_no)
            .await?
            .ok_or_else(|| ReconciliationError::NotFound(format!("settlement file {}", file_no)))
    }

    pub async fn list_files(
        &self,
        filters: &FileFilters,
        page: Pagination,
    ) -> Result<(Vec<ChannelSettlementFile>, i64)> {
        self.store.list_files(filters, page).await
    }
}
