//! Domain models for reconciliation-service.
//!
//! Row structs keep enum columns as `String`, mirroring the database; the
//! typed enums below are the vocabulary the orchestrator and matcher use.
//! All monetary values are `i64` minor currency units.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Largest page a list endpoint will return.
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 20;

// ============================================================================
// Channels and task kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stripe,
    Paypal,
    Alipay,
    Wechat,
    Bank,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Stripe,
        Channel::Paypal,
        Channel::Alipay,
        Channel::Wechat,
        Channel::Bank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
            Self::Alipay => "alipay",
            Self::Wechat => "wechat",
            Self::Bank => "bank",
        }
    }

    /// Case-insensitive; `None` for channels the platform does not settle with.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Some(Self::Stripe),
            "paypal" => Some(Self::Paypal),
            "alipay" => Some(Self::Alipay),
            "wechat" => Some(Self::Wechat),
            "bank" => Some(Self::Bank),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Daily,
    Manual,
    Reconcile,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Manual => "manual",
            Self::Reconcile => "reconcile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "manual" => Some(Self::Manual),
            "reconcile" => Some(Self::Reconcile),
            _ => None,
        }
    }
}

// ============================================================================
// Task Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Strict variant for user-supplied filters.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" | "processing" | "completed" | "failed" => Some(Self::from_str(s)),
            _ => None,
        }
    }

    /// States from which `execute` may claim the task.
    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// Progress checkpoints persisted while a task runs.
pub mod progress {
    pub const STARTED: i32 = 0;
    pub const DOWNLOADING: i32 = 10;
    pub const FETCHING: i32 = 30;
    pub const PARSING: i32 = 50;
    pub const MATCHING: i32 = 70;
    pub const SAVING: i32 = 90;
    pub const DONE: i32 = 100;
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReconciliationTask {
    pub task_id: Uuid,
    pub task_no: String,
    pub task_date: NaiveDate,
    pub channel: String,
    pub task_type: String,
    pub status: String,
    pub progress: i32,
    pub error_message: Option<String>,
    pub platform_count: i64,
    pub platform_amount: i64,
    pub channel_count: i64,
    pub channel_amount: i64,
    pub matched_count: i64,
    pub matched_amount: i64,
    pub diff_count: i64,
    pub diff_amount: i64,
    pub channel_file_url: Option<String>,
    pub report_file_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReconciliationTask {
    /// Build a fresh pending task; the store assigns nothing else.
    pub fn new_pending(
        task_date: NaiveDate,
        channel: Channel,
        task_type: TaskType,
        now: DateTime<Utc>,
    ) -> Self {
        let task_id = Uuid::new_v4();
        Self {
            task_id,
            task_no: generate_task_no(channel, task_date, task_id),
            task_date,
            channel: channel.as_str().to_string(),
            task_type: task_type.as_str().to_string(),
            status: TaskStatus::Pending.as_str().to_string(),
            progress: progress::STARTED,
            error_message: None,
            platform_count: 0,
            platform_amount: 0,
            channel_count: 0,
            channel_amount: 0,
            matched_count: 0,
            matched_amount: 0,
            diff_count: 0,
            diff_amount: 0,
            channel_file_url: None,
            report_file_url: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_str(&self.status)
    }

    /// The run that currently holds this task, if it is processing.
    pub fn current_run(&self) -> Option<TaskRun> {
        match (self.status(), self.started_at) {
            (TaskStatus::Processing, Some(started_at)) => Some(TaskRun {
                task_id: self.task_id,
                started_at,
            }),
            _ => None,
        }
    }
}

/// One claim of a task. Writes made on behalf of a run only apply while the
/// task is still processing under the same `started_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRun {
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// `RECON-STRIPE-20240115-1a2b3c4d`: channel, business date and the first
/// eight hex digits of the task id.
pub fn generate_task_no(channel: Channel, task_date: NaiveDate, task_id: Uuid) -> String {
    let simple = task_id.simple().to_string();
    format!(
        "RECON-{}-{}-{}",
        channel.as_str().to_ascii_uppercase(),
        task_date.format("%Y%m%d"),
        &simple[..8]
    )
}

/// Totals written onto a task when it completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskAggregates {
    pub platform_count: i64,
    pub platform_amount: i64,
    pub channel_count: i64,
    pub channel_amount: i64,
    pub matched_count: i64,
    pub matched_amount: i64,
    pub diff_count: i64,
    pub diff_amount: i64,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    pub task_date: Option<NaiveDate>,
    pub channel: Option<String>,
    pub status: Option<TaskStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl TaskFilters {
    pub fn matches(&self, task: &ReconciliationTask) -> bool {
        self.task_date.map_or(true, |d| task.task_date == d)
            && self.channel.as_ref().map_or(true, |c| &task.channel == c)
            && self.status.map_or(true, |s| task.status() == s)
            && self.start_date.map_or(true, |d| task.task_date >= d)
            && self.end_date.map_or(true, |d| task.task_date <= d)
    }
}

// ============================================================================
// Diff Record Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffType {
    Matched,
    PlatformOnly,
    ChannelOnly,
    AmountDiff,
    StatusDiff,
}

impl DiffType {
    pub const ALL: [DiffType; 5] = [
        DiffType::Matched,
        DiffType::PlatformOnly,
        DiffType::ChannelOnly,
        DiffType::AmountDiff,
        DiffType::StatusDiff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::PlatformOnly => "platform_only",
            Self::ChannelOnly => "channel_only",
            Self::AmountDiff => "amount_diff",
            Self::StatusDiff => "status_diff",
        }
    }

    pub fn from_str(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Matched)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "matched" => Some(Self::Matched),
            "platform_only" => Some(Self::PlatformOnly),
            "channel_only" => Some(Self::ChannelOnly),
            "amount_diff" => Some(Self::AmountDiff),
            "status_diff" => Some(Self::StatusDiff),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Matched => "Matched",
            Self::PlatformOnly => "Platform only",
            Self::ChannelOnly => "Channel only",
            Self::AmountDiff => "Amount mismatch",
            Self::StatusDiff => "Status mismatch",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReconciliationRecord {
    pub record_id: Uuid,
    pub task_id: Uuid,
    pub task_no: String,
    pub payment_no: Option<String>,
    pub channel_trade_no: String,
    pub order_no: Option<String>,
    pub merchant_id: Option<Uuid>,
    pub platform_amount: i64,
    pub channel_amount: i64,
    pub diff_amount: i64,
    pub currency: String,
    pub platform_status: Option<String>,
    pub channel_status: Option<String>,
    pub diff_type: String,
    pub diff_reason: String,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    pub fn diff_type(&self) -> DiffType {
        DiffType::from_str(&self.diff_type)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilters {
    pub task_id: Option<Uuid>,
    pub diff_type: Option<DiffType>,
    pub is_resolved: Option<bool>,
    pub merchant_id: Option<Uuid>,
}

impl RecordFilters {
    pub fn for_task(task_id: Uuid) -> Self {
        Self {
            task_id: Some(task_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &ReconciliationRecord) -> bool {
        self.task_id.map_or(true, |id| record.task_id == id)
            && self.diff_type.map_or(true, |t| record.diff_type() == t)
            && self.is_resolved.map_or(true, |r| record.is_resolved == r)
            && self
                .merchant_id
                .map_or(true, |m| record.merchant_id == Some(m))
    }
}

/// Per-type record counts for one task, computed over all of its records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordBreakdown {
    pub matched: i64,
    pub platform_only: i64,
    pub channel_only: i64,
    pub amount_diff: i64,
    pub status_diff: i64,
    pub unresolved: i64,
}

impl RecordBreakdown {
    pub fn add(&mut self, diff_type: DiffType, count: i64) {
        match diff_type {
            DiffType::Matched => self.matched += count,
            DiffType::PlatformOnly => self.platform_only += count,
            DiffType::ChannelOnly => self.channel_only += count,
            DiffType::AmountDiff => self.amount_diff += count,
            DiffType::StatusDiff => self.status_diff += count,
        }
    }
}

/// Headline numbers for one task.
///
/// `total_count` is platform plus channel rows; the match rate is taken over
/// output records so a fully matched day reads 100%.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskSummary {
    pub total_count: i64,
    pub matched_count: i64,
    pub diff_count: i64,
    pub unresolved_count: i64,
    pub match_rate_bps: i64,
    pub match_rate: f64,
    pub by_type: RecordBreakdown,
}

impl TaskSummary {
    pub fn new(task: &ReconciliationTask, breakdown: RecordBreakdown) -> Self {
        let records = task.matched_count + task.diff_count;
        let match_rate_bps = if records > 0 {
            task.matched_count * 10_000 / records
        } else {
            0
        };
        Self {
            total_count: task.platform_count + task.channel_count,
            matched_count: task.matched_count,
            diff_count: task.diff_count,
            unresolved_count: breakdown.unresolved,
            match_rate_bps,
            match_rate: match_rate_bps as f64 / 100.0,
            by_type: breakdown,
        }
    }
}

// ============================================================================
// Settlement File Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Downloaded,
    Imported,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Imported => "imported",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "downloaded" => Self::Downloaded,
            "imported" => Self::Imported,
            _ => Self::Failed,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "downloaded" | "imported" | "failed" => Some(Self::from_str(s)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChannelSettlementFile {
    pub file_id: Uuid,
    pub file_no: String,
    pub channel: String,
    pub settlement_date: NaiveDate,
    pub file_url: Option<String>,
    pub file_size: i64,
    pub file_hash: Option<String>,
    pub record_count: i64,
    pub total_amount: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub imported_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelSettlementFile {
    pub fn status(&self) -> FileStatus {
        FileStatus::from_str(&self.status)
    }

    pub fn is_imported(&self) -> bool {
        self.status() == FileStatus::Imported && self.file_url.is_some()
    }
}

/// `FILE-STRIPE-20240115-1a2b3c4d`
pub fn generate_file_no(channel: Channel, settlement_date: NaiveDate) -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!(
        "FILE-{}-{}-{}",
        channel.as_str().to_ascii_uppercase(),
        settlement_date.format("%Y%m%d"),
        &simple[..8]
    )
}

/// What a channel source hands back after fetching a settlement file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub file_url: String,
    pub file_size: i64,
    pub file_hash: String,
}

/// Upsert payload for settlement file metadata, keyed by (date, channel).
#[derive(Debug, Clone)]
pub struct SettlementFileUpdate {
    pub channel: Channel,
    pub settlement_date: NaiveDate,
    pub status: FileStatus,
    pub file: Option<DownloadedFile>,
    pub record_count: Option<i64>,
    pub total_amount: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FileFilters {
    pub channel: Option<String>,
    pub settlement_date: Option<NaiveDate>,
    pub status: Option<FileStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl FileFilters {
    pub fn matches(&self, file: &ChannelSettlementFile) -> bool {
        self.channel.as_ref().map_or(true, |c| &file.channel == c)
            && self
                .settlement_date
                .map_or(true, |d| file.settlement_date == d)
            && self.status.map_or(true, |s| file.status() == s)
            && self.start_date.map_or(true, |d| file.settlement_date >= d)
            && self.end_date.map_or(true, |d| file.settlement_date <= d)
    }
}

// ============================================================================
// Matching inputs
// ============================================================================

/// A payment as the platform recorded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPayment {
    pub payment_no: String,
    #[serde(default)]
    pub order_no: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<Uuid>,
    pub channel_trade_no: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

/// A payment as the channel's settlement file reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPayment {
    pub channel_trade_no: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Pagination
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    /// Clamp caller input: page >= 1, page_size within [1, MAX_PAGE_SIZE].
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        (total + self.page_size - 1) / self.page_size
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}
