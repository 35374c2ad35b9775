//! Request and response bodies for the HTTP API.

use crate::error::ReconciliationError;
use crate::models::{
    ChannelSettlementFile, DiffType, FileFilters, FileStatus, Pagination, ReconciliationRecord,
    ReconciliationTask, RecordFilters, TaskFilters, TaskStatus, TaskSummary,
};
use crate::services::TaskDetails;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

fn default_task_type() -> String {
    "manual".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    pub task_date: NaiveDate,
    #[validate(length(min = 1, max = 32))]
    pub channel: String,
    #[serde(default = "default_task_type")]
    #[validate(length(min = 1, max = 20))]
    pub task_type: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ResolveRecordRequest {
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub note: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DownloadFileRequest {
    #[validate(length(min = 1, max = 32))]
    pub channel: String,
    pub settlement_date: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.page_size)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    pub task_date: Option<NaiveDate>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListTasksQuery {
    pub fn filters(&self) -> Result<TaskFilters, ReconciliationError> {
        let status = self
            .status
            .as_deref()
            .map(|s| {
                TaskStatus::parse(s)
                    .ok_or_else(|| ReconciliationError::InvalidInput(format!("unknown status: {}", s)))
            })
            .transpose()?;

        Ok(TaskFilters {
            task_date: self.task_date,
            channel: self.channel.as_ref().map(|c| c.to_ascii_lowercase()),
            status,
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.page_size)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRecordsQuery {
    pub task_id: Option<Uuid>,
    pub diff_type: Option<String>,
    pub is_resolved: Option<bool>,
    pub merchant_id: Option<Uuid>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListRecordsQuery {
    pub fn filters(&self) -> Result<RecordFilters, ReconciliationError> {
        let diff_type = self
            .diff_type
            .as_deref()
            .map(|t| {
                DiffType::parse(t)
                    .ok_or_else(|| ReconciliationError::InvalidInput(format!("unknown diff type: {}", t)))
            })
            .transpose()?;

        Ok(RecordFilters {
            task_id: self.task_id,
            diff_type,
            is_resolved: self.is_resolved,
            merchant_id: self.merchant_id,
        })
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.page_size)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListFilesQuery {
    pub channel: Option<String>,
    pub settlement_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListFilesQuery {
    pub fn filters(&self) -> Result<FileFilters, ReconciliationError> {
        let status = self
            .status
            .as_deref()
            .map(|s| {
                FileStatus::parse(s)
                    .ok_or_else(|| ReconciliationError::InvalidInput(format!("unknown file status: {}", s)))
            })
            .transpose()?;

        Ok(FileFilters {
            channel: self.channel.as_ref().map(|c| c.to_ascii_lowercase()),
            settlement_date: self.settlement_date,
            status,
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.page_size)
    }
}

/// One page of a listing.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, page: Pagination) -> Self {
        Self {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
            total_pages: page.total_pages(total),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskDetailsResponse {
    pub task: ReconciliationTask,
    pub records: Paginated<ReconciliationRecord>,
    pub settlement_file: Option<ChannelSettlementFile>,
    pub summary: TaskSummary,
}

impl TaskDetailsResponse {
    pub fn new(details: TaskDetails, page: Pagination) -> Self {
        Self {
            records: Paginated::new(details.records, details.records_total, page),
            task: details.task,
            settlement_file: details.settlement_file,
            summary: details.summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub task_id: Uuid,
    pub task_no: String,
    pub report_url: Option<String>,
}

impl From<ReconciliationTask> for ReportResponse {
    fn from(task: ReconciliationTask) -> Self {
        Self {
            task_id: task.task_id,
            task_no: task.task_no,
            report_url: task.report_file_url,
        }
    }
}
