//! Domain errors for the reconciliation pipeline.

use chrono::NaiveDate;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("reconciliation task already exists for {channel} on {date}")]
    DuplicateTask { date: NaiveDate, channel: String },

    #[error("task is already processing")]
    AlreadyProcessing,

    #[error("task is already completed")]
    AlreadyCompleted,

    #[error("only failed tasks can be retried (status: {status})")]
    NotFailed { status: String },

    #[error("settlement file download failed: {0:#}")]
    Download(anyhow::Error),

    #[error("platform payment fetch failed: {0:#}")]
    Fetch(anyhow::Error),

    #[error("settlement file parse failed: {0:#}")]
    Parse(anyhow::Error),

    #[error("amount overflow: {0}")]
    AmountOverflow(String),

    #[error("storage failure: {0:#}")]
    Persist(anyhow::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("record is already resolved")]
    AlreadyResolved,

    #[error("task is not completed")]
    NotCompleted,

    #[error("report generation failed: {0:#}")]
    Report(anyhow::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T, E = ReconciliationError> = std::result::Result<T, E>;

impl ReconciliationError {
    /// Stable label for the errors metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateTask { .. } => "duplicate_task",
            Self::AlreadyProcessing => "already_processing",
            Self::AlreadyCompleted => "already_completed",
            Self::NotFailed { .. } => "not_failed",
            Self::Download(_) => "download",
            Self::Fetch(_) => "fetch",
            Self::Parse(_) => "parse",
            Self::AmountOverflow(_) => "amount_overflow",
            Self::Persist(_) => "persist",
            Self::NotFound(_) => "not_found",
            Self::AlreadyResolved => "already_resolved",
            Self::NotCompleted => "not_completed",
            Self::Report(_) => "report",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    pub fn task_not_found(task_id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("task {}", task_id))
    }

    pub fn record_not_found(record_id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("record {}", record_id))
    }

    pub fn persist(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Persist(anyhow::anyhow!("{}: {}", context, err))
    }
}

impl From<ReconciliationError> for AppError {
    fn from(err: ReconciliationError) -> Self {
        let message = err.to_string();
        match err {
            ReconciliationError::DuplicateTask { .. }
            | ReconciliationError::AlreadyProcessing
            | ReconciliationError::AlreadyCompleted
            | ReconciliationError::NotFailed { .. }
            | ReconciliationError::AlreadyResolved => AppError::Conflict(anyhow::anyhow!(message)),
            ReconciliationError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            ReconciliationError::NotCompleted | ReconciliationError::InvalidInput(_) => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            ReconciliationError::Download(_)
            | ReconciliationError::Fetch(_)
            | ReconciliationError::Parse(_)
            | ReconciliationError::AmountOverflow(_)
            | ReconciliationError::Report(_) => AppError::BadGateway(message),
            ReconciliationError::Persist(e) => AppError::DatabaseError(e),
        }
    }
}
