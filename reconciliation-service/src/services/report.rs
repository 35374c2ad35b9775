//! Plain-text reconciliation reports.

use crate::error::{ReconciliationError, Result};
use crate::models::{
    DiffType, Pagination, ReconciliationRecord, ReconciliationTask, RecordFilters, MAX_PAGE_SIZE,
};
use crate::services::metrics::COLLABORATOR_CALL_DURATION;
use crate::services::store::ReconciliationStore;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Render a report for a completed task and return where it was stored.
    async fn generate(&self, task: &ReconciliationTask) -> Result<String>;
}

/// Writes `report-{task_no}-{timestamp}.txt` into `report_dir`.
pub struct FileReportGenerator {
    store: Arc<dyn ReconciliationStore>,
    report_dir: PathBuf,
}

impl FileReportGenerator {
    pub fn new(store: Arc<dyn ReconciliationStore>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            report_dir: report_dir.into(),
        }
    }

    async fn load_diff_records(&self, task: &ReconciliationTask) -> Result<Vec<ReconciliationRecord>> {
        let filters = RecordFilters::for_task(task.task_id);
        let mut page = Pagination::new(Some(1), Some(MAX_PAGE_SIZE));
        let mut diffs = Vec::new();

        loop {
            let (records, total) = self.store.list_records(&filters, page).await?;
            let fetched = records.len();
            diffs.extend(
                records
                    .into_iter()
                    .filter(|r| r.diff_type() != DiffType::Matched),
            );
            if fetched == 0 || page.page * page.page_size >= total {
                break;
            }
            page.page += 1;
        }

        Ok(diffs)
    }
}

#[async_trait]
impl ReportGenerator for FileReportGenerator {
    #[instrument(skip(self, task), fields(task_no = %task.task_no))]
    async fn generate(&self, task: &ReconciliationTask) -> Result<String> {
        let timer = COLLABORATOR_CALL_DURATION
            .with_label_values(&["report_generate"])
            .start_timer();

        let records = self.load_diff_records(task).await?;
        let now = Utc::now();
        let content = render_report(task, &records, now)?;

        tokio::fs::create_dir_all(&self.report_dir)
            .await
            .with_context(|| format!("creating {}", self.report_dir.display()))
            .map_err(ReconciliationError::Report)?;

        let path = self.report_dir.join(format!(
            "report-{}-{}.txt",
            task.task_no,
            now.format("%Y%m%d%H%M%S")
        ));
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("writing {}", path.display()))
            .map_err(ReconciliationError::Report)?;

        timer.observe_duration();
        let report_url = path.to_string_lossy().into_owned();
        info!(report_url = %report_url, diff_records = records.len(), "Report generated");
        Ok(report_url)
    }
}

/// Render minor units as a decimal string with two fraction digits.
pub fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_report(
    task: &ReconciliationTask,
    records: &[ReconciliationRecord],
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let mut out = String::new();
    write_report(&mut out, task, records, generated_at)
        .map_err(|e| ReconciliationError::Report(anyhow::anyhow!("rendering report: {}", e)))?;
    Ok(out)
}

fn write_report(
    out: &mut impl fmt::Write,
    task: &ReconciliationTask,
    records: &[ReconciliationRecord],
    generated_at: DateTime<Utc>,
) -> fmt::Result {
    const RULE: &str = "========================================";

    writeln!(out, "Reconciliation Report")?;
    writeln!(out, "{}", RULE)?;
    writeln!(out)?;
    writeln!(out, "Task:")?;
    writeln!(out, "  Task No:      {}", task.task_no)?;
    writeln!(out, "  Date:         {}", task.task_date.format("%Y-%m-%d"))?;
    writeln!(out, "  Channel:      {}", task.channel)?;
    writeln!(out, "  Status:       {}", task.status)?;
    writeln!(out, "  Created:      {}", format_time(Some(task.created_at)))?;
    writeln!(out, "  Completed:    {}", format_time(task.completed_at))?;
    writeln!(out)?;
    writeln!(out, "Summary:")?;
    let totals = [
        ("Platform:    ", task.platform_count, task.platform_amount),
        ("Channel:     ", task.channel_count, task.channel_amount),
        ("Matched:     ", task.matched_count, task.matched_amount),
        ("Differences: ", task.diff_count, task.diff_amount),
    ];
    for (label, count, amount) in totals {
        writeln!(out, "  {} {} records, {}", label, count, format_minor(amount))?;
    }

    if !records.is_empty() {
        writeln!(out)?;
        writeln!(out, "Differences:")?;
        writeln!(out, "----------------------------------------")?;
        for (i, r) in records.iter().enumerate() {
            writeln!(out)?;
            writeln!(out, "Record {}:", i + 1)?;
            writeln!(out, "  Payment No:   {}", r.payment_no.as_deref().unwrap_or("-"))?;
            writeln!(out, "  Trade No:     {}", r.channel_trade_no)?;
            writeln!(out, "  Type:         {}", r.diff_type().label())?;
            writeln!(out, "  Platform:     {}", format_minor(r.platform_amount))?;
            writeln!(out, "  Channel:      {}", format_minor(r.channel_amount))?;
            writeln!(out, "  Difference:   {}", format_minor(r.diff_amount))?;
            writeln!(out, "  Reason:       {}", r.diff_reason)?;
            let resolution = if r.is_resolved { "resolved" } else { "open" };
            writeln!(out, "  Resolution:   {}", resolution)?;
        }
    }

    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Generated at: {}", format_time(Some(generated_at)))
}
