//! Background loop that reconciles yesterday for every configured channel.

use crate::config::SchedulerConfig;
use crate::error::ReconciliationError;
use crate::models::{TaskStatus, TaskType};
use crate::services::orchestrator::ReconciliationService;
use chrono::{Days, NaiveDate, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What one scheduler pass did, per channel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerRun {
    pub swept: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct DailyScheduler {
    service: Arc<ReconciliationService>,
    config: SchedulerConfig,
    shutdown_token: CancellationToken,
}

impl DailyScheduler {
    pub fn new(service: Arc<ReconciliationService>, config: SchedulerConfig) -> Self {
        Self {
            service,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Spawn the loop. Returns `None` when disabled by configuration.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Daily reconciliation scheduler disabled by configuration");
            return None;
        }

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            channels = ?self.config.channels,
            "Starting daily reconciliation scheduler"
        );

        let service = self.service.clone();
        let channels = self.config.channels.clone();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown_token.clone();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Daily reconciliation scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(yesterday) = Utc::now().date_naive().checked_sub_days(Days::new(1)) else {
                            continue;
                        };
                        run_once(&service, &channels, yesterday).await;
                    }
                }
            }
        }))
    }

    pub fn shutdown(&self) {
        tracing::info!("Stopping daily reconciliation scheduler");
        self.shutdown_token.cancel();
    }
}

impl Drop for DailyScheduler {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Sweep stale tasks, then create and execute the task for `task_date` on
/// each channel. Errors are logged and counted, never propagated.
pub async fn run_once(
    service: &ReconciliationService,
    channels: &[String],
    task_date: NaiveDate,
) -> SchedulerRun {
    let mut run = SchedulerRun::default();

    match service.sweep_stale_tasks().await {
        Ok(swept) => run.swept = swept.len(),
        Err(e) => tracing::error!(error = %e, "Stale task sweep failed"),
    }

    for channel in channels {
        let task = match service
            .create_task(task_date, channel, TaskType::Daily.as_str())
            .await
        {
            Ok(task) => task,
            Err(ReconciliationError::DuplicateTask { .. }) => {
                match service
                    .store()
                    .get_task_by_date_and_channel(task_date, channel)
                    .await
                {
                    Ok(Some(task)) => task,
                    Ok(None) => {
                        run.skipped.push(channel.clone());
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(channel = %channel, error = %e, "Failed to load existing task");
                        run.failed.push(channel.clone());
                        continue;
                    }
                }
            }
            Err(e) => {
                tracing::error!(channel = %channel, error = %e, "Failed to create daily task");
                run.failed.push(channel.clone());
                continue;
            }
        };

        if task.status() != TaskStatus::Pending {
            tracing::debug!(task_no = %task.task_no, status = %task.status, "Daily task not pending, skipping");
            run.skipped.push(channel.clone());
            continue;
        }

        match service.execute_task(task.task_id).await {
            Ok(_) => run.completed.push(channel.clone()),
            Err(e) => {
                tracing::error!(task_no = %task.task_no, error = %e, "Daily reconciliation failed");
                run.failed.push(channel.clone());
            }
        }
    }

    tracing::info!(
        task_date = %task_date,
        swept = run.swept,
        completed = run.completed.len(),
        failed = run.failed.len(),
        skipped = run.skipped.len(),
        "Daily reconciliation pass finished"
    );
    run
}
