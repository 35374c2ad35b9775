//! Integration tests for report generation.

mod common;

use common::{channel_payment, date, platform_payment, test_context};
use reconciliation_service::error::ReconciliationError;
use reconciliation_service::models::TaskStatus;
use uuid::Uuid;

#[tokio::test]
async fn report_requires_completed_task() {
    let ctx = test_context();
    let task = ctx
        .service
        .create_task(date(2024, 1, 15), "wechat", "daily")
        .await
        .unwrap();

    let err = ctx.service.generate_report(task.task_id).await.unwrap_err();
    assert!(matches!(err, ReconciliationError::NotCompleted));

    let err = ctx.service.generate_report(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ReconciliationError::NotFound(_)));
}

#[tokio::test]
async fn report_lists_only_differences_and_is_recorded_on_task() {
    let ctx = test_context();
    ctx.platform.set_payments(vec![
        platform_payment("TRD1", 1000, "success"),
        platform_payment("TRD2", 500, "success"),
        platform_payment("TRD3", 300, "success"),
    ]);
    ctx.channel.set_payments(vec![
        channel_payment("TRD1", 1000, "success"),
        channel_payment("TRD2", 450, "success"),
        channel_payment("TRD4", 200, "success"),
    ]);
    let task = ctx
        .service
        .create_task(date(2024, 1, 15), "wechat", "daily")
        .await
        .unwrap();
    ctx.service.execute_task(task.task_id).await.unwrap();

    let task = ctx.service.generate_report(task.task_id).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
    let report_url = task.report_file_url.clone().unwrap();

    let path = std::path::Path::new(&report_url);
    assert!(path.starts_with(ctx.report_dir.path()));
    let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with(&format!("report-{}-", task.task_no)));
    assert!(file_name.ends_with(".txt"));

    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.contains(&task.task_no));
    assert!(content.contains("Matched:      1 records, 10.00"));
    assert!(content.contains("Differences:  3 records, 1.50"));
    assert!(content.contains("TRD2"));
    assert!(content.contains("TRD3"));
    assert!(content.contains("TRD4"));
    assert!(!content.contains("TRD1"));
    assert!(content.contains("Amount mismatch"));
    assert!(content.contains("Channel only"));
}

#[tokio::test]
async fn regenerating_report_replaces_location() {
    let ctx = test_context();
    let task = ctx
        .service
        .create_task(date(2024, 1, 15), "bank", "manual")
        .await
        .unwrap();
    ctx.service.execute_task(task.task_id).await.unwrap();

    let first = ctx.service.generate_report(task.task_id).await.unwrap();
    assert!(first.report_file_url.is_some());

    let second = ctx.service.generate_report(task.task_id).await.unwrap();
    let stored = ctx.service.get_task(task.task_id).await.unwrap();
    assert_eq!(stored.report_file_url, second.report_file_url);
    // An empty day still reports its totals.
    let content = std::fs::read_to_string(second.report_file_url.unwrap()).unwrap();
    assert!(content.contains("Platform:     0 records, 0.00"));
    assert!(!content.contains("Record 1:"));
}
