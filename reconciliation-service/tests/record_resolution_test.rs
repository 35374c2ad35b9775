//! Integration tests for diff record listing and resolution.

mod common;

use common::{channel_payment, date, platform_payment, test_context, TestContext};
use reconciliation_service::error::ReconciliationError;
use reconciliation_service::models::{DiffType, Pagination, ReconciliationTask, RecordFilters};
use uuid::Uuid;

async fn completed_task(ctx: &TestContext) -> ReconciliationTask {
    ctx.platform.set_payments(vec![
        platform_payment("TRD1", 1000, "success"),
        platform_payment("TRD2", 500, "success"),
        platform_payment("TRD5", 800, "success"),
    ]);
    ctx.channel.set_payments(vec![
        channel_payment("TRD1", 1000, "success"),
        channel_payment("TRD2", 450, "success"),
        channel_payment("TRD5", 800, "failed"),
    ]);
    let task = ctx
        .service
        .create_task(date(2024, 1, 15), "paypal", "manual")
        .await
        .unwrap();
    ctx.service.execute_task(task.task_id).await.unwrap()
}

async fn record_of_type(ctx: &TestContext, task_id: Uuid, diff_type: DiffType) -> Uuid {
    ctx.store
        .records_of(task_id)
        .await
        .into_iter()
        .find(|r| r.diff_type() == diff_type)
        .map(|r| r.record_id)
        .unwrap()
}

#[tokio::test]
async fn resolve_marks_record_with_operator_and_note() {
    let ctx = test_context();
    let task = completed_task(&ctx).await;
    let record_id = record_of_type(&ctx, task.task_id, DiffType::AmountDiff).await;

    let record = ctx
        .service
        .resolve_record(record_id, "ops-42", "refund fee withheld by channel")
        .await
        .unwrap();

    assert!(record.is_resolved);
    assert_eq!(record.resolved_by.as_deref(), Some("ops-42"));
    assert_eq!(
        record.resolution_note.as_deref(),
        Some("refund fee withheld by channel")
    );
    assert!(record.resolved_at.is_some());
}

#[tokio::test]
async fn resolve_twice_is_rejected() {
    let ctx = test_context();
    let task = completed_task(&ctx).await;
    let record_id = record_of_type(&ctx, task.task_id, DiffType::StatusDiff).await;

    let first = ctx
        .service
        .resolve_record(record_id, "ops-42", "")
        .await
        .unwrap();
    let err = ctx
        .service
        .resolve_record(record_id, "ops-7", "second look")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::AlreadyResolved));

    // The first resolution stands.
    let record = ctx.service.get_record(record_id).await.unwrap();
    assert_eq!(record.resolved_by.as_deref(), Some("ops-42"));
    assert_eq!(record.resolved_at, first.resolved_at);
    assert_eq!(record.resolution_note.as_deref(), Some(""));
}

#[tokio::test]
async fn matched_records_are_born_resolved() {
    let ctx = test_context();
    let task = completed_task(&ctx).await;
    let record_id = record_of_type(&ctx, task.task_id, DiffType::Matched).await;

    let err = ctx
        .service
        .resolve_record(record_id, "ops-42", "")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::AlreadyResolved));
}

#[tokio::test]
async fn resolve_requires_operator_and_existing_record() {
    let ctx = test_context();
    let task = completed_task(&ctx).await;
    let record_id = record_of_type(&ctx, task.task_id, DiffType::AmountDiff).await;

    let err = ctx
        .service
        .resolve_record(record_id, "  ", "")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::InvalidInput(_)));

    let err = ctx
        .service
        .resolve_record(Uuid::new_v4(), "ops-42", "")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::NotFound(_)));
}

#[tokio::test]
async fn resolution_updates_unresolved_summary() {
    let ctx = test_context();
    let task = completed_task(&ctx).await;

    let before = ctx
        .service
        .get_task_details(task.task_id, Pagination::default())
        .await
        .unwrap();
    assert_eq!(before.summary.unresolved_count, 2);

    let record_id = record_of_type(&ctx, task.task_id, DiffType::AmountDiff).await;
    ctx.service
        .resolve_record(record_id, "ops-42", "")
        .await
        .unwrap();

    let after = ctx
        .service
        .get_task_details(task.task_id, Pagination::default())
        .await
        .unwrap();
    assert_eq!(after.summary.unresolved_count, 1);
    // Resolution does not move counts between types.
    assert_eq!(after.summary.by_type, {
        let mut by_type = before.summary.by_type;
        by_type.unresolved -= 1;
        by_type
    });
}

#[tokio::test]
async fn list_records_filters_by_type_and_resolution() {
    let ctx = test_context();
    let task = completed_task(&ctx).await;

    let (open, total) = ctx
        .service
        .list_records(
            &RecordFilters {
                task_id: Some(task.task_id),
                is_resolved: Some(false),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(open.iter().all(|r| !r.is_resolved));

    let (status_diffs, total) = ctx
        .service
        .list_records(
            &RecordFilters {
                task_id: Some(task.task_id),
                diff_type: Some(DiffType::StatusDiff),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(status_diffs[0].channel_trade_no, "TRD5");
    assert_eq!(status_diffs[0].diff_amount, 0);
    assert_eq!(status_diffs[0].platform_status.as_deref(), Some("success"));
    assert_eq!(status_diffs[0].channel_status.as_deref(), Some("failed"));
}
