//! Task handlers: create, list, inspect, execute, retry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreateTaskRequest, ListTasksQuery, PageQuery, Paginated, TaskDetailsResponse},
    models::ReconciliationTask,
    startup::AppState,
};

pub async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<ReconciliationTask>), AppError> {
    payload.validate()?;

    tracing::info!(
        task_date = %payload.task_date,
        channel = %payload.channel,
        task_type = %payload.task_type,
        "Creating reconciliation task"
    );

    let task = state
        .service
        .create_task(payload.task_date, &payload.channel, &payload.task_type)
        .await?;

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Paginated<ReconciliationTask>>, AppError> {
    let filters = query.filters()?;
    let page = query.pagination();

    let (tasks, total) = state.service.list_tasks(&filters, page).await?;
    Ok(Json(Paginated::new(tasks, total, page)))
}

/// Task, first page of its records, settlement file and summary.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TaskDetailsResponse>, AppError> {
    let page = query.pagination();
    let details = state.service.get_task_details(task_id, page).await?;
    Ok(Json(TaskDetailsResponse::new(details, page)))
}

/// Runs the pipeline to completion before responding.
pub async fn execute_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<ReconciliationTask>, AppError> {
    tracing::info!(task_id = %task_id, "Executing reconciliation task");
    let task = state.service.execute_task(task_id).await?;
    Ok(Json(task))
}

pub async fn retry_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<ReconciliationTask>, AppError> {
    tracing::info!(task_id = %task_id, "Retrying reconciliation task");
    let task = state.service.retry_task(task_id).await?;
    Ok(Json(task))
}
