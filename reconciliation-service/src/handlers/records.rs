//! Diff record handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{ListRecordsQuery, Paginated, ResolveRecordRequest},
    handlers::OperatorContext,
    models::ReconciliationRecord,
    startup::AppState,
};

pub async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<ListRecordsQuery>,
) -> Result<Json<Paginated<ReconciliationRecord>>, AppError> {
    let filters = query.filters()?;
    let page = query.pagination();

    let (records, total) = state.service.list_records(&filters, page).await?;
    Ok(Json(Paginated::new(records, total, page)))
}

pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ReconciliationRecord>, AppError> {
    let record = state.service.get_record(record_id).await?;
    Ok(Json(record))
}

pub async fn resolve_record(
    State(state): State<AppState>,
    operator: OperatorContext,
    Path(record_id): Path<Uuid>,
    Json(payload): Json<ResolveRecordRequest>,
) -> Result<Json<ReconciliationRecord>, AppError> {
    payload.validate()?;

    tracing::info!(
        record_id = %record_id,
        resolved_by = %operator.user_id,
        "Resolving reconciliation record"
    );

    let record = state
        .service
        .resolve_record(record_id, &operator.user_id, &payload.note)
        .await?;
    Ok(Json(record))
}
