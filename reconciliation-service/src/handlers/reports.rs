use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{dtos::ReportResponse, startup::AppState};

/// Regenerates on every call; the stored reference is overwritten.
pub async fn generate_report(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<ReportResponse>, AppError> {
    tracing::info!(task_id = %task_id, "Generating reconciliation report");
    let task = state.service.generate_report(task_id).await?;
    Ok(Json(ReportResponse::from(task)))
}
