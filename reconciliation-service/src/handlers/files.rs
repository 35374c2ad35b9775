//! Settlement file handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{DownloadFileRequest, ListFilesQuery, Paginated},
    models::ChannelSettlementFile,
    startup::AppState,
};

pub async fn download_file(
    State(state): State<AppState>,
    Json(payload): Json<DownloadFileRequest>,
) -> Result<Json<ChannelSettlementFile>, AppError> {
    payload.validate()?;

    tracing::info!(
        channel = %payload.channel,
        settlement_date = %payload.settlement_date,
        "Downloading settlement file"
    );

    let file = state
        .service
        .download_settlement_file(&payload.channel, payload.settlement_date)
        .await?;
    Ok(Json(file))
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<Paginated<ChannelSettlementFile>>, AppError> {
    let filters = query.filters()?;
    let page = query.pagination();

    let (files, total) = state.service.list_files(&filters, page).await?;
    Ok(Json(Paginated::new(files, total, page)))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(file_no): Path<String>,
) -> Result<Json<ChannelSettlementFile>, AppError> {
    let file = state.service.get_file(&file_no).await?;
    Ok(Json(file))
}
