use crate::AppState;
use crate::api::error::AppError;
use crate::models::UploadStatus;
use axum::{
    Json,
    extract::{Path, State},
};

#[utoipa::path(
    get,
    path = "/uploads",
    responses(
        (status = 200, description = "Staging areas awaiting assembly", body = Vec<UploadStatus>)
    ),
    tag = "chunks"
)]
pub async fn list_uploads(
    State(state): State<AppState>,
) -> Result<Json<Vec<UploadStatus>>, AppError> {
    Ok(Json(state.store.list_pending().await?))
}

#[utoipa::path(
    get,
    path = "/uploads/{file_name}",
    params(
        ("file_name" = String, Path, description = "Logical file name")
    ),
    responses(
        (status = 200, description = "Staging state, or null when nothing is staged", body = Option<UploadStatus>)
    ),
    tag = "chunks"
)]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Json<Option<UploadStatus>>, AppError> {
    Ok(Json(state.store.status(&file_name).await?))
}
