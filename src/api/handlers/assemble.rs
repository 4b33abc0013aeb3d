use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::receive::{FILE_NAME_HEADER, required_header};
use crate::models::AssemblyReport;
use axum::{Json, extract::State, http::HeaderMap};

#[utoipa::path(
    post,
    path = "/assemble",
    params(
        ("FileName" = String, Header, description = "Logical file to assemble")
    ),
    responses(
        (status = 200, description = "File assembled, or nothing left to assemble", body = AssemblyReport),
        (status = 500, description = "Incomplete upload, concurrent assembly or storage failure")
    ),
    tag = "chunks"
)]
pub async fn assemble_file(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AssemblyReport>, AppError> {
    let file_name = required_header(&headers, FILE_NAME_HEADER)?;
    let report = state.assembler.assemble(file_name).await?;
    Ok(Json(report))
}
