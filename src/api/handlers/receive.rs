use crate::AppState;
use crate::api::error::AppError;
use crate::models::ChunkMeta;
use crate::services::error::UploadError;
use axum::{
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode, header::CONTENT_LENGTH},
};
use bytes::Bytes;

pub const FILE_NAME_HEADER: &str = "FileName";
pub const CHUNK_INDEX_HEADER: &str = "Chunk-Index";
pub const CHUNK_TOTAL_HEADER: &str = "Chunk-Total";
pub const CHUNK_FINAL_HEADER: &str = "Chunk-Final";

pub const RECEIVED_MESSAGE: &str = "Chunk received successfully";

#[utoipa::path(
    post,
    path = "/receive",
    request_body(content = Vec<u8>, description = "Raw chunk payload", content_type = "application/octet-stream"),
    params(
        ("FileName" = String, Header, description = "Logical file the chunk belongs to"),
        ("Chunk-Index" = u64, Header, description = "Zero-based position of the chunk"),
        ("Chunk-Total" = Option<u64>, Header, description = "Total number of chunks in the file"),
        ("Chunk-Final" = Option<bool>, Header, description = "Marks the last chunk of the file")
    ),
    responses(
        (status = 200, description = "Chunk staged", body = String, content_type = "text/plain"),
        (status = 500, description = "Chunk rejected or storage failure")
    ),
    tag = "chunks"
)]
pub async fn receive_chunk(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, &'static str), AppError> {
    let file_name = required_header(&headers, FILE_NAME_HEADER)?;
    let meta = chunk_meta(&headers)?;

    let payload = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let limit = state.config.max_chunk_size as u64;
            let size = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(limit + 1);
            AppError::Upload(UploadError::PayloadTooLarge { size, limit })
        } else {
            AppError::Internal(format!("Failed to read chunk body: {}", rejection.body_text()))
        }
    })?;

    let status = state
        .store
        .receive_chunk(file_name, meta, &payload)
        .await?;

    tracing::info!(
        "📦 Chunk {} of '{}' received ({} bytes, {}/{} staged)",
        meta.index,
        status.file_name,
        payload.len(),
        status.received_chunks.len(),
        status
            .total_chunks
            .map_or_else(|| "?".to_string(), |t| t.to_string())
    );

    if status.complete {
        let assembler = state.assembler.clone();
        let name = status.file_name.clone();
        tokio::spawn(async move {
            match assembler.assemble(&name).await {
                Ok(report) => tracing::info!(
                    "Upload '{}' complete, assembled {} bytes",
                    report.file_name,
                    report.bytes
                ),
                // Someone else (a client call or the sweeper) is already on it.
                Err(UploadError::AssemblyInProgress(_)) => {}
                Err(e) => tracing::error!("❌ Automatic assembly of '{}' failed: {}", name, e),
            }
        });
    }

    Ok((StatusCode::OK, RECEIVED_MESSAGE))
}

pub(crate) fn required_header<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, AppError> {
    let value = headers.get(name).ok_or(AppError::MissingHeader(name))?;
    value.to_str().map_err(|_| AppError::InvalidHeader {
        name,
        message: "value is not valid visible ASCII".to_string(),
    })
}

fn optional_u64(headers: &HeaderMap, name: &'static str) -> Result<Option<u64>, AppError> {
    if headers.get(name).is_none() {
        return Ok(None);
    }
    let raw = required_header(headers, name)?;
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| AppError::InvalidHeader {
            name,
            message: format!("'{}' is not a non-negative integer", raw),
        })
}

fn chunk_meta(headers: &HeaderMap) -> Result<ChunkMeta, AppError> {
    let index = optional_u64(headers, CHUNK_INDEX_HEADER)?
        .ok_or(AppError::MissingHeader(CHUNK_INDEX_HEADER))?;
    let total = optional_u64(headers, CHUNK_TOTAL_HEADER)?;
    let is_final = headers
        .get(CHUNK_FINAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true") || v.trim() == "1")
        .unwrap_or(false);

    if !is_final {
        return Ok(match total {
            Some(total) => ChunkMeta::with_total(index, total),
            None => ChunkMeta::new(index),
        });
    }

    let meta = ChunkMeta::last(index).ok_or_else(|| AppError::InvalidHeader {
        name: CHUNK_INDEX_HEADER,
        message: format!("final chunk index {} leaves no room for a total", index),
    })?;
    match total {
        Some(total) if meta.total_chunks != Some(total) => Err(AppError::InvalidHeader {
            name: CHUNK_FINAL_HEADER,
            message: format!(
                "final chunk {} contradicts declared total of {}",
                index, total
            ),
        }),
        _ => Ok(meta),
    }
}
