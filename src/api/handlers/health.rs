use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub staging: String,
    pub output: String,
    pub pending_uploads: usize,
    pub version: String,
}

/// Reports a missing or non-directory root without creating it.
async fn directory_status(dir: &Path) -> &'static str {
    match tokio::fs::metadata(dir).await {
        Ok(metadata) if metadata.is_dir() => "ready",
        _ => "unavailable",
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let staging_status = directory_status(state.store.staging_root()).await;
    let output_status = directory_status(state.assembler.output_root()).await;
    let pending_uploads = state
        .store
        .list_pending()
        .await
        .map(|pending| pending.len())
        .unwrap_or(0);

    let status = if staging_status == "ready" && output_status == "ready" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        staging: staging_status.to_string(),
        output: output_status.to_string(),
        pending_uploads,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
