use crate::services::error::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Every failure at the HTTP boundary is reported as `500` with a JSON body
/// carrying the message and its taxonomy kind, so clients can tell a missing
/// chunk from a broken disk.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Upload(#[from] UploadError),

    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: &'static str, message: String },

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Upload(e) => e.kind(),
            AppError::MissingHeader(_) | AppError::InvalidHeader { .. } => "invalid_input",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Upload(UploadError::StorageUnavailable { .. }) => {
                tracing::error!("Storage error: {:?}", self);
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
            }
            AppError::Upload(UploadError::IncompleteUpload { .. })
            | AppError::Upload(UploadError::AssemblyInProgress(_)) => {
                tracing::debug!("{}", self);
            }
            _ => {
                tracing::warn!("Rejected request: {}", self);
            }
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
