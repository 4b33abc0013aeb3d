use std::io;
use thiserror::Error;

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Invalid chunk sequence: {0}")]
    InvalidSequence(String),

    #[error("Incomplete upload for '{file_name}': missing chunks {missing:?}")]
    IncompleteUpload { file_name: String, missing: Vec<u64> },

    #[error("Assembly already in progress for '{0}'")]
    AssemblyInProgress(String),

    #[error("Storage unavailable: {context}: {source}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl UploadError {
    /// Taxonomy label reported to callers alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidFileName(_)
            | UploadError::PayloadTooLarge { .. }
            | UploadError::InvalidSequence(_) => "invalid_input",
            UploadError::IncompleteUpload { .. } => "incomplete_upload",
            UploadError::AssemblyInProgress(_) => "concurrency_conflict",
            UploadError::StorageUnavailable { .. } => "storage_failure",
        }
    }

    pub(crate) fn storage(context: impl Into<String>, source: io::Error) -> Self {
        UploadError::StorageUnavailable {
            context: context.into(),
            source,
        }
    }
}

/// Attaches a human readable context to filesystem errors.
pub(crate) trait StorageContext<T> {
    fn storage_context<F, C>(self, f: F) -> UploadResult<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> StorageContext<T> for Result<T, io::Error> {
    fn storage_context<F, C>(self, f: F) -> UploadResult<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| UploadError::storage(f(), e))
    }
}
