use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

/// Per-chunk arrival metadata carried alongside the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkMeta {
    /// Position of the chunk within its logical file.
    pub index: u64,
    /// Total chunk count, if the client declared it.
    pub total_chunks: Option<u64>,
}

impl ChunkMeta {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            total_chunks: None,
        }
    }

    pub fn with_total(index: u64, total_chunks: u64) -> Self {
        Self {
            index,
            total_chunks: Some(total_chunks),
        }
    }

    /// Marks this chunk as the last one, which fixes the total at `index + 1`.
    /// Returns `None` when that total does not fit in a `u64`.
    pub fn last(index: u64) -> Option<Self> {
        index
            .checked_add(1)
            .map(|total| Self::with_total(index, total))
    }
}

/// One staged chunk on disk.
#[derive(Debug, Clone)]
pub struct ChunkRef {
    pub index: u64,
    pub path: PathBuf,
    pub size: u64,
}

/// Persisted alongside the chunks of a staging area.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub file_name: String,
    #[serde(default)]
    pub total_chunks: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the artifact is in place; only cleanup remains.
    #[serde(default)]
    pub assembled: bool,
}

impl Manifest {
    pub fn new(file_name: &str) -> Self {
        let now = Utc::now();
        Self {
            file_name: file_name.to_string(),
            total_chunks: None,
            created_at: now,
            updated_at: now,
            assembled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadStatus {
    pub file_name: String,
    pub received_chunks: Vec<u64>,
    pub missing_chunks: Vec<u64>,
    pub total_chunks: Option<u64>,
    pub received_bytes: u64,
    pub complete: bool,
    pub assembled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyOutcome {
    /// The artifact was produced by this call.
    Assembled,
    /// Nothing left to do; an earlier call already produced the artifact.
    AlreadyAssembled,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssemblyReport {
    pub file_name: String,
    pub outcome: AssemblyOutcome,
    pub chunks: u64,
    pub bytes: u64,
    #[schema(value_type = String)]
    pub output_path: PathBuf,
}
