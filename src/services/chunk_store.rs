use crate::config::ReceiverConfig;
use crate::models::{ChunkMeta, ChunkRef, Manifest, UploadStatus};
use crate::services::error::{StorageContext, UploadError, UploadResult};
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::validation::{sanitize_file_name, validate_chunk_size, validate_file_size};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

const CHUNK_SUFFIX: &str = ".chunk";
const MANIFEST_FILE: &str = "manifest.json";

/// Upper bound on how many missing indices a status or error reports.
pub const MISSING_REPORT_LIMIT: usize = 1000;

/// Durable staging of individual chunks, one directory per logical file and
/// one file per chunk.
pub struct ChunkStore {
    staging_root: PathBuf,
    max_chunk_size: usize,
    max_file_size: u64,
    locks: KeyedMutex,
}

impl ChunkStore {
    pub fn new(config: &ReceiverConfig) -> Self {
        Self {
            staging_root: config.staging_root.clone(),
            max_chunk_size: config.max_chunk_size,
            max_file_size: config.max_file_size,
            locks: KeyedMutex::new(),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Per-file locks shared with the assembler.
    pub fn locks(&self) -> &KeyedMutex {
        &self.locks
    }

    /// Staging directory of an already sanitized name.
    pub fn staging_dir(&self, name: &str) -> PathBuf {
        self.staging_root.join(name)
    }

    /// Takes the per-file lock, excluding chunk writes and assembly for `file_name`.
    pub async fn lock_file(&self, file_name: &str) -> UploadResult<OwnedMutexGuard<()>> {
        let name = sanitize_file_name(file_name)?;
        Ok(self.locks.lock(&name).await)
    }

    /// Persists one chunk. Re-sending an index replaces the earlier payload.
    pub async fn receive_chunk(
        &self,
        file_name: &str,
        meta: ChunkMeta,
        payload: &[u8],
    ) -> UploadResult<UploadStatus> {
        let name = sanitize_file_name(file_name)?;
        validate_chunk_size(payload.len(), self.max_chunk_size)?;

        if let Some(total) = meta.total_chunks {
            if total == 0 {
                return Err(UploadError::InvalidSequence(
                    "total chunk count must be at least 1".to_string(),
                ));
            }
            if meta.index >= total {
                return Err(UploadError::InvalidSequence(format!(
                    "chunk index {} is outside declared total of {}",
                    meta.index, total
                )));
            }
        }

        let _guard = self.locks.lock(&name).await;
        let dir = self.staging_dir(&name);

        let mut manifest = match read_manifest(&dir).await? {
            Some(existing) if existing.assembled => {
                // Leftover of a finished upload whose cleanup failed; start over.
                tracing::info!("Discarding assembled staging area for '{}'", name);
                remove_dir(&dir).await?;
                Manifest::new(&name)
            }
            Some(existing) => existing,
            None => Manifest::new(&name),
        };

        let chunks = list_chunks(&dir).await?;

        match (manifest.total_chunks, meta.total_chunks) {
            (Some(known), Some(declared)) if known != declared => {
                return Err(UploadError::InvalidSequence(format!(
                    "declared total of {} conflicts with earlier total of {}",
                    declared, known
                )));
            }
            (Some(known), None) if meta.index >= known => {
                return Err(UploadError::InvalidSequence(format!(
                    "chunk index {} is outside declared total of {}",
                    meta.index, known
                )));
            }
            (None, Some(declared)) => {
                if let Some(beyond) = chunks.iter().find(|c| c.index >= declared) {
                    return Err(UploadError::InvalidSequence(format!(
                        "chunk {} is already staged beyond declared total of {}",
                        beyond.index, declared
                    )));
                }
                manifest.total_chunks = Some(declared);
            }
            _ => {}
        }

        let staged: u64 = chunks
            .iter()
            .filter(|c| c.index != meta.index)
            .map(|c| c.size)
            .sum();
        validate_file_size(staged + payload.len() as u64, self.max_file_size)?;

        fs::create_dir_all(&dir)
            .await
            .storage_context(|| format!("failed to create staging directory {}", dir.display()))?;

        write_atomic(&dir, &chunk_file_name(meta.index), payload).await?;

        manifest.updated_at = Utc::now();
        write_manifest(&dir, &manifest).await?;

        tracing::debug!(
            "Staged chunk {} of '{}' ({} bytes)",
            meta.index,
            name,
            payload.len()
        );

        let chunks = list_chunks(&dir).await?;
        Ok(build_status(&name, &manifest, &chunks))
    }

    /// Current state of a staging area, or `None` when nothing is staged.
    pub async fn status(&self, file_name: &str) -> UploadResult<Option<UploadStatus>> {
        let name = sanitize_file_name(file_name)?;
        self.status_of(&name).await
    }

    async fn status_of(&self, name: &str) -> UploadResult<Option<UploadStatus>> {
        let dir = self.staging_dir(name);
        if !dir_exists(&dir).await? {
            return Ok(None);
        }
        let manifest = read_manifest(&dir)
            .await?
            .unwrap_or_else(|| Manifest::new(name));
        let chunks = list_chunks(&dir).await?;
        Ok(Some(build_status(name, &manifest, &chunks)))
    }

    /// Every staging area currently on disk, sorted by name.
    pub async fn list_pending(&self) -> UploadResult<Vec<UploadStatus>> {
        let mut entries = match fs::read_dir(&self.staging_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(UploadError::storage(
                    format!(
                        "failed to read staging root {}",
                        self.staging_root.display()
                    ),
                    e,
                ));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .storage_context(|| "failed to enumerate staging root")?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            // Removed between listing and reading; not pending anymore.
            if let Some(status) = self.status_of(&name).await? {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    /// Removes a staging area untouched since `cutoff`. Returns whether it was removed.
    pub async fn abandon_if_stale(
        &self,
        file_name: &str,
        cutoff: DateTime<Utc>,
    ) -> UploadResult<bool> {
        let name = sanitize_file_name(file_name)?;
        let _guard = self.locks.lock(&name).await;
        let dir = self.staging_dir(&name);

        let last_touched = match read_manifest(&dir).await? {
            Some(manifest) => manifest.updated_at,
            None => {
                if !dir_exists(&dir).await? {
                    return Ok(false);
                }
                modified_at(&dir).await?
            }
        };

        if last_touched >= cutoff {
            return Ok(false);
        }

        remove_dir(&dir).await?;
        tracing::info!(
            "Abandoned staging area '{}' (last touched {})",
            name,
            last_touched
        );
        Ok(true)
    }
}

pub(crate) fn chunk_file_name(index: u64) -> String {
    // Zero padding keeps directory listings readable; ordering never relies on it.
    format!("{:020}{}", index, CHUNK_SUFFIX)
}

fn parse_chunk_index(file_name: &str) -> Option<u64> {
    file_name.strip_suffix(CHUNK_SUFFIX)?.parse().ok()
}

/// Staged chunks of a staging directory, sorted by numeric index.
pub(crate) async fn list_chunks(dir: &Path) -> UploadResult<Vec<ChunkRef>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(UploadError::storage(
                format!("failed to read staging directory {}", dir.display()),
                e,
            ));
        }
    };

    let mut chunks = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .storage_context(|| format!("failed to enumerate {}", dir.display()))?
    {
        let Some(index) = entry.file_name().to_str().and_then(parse_chunk_index) else {
            continue;
        };
        let metadata = entry
            .metadata()
            .await
            .storage_context(|| format!("failed to stat {}", entry.path().display()))?;
        if !metadata.is_file() {
            continue;
        }
        chunks.push(ChunkRef {
            index,
            path: entry.path(),
            size: metadata.len(),
        });
    }

    chunks.sort_by_key(|c| c.index);
    Ok(chunks)
}

/// Indices below `upto` absent from the sorted `received` list, at most `limit` of them.
pub(crate) fn missing_indices(received: &[u64], upto: u64, limit: usize) -> Vec<u64> {
    let mut missing = Vec::new();
    let mut present = received.iter().copied().peekable();
    let mut index = 0;
    while index < upto && missing.len() < limit {
        while present.next_if(|&p| p < index).is_some() {}
        if present.peek() == Some(&index) {
            present.next();
        } else {
            missing.push(index);
        }
        index += 1;
    }
    missing
}

pub(crate) fn build_status(name: &str, manifest: &Manifest, chunks: &[ChunkRef]) -> UploadStatus {
    let received: Vec<u64> = chunks.iter().map(|c| c.index).collect();
    let upto = manifest
        .total_chunks
        .unwrap_or_else(|| received.last().map_or(0, |last| last + 1));
    let missing = missing_indices(&received, upto, MISSING_REPORT_LIMIT);
    let complete = match manifest.total_chunks {
        Some(total) => missing.is_empty() && received.len() as u64 == total,
        None => false,
    };

    UploadStatus {
        file_name: name.to_string(),
        received_bytes: chunks.iter().map(|c| c.size).sum(),
        received_chunks: received,
        missing_chunks: missing,
        total_chunks: manifest.total_chunks,
        complete,
        assembled: manifest.assembled,
        created_at: manifest.created_at,
        updated_at: manifest.updated_at,
    }
}

pub(crate) async fn read_manifest(dir: &Path) -> UploadResult<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE);
    let raw = match fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(UploadError::storage(
                format!("failed to read manifest {}", path.display()),
                e,
            ));
        }
    };
    let manifest = serde_json::from_slice(&raw).map_err(|e| {
        UploadError::storage(
            format!("corrupt manifest {}", path.display()),
            std::io::Error::new(ErrorKind::InvalidData, e),
        )
    })?;
    Ok(Some(manifest))
}

pub(crate) async fn write_manifest(dir: &Path, manifest: &Manifest) -> UploadResult<()> {
    let raw = serde_json::to_vec_pretty(manifest).map_err(|e| {
        UploadError::storage(
            "failed to encode manifest",
            std::io::Error::new(ErrorKind::InvalidData, e),
        )
    })?;
    write_atomic(dir, MANIFEST_FILE, &raw).await
}

/// Writes `data` next to its destination and renames it into place, so a
/// reader only ever sees the old or the new content.
async fn write_atomic(dir: &Path, file_name: &str, data: &[u8]) -> UploadResult<()> {
    let dest = dir.join(file_name);
    let tmp = dir.join(format!("{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let written = async {
        let mut file = fs::File::create(&tmp)
            .await
            .storage_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(data)
            .await
            .storage_context(|| format!("failed to write {}", tmp.display()))?;
        file.sync_all()
            .await
            .storage_context(|| format!("failed to flush {}", tmp.display()))?;
        fs::rename(&tmp, &dest).await.storage_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp.display(),
                dest.display()
            )
        })
    }
    .await;

    if written.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    written
}

pub(crate) async fn remove_dir(dir: &Path) -> UploadResult<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UploadError::storage(
            format!("failed to remove staging directory {}", dir.display()),
            e,
        )),
    }
}

pub(crate) async fn dir_exists(dir: &Path) -> UploadResult<bool> {
    fs::try_exists(dir)
        .await
        .storage_context(|| format!("failed to stat {}", dir.display()))
}

async fn modified_at(path: &Path) -> UploadResult<DateTime<Utc>> {
    let metadata = fs::metadata(path)
        .await
        .storage_context(|| format!("failed to stat {}", path.display()))?;
    let modified = metadata
        .modified()
        .storage_context(|| format!("failed to read mtime of {}", path.display()))?;
    Ok(DateTime::<Utc>::from(modified))
}
