use crate::models::{AssemblyOutcome, AssemblyReport, ChunkRef, Manifest};
use crate::services::chunk_store::{
    ChunkStore, MISSING_REPORT_LIMIT, dir_exists, list_chunks, missing_indices,
    read_manifest, remove_dir, write_manifest,
};
use crate::services::error::{StorageContext, UploadError, UploadResult};
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::validation::sanitize_file_name;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

/// Merges the staged chunks of a logical file into its final artifact.
pub struct Assembler {
    store: Arc<ChunkStore>,
    output_root: PathBuf,
    in_flight: KeyedMutex,
}

impl Assembler {
    pub fn new(store: Arc<ChunkStore>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_root: output_root.into(),
            in_flight: KeyedMutex::new(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn output_path(&self, file_name: &str) -> UploadResult<PathBuf> {
        Ok(self.output_root.join(sanitize_file_name(file_name)?))
    }

    /// Drops bookkeeping for files with no assembly running.
    pub fn cleanup(&self) {
        self.in_flight.cleanup();
    }

    /// Assembles `file_name` if every chunk is staged.
    ///
    /// On failure nothing changes: no artifact appears at the output path and
    /// the staging area is left as it was, so the caller can retry once the
    /// missing chunks arrive. Calling this again after success is a no-op.
    pub async fn assemble(&self, file_name: &str) -> UploadResult<AssemblyReport> {
        let name = sanitize_file_name(file_name)?;

        let Some(_claim) = self.in_flight.try_lock(&name) else {
            return Err(UploadError::AssemblyInProgress(name));
        };
        let _guard = self.store.locks().lock(&name).await;

        let staging = self.store.staging_dir(&name);
        let output_path = self.output_root.join(&name);

        if !dir_exists(&staging).await? {
            return self.already_assembled(name, output_path).await;
        }

        let mut manifest = read_manifest(&staging)
            .await?
            .unwrap_or_else(|| Manifest::new(&name));

        if manifest.assembled {
            self.reclaim_staging(&name, &staging).await;
            return self.already_assembled(name, output_path).await;
        }

        let chunks = list_chunks(&staging).await?;
        ensure_complete(&name, &manifest, &chunks)?;

        tracing::info!(
            "Assembling '{}' from {} chunks into {}",
            name,
            chunks.len(),
            output_path.display()
        );
        let bytes = self.merge(&name, &chunks, &output_path).await?;

        // The artifact is in place; from here on failures are only cleanup.
        manifest.assembled = true;
        if let Err(e) = write_manifest(&staging, &manifest).await {
            tracing::warn!("Failed to mark '{}' as assembled: {}", name, e);
        }
        self.reclaim_staging(&name, &staging).await;

        tracing::info!("✅ Assembled '{}' ({} bytes)", name, bytes);

        Ok(AssemblyReport {
            file_name: name,
            outcome: AssemblyOutcome::Assembled,
            chunks: chunks.len() as u64,
            bytes,
            output_path,
        })
    }

    /// Streams every chunk, in order, into a hidden partial file and renames
    /// it over `output_path`. Only one chunk's worth of data is buffered.
    async fn merge(&self, name: &str, chunks: &[ChunkRef], output_path: &Path) -> UploadResult<u64> {
        fs::create_dir_all(&self.output_root).await.storage_context(|| {
            format!(
                "failed to create output directory {}",
                self.output_root.display()
            )
        })?;

        let partial = self
            .output_root
            .join(format!(".partial-{}", Uuid::new_v4().simple()));

        let merged = async {
            let file = fs::File::create(&partial)
                .await
                .storage_context(|| format!("failed to create {}", partial.display()))?;
            let mut writer = BufWriter::with_capacity(self.store.max_chunk_size().max(8192), file);

            let mut total = 0u64;
            for chunk in chunks {
                let mut reader = fs::File::open(&chunk.path)
                    .await
                    .storage_context(|| format!("failed to open chunk {}", chunk.path.display()))?;
                let copied = tokio::io::copy(&mut reader, &mut writer)
                    .await
                    .storage_context(|| {
                        format!("failed to copy chunk {} of '{}'", chunk.index, name)
                    })?;
                if copied != chunk.size {
                    return Err(UploadError::storage(
                        format!("chunk {} of '{}' changed while merging", chunk.index, name),
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("expected {} bytes, copied {}", chunk.size, copied),
                        ),
                    ));
                }
                total += copied;
            }

            writer
                .flush()
                .await
                .storage_context(|| format!("failed to flush {}", partial.display()))?;
            writer
                .get_ref()
                .sync_all()
                .await
                .storage_context(|| format!("failed to sync {}", partial.display()))?;
            drop(writer);

            fs::rename(&partial, output_path).await.storage_context(|| {
                format!(
                    "failed to move {} into place at {}",
                    partial.display(),
                    output_path.display()
                )
            })?;
            Ok::<u64, UploadError>(total)
        }
        .await;

        if merged.is_err() {
            if let Err(e) = fs::remove_file(&partial).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial file {}: {}", partial.display(), e);
                }
            }
        }
        merged
    }

    /// Best effort: a leftover directory is retried by the staging sweeper.
    async fn reclaim_staging(&self, name: &str, staging: &Path) {
        if let Err(e) = remove_dir(staging).await {
            tracing::warn!(
                "Assembled '{}' but could not remove its staging area: {}",
                name,
                e
            );
        }
    }

    async fn already_assembled(
        &self,
        name: String,
        output_path: PathBuf,
    ) -> UploadResult<AssemblyReport> {
        let bytes = match fs::metadata(&output_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(UploadError::storage(
                    format!("failed to stat {}", output_path.display()),
                    e,
                ));
            }
        };
        tracing::debug!("Nothing staged for '{}', assembly is a no-op", name);
        Ok(AssemblyReport {
            file_name: name,
            outcome: AssemblyOutcome::AlreadyAssembled,
            chunks: 0,
            bytes,
            output_path,
        })
    }
}

/// Without a declared total the staged indices must form `0..=max`; with one
/// they must be exactly `0..total`.
fn ensure_complete(name: &str, manifest: &Manifest, chunks: &[ChunkRef]) -> UploadResult<()> {
    let received: Vec<u64> = chunks.iter().map(|c| c.index).collect();

    if let Some(total) = manifest.total_chunks {
        if let Some(beyond) = received.iter().find(|&&i| i >= total) {
            return Err(UploadError::InvalidSequence(format!(
                "chunk {} of '{}' is outside declared total of {}",
                beyond, name, total
            )));
        }
    }

    let upto = match (manifest.total_chunks, received.last()) {
        (Some(total), _) => total,
        (None, Some(last)) => last + 1,
        (None, None) => 1,
    };
    let missing = missing_indices(&received, upto, MISSING_REPORT_LIMIT);
    if !missing.is_empty() {
        return Err(UploadError::IncompleteUpload {
            file_name: name.to_string(),
            missing,
        });
    }
    Ok(())
}
