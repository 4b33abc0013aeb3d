use crate::services::assembler::Assembler;
use crate::services::chunk_store::ChunkStore;
use crate::services::error::UploadError;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub assembled: usize,
    pub reclaimed: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Periodic pass over the staging root.
///
/// Only uploads that carry an explicit completeness signal are assembled;
/// uploads without one wait for an explicit `/assemble` call or expire.
pub struct BackgroundWorker {
    store: Arc<ChunkStore>,
    assembler: Arc<Assembler>,
    interval: Duration,
    max_idle: chrono::Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        store: Arc<ChunkStore>,
        assembler: Arc<Assembler>,
        interval: Duration,
        max_idle: chrono::Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            assembler,
            interval,
            max_idle,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Staging sweeper started (every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
    }

    pub async fn sweep(&self) -> SweepSummary {
        tracing::debug!("🧹 Sweeping staging root {}", self.store.staging_root().display());
        let mut summary = SweepSummary::default();

        let pending = match self.store.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Failed to list staging areas: {}", e);
                summary.failed += 1;
                return summary;
            }
        };

        let cutoff = Utc::now() - self.max_idle;

        for status in pending {
            let name = status.file_name.as_str();

            if status.assembled || status.complete {
                match self.assembler.assemble(name).await {
                    Ok(_) if status.assembled => summary.reclaimed += 1,
                    Ok(_) => summary.assembled += 1,
                    // A request-triggered assembly got there first.
                    Err(UploadError::AssemblyInProgress(_)) => {}
                    Err(e) => {
                        tracing::error!("Sweep failed to assemble '{}': {}", name, e);
                        summary.failed += 1;
                    }
                }
                continue;
            }

            if status.updated_at < cutoff {
                match self.store.abandon_if_stale(name, cutoff).await {
                    Ok(true) => summary.expired += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Failed to expire staging area '{}': {}", name, e);
                        summary.failed += 1;
                    }
                }
            }
        }

        self.store.locks().cleanup();
        self.assembler.cleanup();

        if summary != SweepSummary::default() {
            tracing::info!(
                "✅ Sweep finished: {} assembled, {} reclaimed, {} expired, {} failed",
                summary.assembled,
                summary.reclaimed,
                summary.expired,
                summary.failed
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReceiverConfig;
    use crate::models::ChunkMeta;

    fn setup(
        root: &std::path::Path,
        max_idle: chrono::Duration,
    ) -> (Arc<ChunkStore>, Arc<Assembler>, BackgroundWorker) {
        let config = ReceiverConfig::development(root);
        let store = Arc::new(ChunkStore::new(&config));
        let assembler = Arc::new(Assembler::new(store.clone(), &config.output_root));
        let (_tx, rx) = watch::channel(false);
        let worker = BackgroundWorker::new(
            store.clone(),
            assembler.clone(),
            Duration::from_secs(60),
            max_idle,
            rx,
        );
        (store, assembler, worker)
    }

    #[tokio::test]
    async fn test_sweep_assembles_only_signalled_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let (store, assembler, worker) = setup(dir.path(), chrono::Duration::hours(1));

        store
            .receive_chunk("done.bin", ChunkMeta::with_total(0, 2), b"ab")
            .await
            .unwrap();
        store
            .receive_chunk("done.bin", ChunkMeta::new(1), b"cd")
            .await
            .unwrap();
        // Contiguous, but nothing says it is finished.
        store
            .receive_chunk("open.bin", ChunkMeta::new(0), b"ef")
            .await
            .unwrap();

        let summary = worker.sweep().await;
        assert_eq!(summary.assembled, 1);
        assert_eq!(summary.expired, 0);

        let done = assembler.output_path("done.bin").unwrap();
        assert_eq!(std::fs::read(done).unwrap(), b"abcd");
        assert!(!assembler.output_path("open.bin").unwrap().exists());
        assert!(store.staging_dir("open.bin").exists());
    }

    #[tokio::test]
    async fn test_sweep_expires_idle_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _assembler, worker) = setup(dir.path(), chrono::Duration::seconds(-1));

        store
            .receive_chunk("stale.bin", ChunkMeta::new(3), b"zz")
            .await
            .unwrap();

        let summary = worker.sweep().await;
        assert_eq!(summary.expired, 1);
        assert!(!store.staging_dir("stale.bin").exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceiverConfig::development(dir.path());
        let store = Arc::new(ChunkStore::new(&config));
        let assembler = Arc::new(Assembler::new(store.clone(), &config.output_root));
        let (tx, rx) = watch::channel(false);
        let worker = BackgroundWorker::new(
            store,
            assembler,
            Duration::from_secs(3600),
            chrono::Duration::hours(1),
            rx,
        );

        let handle = tokio::spawn(worker.run());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
