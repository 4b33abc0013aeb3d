use chunk_receiver::config::ReceiverConfig;
use chunk_receiver::models::{AssemblyOutcome, ChunkMeta};
use chunk_receiver::services::assembler::Assembler;
use chunk_receiver::services::chunk_store::ChunkStore;
use chunk_receiver::services::error::UploadError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn setup(root: &Path) -> (Arc<ChunkStore>, Arc<Assembler>) {
    let config = ReceiverConfig::development(root);
    let store = Arc::new(ChunkStore::new(&config));
    let assembler = Arc::new(Assembler::new(store.clone(), &config.output_root));
    (store, assembler)
}

/// Distinct, length-varying payload per index so misplacement is visible.
fn payload_for(index: u64) -> Vec<u8> {
    format!("<chunk-{}:{}>", index, "x".repeat(index as usize % 7)).into_bytes()
}

fn expected_for(count: u64) -> Vec<u8> {
    (0..count).flat_map(payload_for).collect()
}

async fn receive_in_order(store: &ChunkStore, name: &str, order: &[u64]) {
    for &index in order {
        store
            .receive_chunk(name, ChunkMeta::new(index), &payload_for(index))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_report_dat_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    store
        .receive_chunk("report.dat", ChunkMeta::new(0), b"AAA")
        .await
        .unwrap();
    store
        .receive_chunk("report.dat", ChunkMeta::new(1), b"BBB")
        .await
        .unwrap();
    store
        .receive_chunk("report.dat", ChunkMeta::new(2), b"CCC")
        .await
        .unwrap();

    let report = assembler.assemble("report.dat").await.unwrap();

    assert_eq!(report.outcome, AssemblyOutcome::Assembled);
    assert_eq!(
        std::fs::read(assembler.output_path("report.dat").unwrap()).unwrap(),
        b"AAABBBCCC"
    );
    assert!(!store.staging_dir("report.dat").exists());
}

#[tokio::test]
async fn test_eleven_chunks_assemble_in_numeric_order() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    // Single-byte payloads make the byte offset equal to the chunk index.
    for index in (0..=10u64).rev() {
        store
            .receive_chunk("eleven.bin", ChunkMeta::new(index), &[index as u8])
            .await
            .unwrap();
    }

    assembler.assemble("eleven.bin").await.unwrap();

    let bytes = std::fs::read(assembler.output_path("eleven.bin").unwrap()).unwrap();
    assert_eq!(bytes, (0..=10u8).collect::<Vec<_>>());
    // Lexicographic order would have put chunk 10 right after chunk 1.
    assert_eq!(bytes[2], 2);
    assert_eq!(bytes[10], 10);
}

#[tokio::test]
async fn test_output_is_independent_of_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());
    let count = 23u64;
    let expected = expected_for(count);

    let in_order: Vec<u64> = (0..count).collect();
    let reversed: Vec<u64> = (0..count).rev().collect();
    let interleaved: Vec<u64> = (0..count)
        .filter(|i| i % 2 == 1)
        .chain((0..count).filter(|i| i % 2 == 0))
        .collect();
    let mut orders = vec![in_order, reversed, interleaved];

    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..5 {
        let mut shuffled: Vec<u64> = (0..count).collect();
        shuffled.shuffle(&mut rng);
        orders.push(shuffled);
    }

    for (run, order) in orders.iter().enumerate() {
        let name = format!("perm-{}.bin", run);
        receive_in_order(&store, &name, order).await;
        assembler.assemble(&name).await.unwrap();

        let bytes = std::fs::read(assembler.output_path(&name).unwrap()).unwrap();
        assert_eq!(bytes, expected, "arrival order {:?}", order);
    }
}

#[tokio::test]
async fn test_concurrent_arrival_assembles_correctly() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());
    let count = 40u64;

    let mut tasks = Vec::new();
    for index in 0..count {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .receive_chunk("parallel.bin", ChunkMeta::new(index), &payload_for(index))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assembler.assemble("parallel.bin").await.unwrap();
    let bytes = std::fs::read(assembler.output_path("parallel.bin").unwrap()).unwrap();
    assert_eq!(bytes, expected_for(count));
}

#[tokio::test]
async fn test_resent_chunk_replaces_earlier_payload() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    for index in 0..5u64 {
        store
            .receive_chunk("retry.bin", ChunkMeta::new(index), format!("[{}]", index).as_bytes())
            .await
            .unwrap();
    }
    store
        .receive_chunk("retry.bin", ChunkMeta::new(3), b"[three-again]")
        .await
        .unwrap();

    assembler.assemble("retry.bin").await.unwrap();

    let bytes = std::fs::read(assembler.output_path("retry.bin").unwrap()).unwrap();
    assert_eq!(bytes, b"[0][1][2][three-again][4]");
}

#[tokio::test]
async fn test_missing_chunk_leaves_everything_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    for index in [0u64, 1, 3, 4] {
        store
            .receive_chunk("gap.bin", ChunkMeta::new(index), &payload_for(index))
            .await
            .unwrap();
    }

    let err = assembler.assemble("gap.bin").await.unwrap_err();
    match err {
        UploadError::IncompleteUpload { missing, .. } => assert_eq!(missing, vec![2]),
        other => panic!("expected IncompleteUpload, got {:?}", other),
    }

    assert!(!assembler.output_path("gap.bin").unwrap().exists());
    let leftovers: Vec<_> = std::fs::read_dir(assembler.output_root())
        .map(|entries| entries.collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "no partial files may remain");

    let status = store.status("gap.bin").await.unwrap().unwrap();
    assert_eq!(status.received_chunks, vec![0, 1, 3, 4]);
    assert_eq!(status.missing_chunks, vec![2]);

    // Supplying the gap makes a retry succeed.
    store
        .receive_chunk("gap.bin", ChunkMeta::new(2), &payload_for(2))
        .await
        .unwrap();
    assembler.assemble("gap.bin").await.unwrap();
    let bytes = std::fs::read(assembler.output_path("gap.bin").unwrap()).unwrap();
    assert_eq!(bytes, expected_for(5));
}

#[tokio::test]
async fn test_declared_total_detects_missing_tail() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    store
        .receive_chunk("tail.bin", ChunkMeta::with_total(0, 3), b"a")
        .await
        .unwrap();
    store
        .receive_chunk("tail.bin", ChunkMeta::new(1), b"b")
        .await
        .unwrap();

    // Without the declared total, 0..=1 would look complete.
    let err = assembler.assemble("tail.bin").await.unwrap_err();
    assert!(matches!(err, UploadError::IncompleteUpload { ref missing, .. } if missing == &vec![2]));
    assert!(store.staging_dir("tail.bin").exists());
}

#[tokio::test]
async fn test_reassembly_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    receive_in_order(&store, "twice.bin", &[0, 1, 2]).await;
    assembler.assemble("twice.bin").await.unwrap();
    assert!(!store.staging_dir("twice.bin").exists());

    let again = assembler.assemble("twice.bin").await.unwrap();
    assert_eq!(again.outcome, AssemblyOutcome::AlreadyAssembled);
    assert_eq!(again.bytes, expected_for(3).len() as u64);
    assert_eq!(
        std::fs::read(assembler.output_path("twice.bin").unwrap()).unwrap(),
        expected_for(3)
    );

    // Never staged at all is equally a no-op.
    let unknown = assembler.assemble("unknown.bin").await.unwrap();
    assert_eq!(unknown.outcome, AssemblyOutcome::AlreadyAssembled);
    assert_eq!(unknown.bytes, 0);
}

#[tokio::test]
async fn test_concurrent_assembly_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());
    receive_in_order(&store, "busy.bin", &[0, 1]).await;

    // Hold the per-file lock so the first assembly parks inside its critical section.
    let guard = store.lock_file("busy.bin").await.unwrap();

    let first = {
        let assembler = assembler.clone();
        tokio::spawn(async move { assembler.assemble("busy.bin").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = assembler.assemble("busy.bin").await.unwrap_err();
    assert!(matches!(second, UploadError::AssemblyInProgress(_)));

    drop(guard);
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.outcome, AssemblyOutcome::Assembled);
}

#[tokio::test]
async fn test_chunk_write_waits_for_running_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());
    receive_in_order(&store, "late.bin", &[0, 1]).await;

    let guard = store.lock_file("late.bin").await.unwrap();
    let assembly = {
        let assembler = assembler.clone();
        tokio::spawn(async move { assembler.assemble("late.bin").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let write = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .receive_chunk("late.bin", ChunkMeta::new(2), &payload_for(2))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!write.is_finished());

    drop(guard);
    assembly.await.unwrap().unwrap();
    write.await.unwrap().unwrap();

    // The late chunk never leaked into the finished artifact.
    let bytes = std::fs::read(assembler.output_path("late.bin").unwrap()).unwrap();
    assert_eq!(bytes, expected_for(2));
    let status = store.status("late.bin").await.unwrap().unwrap();
    assert_eq!(status.received_chunks, vec![2]);
}

#[tokio::test]
async fn test_readers_never_observe_partial_artifact() {
    const MIB: usize = 1024 * 1024;
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    let chunk = vec![0xA5u8; MIB];
    for index in 0..50u64 {
        store
            .receive_chunk("big.bin", ChunkMeta::with_total(index, 50), &chunk)
            .await
            .unwrap();
    }

    let final_size = 50 * MIB as u64;
    let output = assembler.output_path("big.bin").unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let poller = {
        let output = output.clone();
        let done = done.clone();
        tokio::task::spawn_blocking(move || {
            let mut observed = Vec::new();
            while !done.load(Ordering::Acquire) {
                if let Ok(metadata) = std::fs::metadata(&output) {
                    observed.push(metadata.len());
                }
            }
            observed
        })
    };

    let report = assembler.assemble("big.bin").await.unwrap();
    done.store(true, Ordering::Release);
    let observed = poller.await.unwrap();

    assert_eq!(report.bytes, final_size);
    assert!(
        observed.iter().all(|&size| size == final_size),
        "observed a partially written artifact"
    );
    assert_eq!(std::fs::metadata(&output).unwrap().len(), final_size);
}

#[tokio::test]
async fn test_uploads_for_different_files_do_not_mix() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    store
        .receive_chunk("one.txt", ChunkMeta::new(0), b"one-")
        .await
        .unwrap();
    store
        .receive_chunk("two.txt", ChunkMeta::new(0), b"two-")
        .await
        .unwrap();
    store
        .receive_chunk("one.txt", ChunkMeta::new(1), b"done")
        .await
        .unwrap();
    store
        .receive_chunk("two.txt", ChunkMeta::new(1), b"done")
        .await
        .unwrap();

    assembler.assemble("one.txt").await.unwrap();
    assembler.assemble("two.txt").await.unwrap();

    assert_eq!(
        std::fs::read(assembler.output_path("one.txt").unwrap()).unwrap(),
        b"one-done"
    );
    assert_eq!(
        std::fs::read(assembler.output_path("two.txt").unwrap()).unwrap(),
        b"two-done"
    );
}

#[tokio::test]
async fn test_reported_name_addresses_the_staged_upload() {
    let dir = tempfile::tempdir().unwrap();
    let (store, assembler) = setup(dir.path());

    let raw = format!("  {} b ", "a".repeat(250));
    let status = store
        .receive_chunk(&raw, ChunkMeta::last(0).unwrap(), b"only")
        .await
        .unwrap();
    assert!(status.complete);

    // The name handed back is the one automatic assembly and the sweeper reuse.
    let report = assembler.assemble(&status.file_name).await.unwrap();
    assert_eq!(report.outcome, AssemblyOutcome::Assembled);
    assert_eq!(std::fs::read(&report.output_path).unwrap(), b"only");
    assert!(store.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reserved_characters_do_not_alias_other_names() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _assembler) = setup(dir.path());

    store
        .receive_chunk("a_b", ChunkMeta::new(0), b"underscore")
        .await
        .unwrap();
    let err = store
        .receive_chunk("a:b", ChunkMeta::new(1), b"colon")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidFileName(_)));

    let status = store.status("a_b").await.unwrap().unwrap();
    assert_eq!(status.received_chunks, vec![0]);
}
