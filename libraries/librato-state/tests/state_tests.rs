//! Integration tests for the processed-file ledger

use chrono::{Duration as ChronoDuration, Utc};
use librato_state::{ProcessedRecord, StateStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

fn temp_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "tmp"))
        .collect()
}

#[tokio::test]
async fn test_load_missing_file_starts_fresh() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");

    let store = StateStore::load(&path).await;

    assert_eq!(store.path(), path);
    assert_eq!(store.record_count().await, 0);
    assert_eq!(store.stats().await.total_processed, 0);
}

#[tokio::test]
async fn test_load_corrupt_file_starts_fresh() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    std::fs::write(&path, b"{ this is not json").unwrap();

    let store = StateStore::load(&path).await;

    assert_eq!(store.record_count().await, 0);

    // The fresh ledger can still be saved over the corrupt file
    store
        .mark_processed(ProcessedRecord::success("/in/a.flac", "h1", None))
        .await;
    store.save().await.unwrap();

    let reloaded = StateStore::load(&path).await;
    assert_eq!(reloaded.record_count().await, 1);
}

#[tokio::test]
async fn test_save_and_load_round_trip() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state/state.json");

    let store = StateStore::new(&path);
    store
        .mark_processed(ProcessedRecord::success(
            "/in/a.flac",
            "hash-a",
            Some(PathBuf::from("/lib/Artist/Album/01 - A.flac")),
        ))
        .await;
    store
        .mark_processed(ProcessedRecord::failure("/in/b.mp3", "hash-b"))
        .await;
    store.save().await.unwrap();

    let reloaded = StateStore::load(&path).await;

    assert_eq!(reloaded.record_count().await, 2);
    assert_eq!(
        reloaded.get(Path::new("/in/a.flac")).await,
        store.get(Path::new("/in/a.flac")).await
    );
    assert_eq!(
        reloaded.get(Path::new("/in/b.mp3")).await,
        store.get(Path::new("/in/b.mp3")).await
    );

    let before = store.stats().await;
    let after = reloaded.stats().await;
    assert_eq!(after.total_processed, 2);
    assert_eq!(after.total_success, 1);
    assert_eq!(after.total_failed, 1);
    assert_eq!(after.started_at, before.started_at);
}

#[tokio::test]
async fn test_interrupted_save_keeps_previous_snapshot() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");

    let store = StateStore::new(&path);
    store
        .mark_processed(ProcessedRecord::success("/in/a.flac", "h1", None))
        .await;
    store.save().await.unwrap();

    // A crash mid-save leaves a partial temp file beside the real one
    std::fs::write(temp.path().join(".state.json.abc123.tmp"), b"{\"records\": [").unwrap();

    let reloaded = StateStore::load(&path).await;
    assert_eq!(reloaded.record_count().await, 1);
    assert!(reloaded.is_processed(Path::new("/in/a.flac"), "h1").await);
}

#[tokio::test]
async fn test_failed_save_leaves_no_temp_files() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");

    // A directory at the target path makes the final rename fail
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep"), b"x").unwrap();

    let store = StateStore::new(&path);
    store
        .mark_processed(ProcessedRecord::success("/in/a.flac", "h1", None))
        .await;

    assert!(store.save().await.is_err());
    assert!(temp_files(temp.path()).is_empty());
    assert!(path.is_dir());
}

#[tokio::test]
async fn test_is_processed_requires_matching_hash() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path().join("state.json"));
    let file = Path::new("/in/a.flac");

    assert!(!store.is_processed(file, "h1").await);
    assert!(!store.is_known(file).await);

    store
        .mark_processed(ProcessedRecord::success(file, "h1", None))
        .await;
    assert!(store.is_processed(file, "h1").await);
    assert!(!store.is_processed(file, "h2").await);
    assert!(store.is_known(file).await);

    // Reprocessing with new content overwrites the record
    store
        .mark_processed(ProcessedRecord::success(file, "h2", None))
        .await;
    assert!(!store.is_processed(file, "h1").await);
    assert!(store.is_processed(file, "h2").await);
    assert_eq!(store.record_count().await, 1);
}

#[tokio::test]
async fn test_failed_record_still_counts_as_processed() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path().join("state.json"));
    let file = Path::new("/in/broken.mp3");

    store
        .mark_processed(ProcessedRecord::failure(file, "h1"))
        .await;

    assert!(store.is_processed(file, "h1").await);
    let record = store.get(file).await.unwrap();
    assert!(!record.success);
}

#[tokio::test]
async fn test_counters_track_every_mark() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path().join("state.json"));

    store
        .mark_processed(ProcessedRecord::success("/in/a.flac", "h1", None))
        .await;
    store
        .mark_processed(ProcessedRecord::success("/in/a.flac", "h2", None))
        .await;
    store
        .mark_processed(ProcessedRecord::failure("/in/b.flac", "h3"))
        .await;

    let stats = store.stats().await;
    assert_eq!(stats.total_processed, 3);
    assert_eq!(stats.total_success, 2);
    assert_eq!(stats.total_failed, 1);
    assert_eq!(store.record_count().await, 2);
}

#[tokio::test]
async fn test_cleanup_removes_only_old_records() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path().join("state.json"));

    let old = Utc::now() - ChronoDuration::days(40);
    store
        .mark_processed(ProcessedRecord::success("/in/old.flac", "h1", None).with_processed_at(old))
        .await;
    store
        .mark_processed(ProcessedRecord::success("/in/new.flac", "h2", None))
        .await;

    let removed = store.cleanup(Duration::from_secs(30 * 24 * 60 * 60)).await;

    assert_eq!(removed, 1);
    assert!(!store.is_known(Path::new("/in/old.flac")).await);
    assert!(store.is_known(Path::new("/in/new.flac")).await);
    // Counters are lifetime totals and survive cleanup
    assert_eq!(store.stats().await.total_processed, 2);
}

#[tokio::test]
async fn test_cleanup_on_empty_ledger() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path().join("state.json"));

    assert_eq!(store.cleanup(Duration::from_secs(1)).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_marks_are_all_recorded() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let store = Arc::new(StateStore::new(temp.path().join("state.json")));

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let path = format!("/in/track-{i:02}.flac");
                let record = if i % 5 == 0 {
                    ProcessedRecord::failure(&path, format!("hash-{i}"))
                } else {
                    ProcessedRecord::success(&path, format!("hash-{i}"), None)
                };
                store.mark_processed(record).await;
            })
        })
        .collect();

    for result in futures_util::future::join_all(tasks).await {
        result.unwrap();
    }

    let stats = store.stats().await;
    assert_eq!(store.record_count().await, 50);
    assert_eq!(stats.total_processed, 50);
    assert_eq!(stats.total_failed, 10);
    assert_eq!(stats.total_success, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_produce_valid_snapshot() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    let store = Arc::new(StateStore::new(&path));

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .mark_processed(ProcessedRecord::success(
                        format!("/in/{i}.flac"),
                        "h",
                        None,
                    ))
                    .await;
                store.save().await
            })
        })
        .collect();

    for result in futures_util::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    // The last save ran after every mark, so the snapshot is complete
    store.save().await.unwrap();
    let reloaded = StateStore::load(&path).await;
    assert_eq!(reloaded.record_count().await, 20);
    assert!(temp_files(temp.path()).is_empty());
}
