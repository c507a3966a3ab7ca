//! Worker integration tests
//!
//! Each test drives the worker with real files in a tempdir sync root
//! and asserts the canonical/queue state in an in-memory store.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use tidesync_core::domain::SyncStatus;
use tidesync_core::paths;
use tidesync_store::SyncStore;
use tidesync_sync::scanner::Scanner;
use tidesync_sync::worker::Worker;

async fn setup(root: &TempDir) -> (SyncStore, Worker) {
    let sync_root = root.path().to_string_lossy().into_owned();
    let store = SyncStore::in_memory(sync_root.clone()).await.unwrap();
    let scanner = Scanner::new(root.path());
    let worker = Worker::new(store.clone(), scanner, sync_root);
    (store, worker)
}

fn write(root: &TempDir, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.path().join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// handle_added
// ============================================================================

#[tokio::test]
async fn test_added_file_creates_row_queue_and_linked_parent() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let file_path = write(&root, "docs/report.txt", b"quarterly numbers");
    worker.handle_added(&file_path).await.unwrap();

    let file = store.file_by_path("/docs", "report.txt").await.unwrap().unwrap();
    assert_eq!(file.versions, 1);
    assert_eq!(file.origin, file.uuid);
    assert_eq!(file.last_synced_hashvalue, file.hashvalue);
    assert_eq!(file.size, 17);

    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, SyncStatus::New);
    assert_eq!(queue[0].old_path.as_deref(), Some("/docs"));
    assert_eq!(queue[0].old_filename.as_deref(), Some("report.txt"));

    // I1: the parent directory row exists and is referenced.
    let fd = paths::folder_device("/docs");
    let parent = store
        .directory_by_triple(&fd.device, &fd.folder, "/docs")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.uuid, file.dir_id);

    let dir_queue = store.directory_queue().await.unwrap();
    assert_eq!(dir_queue.len(), 1);
    assert_eq!(dir_queue[0].status, SyncStatus::FileLinked);
}

#[tokio::test]
async fn test_added_tracked_file_is_a_noop() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let file_path = write(&root, "docs/known.txt", b"seen before");
    worker.handle_added(&file_path).await.unwrap();
    let before = store.file_by_path("/docs", "known.txt").await.unwrap().unwrap();

    // A second add (e.g. after a cloud down-sync) must change nothing.
    worker.handle_added(&file_path).await.unwrap();
    let after = store.file_by_path("/docs", "known.txt").await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(store.file_queue().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_added_directory_creates_row_and_queue_entry() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let dir_path = root.path().join("pictures");
    std::fs::create_dir(&dir_path).unwrap();
    worker.handle_added(&dir_path).await.unwrap();

    let fd = paths::folder_device("/pictures");
    let dir = store
        .directory_by_triple(&fd.device, &fd.folder, "/pictures")
        .await
        .unwrap()
        .unwrap();
    assert!(!dir.uuid.is_empty());

    let queue = store.directory_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, SyncStatus::New);
    assert_eq!(queue[0].old_path.as_deref(), Some("/pictures"));
}

// ============================================================================
// handle_modified
// ============================================================================

#[tokio::test]
async fn test_modified_bumps_version_and_keeps_synced_hash() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let file_path = write(&root, "notes/todo.txt", b"v1");
    worker.handle_added(&file_path).await.unwrap();
    let original = store.file_by_path("/notes", "todo.txt").await.unwrap().unwrap();

    std::fs::write(&file_path, b"v2 with more text").unwrap();
    worker.handle_modified(&file_path).await.unwrap();

    let modified = store.file_by_path("/notes", "todo.txt").await.unwrap().unwrap();
    assert_eq!(modified.origin, original.origin);
    assert_eq!(modified.dir_id, original.dir_id);
    assert_eq!(modified.versions, 2);
    assert_ne!(modified.hashvalue, original.hashvalue);
    // Unacknowledged by the cloud: the synced hash stays put.
    assert_eq!(modified.last_synced_hashvalue, original.last_synced_hashvalue);

    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, SyncStatus::Modified);
}

#[tokio::test]
async fn test_modified_untracked_file_falls_back_to_add() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let file_path = write(&root, "late.txt", b"created before the watch");
    worker.handle_modified(&file_path).await.unwrap();

    assert!(store.file_by_path("/", "late.txt").await.unwrap().is_some());
    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue[0].status, SyncStatus::New);
}

// ============================================================================
// handle_deleted
// ============================================================================

#[tokio::test]
async fn test_deleted_file_tombstones() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let file_path = write(&root, "tmp/scratch.txt", b"bytes");
    worker.handle_added(&file_path).await.unwrap();
    // Clear the add entry so the tombstone is the only queue row.
    let origin = store
        .file_by_path("/tmp", "scratch.txt")
        .await
        .unwrap()
        .unwrap()
        .origin;
    store.remove_file_queue_by_origin(&origin).await.unwrap();

    std::fs::remove_file(&file_path).unwrap();
    worker.handle_deleted(&file_path).await.unwrap();

    assert!(store.file_by_path("/tmp", "scratch.txt").await.unwrap().is_none());
    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, SyncStatus::Delete);
    assert_eq!(queue[0].old_filename.as_deref(), Some("scratch.txt"));
}

#[tokio::test]
async fn test_deleted_directory_cascades() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let dir_path = root.path().join("bundle");
    std::fs::create_dir(&dir_path).unwrap();
    worker.handle_added(&dir_path).await.unwrap();
    let inner = write(&root, "bundle/data.bin", b"payload");
    worker.handle_added(&inner).await.unwrap();

    std::fs::remove_dir_all(&dir_path).unwrap();
    worker.handle_deleted(&dir_path).await.unwrap();

    assert!(store.all_files().await.unwrap().is_empty());
    assert!(store.all_directories().await.unwrap().is_empty());

    // The subtree's pending rows are purged; the tombstone survives.
    let dir_queue = store.directory_queue().await.unwrap();
    assert_eq!(dir_queue.len(), 1);
    assert_eq!(dir_queue[0].status, SyncStatus::Delete);
    assert_eq!(dir_queue[0].dir.path, "/bundle");
    assert!(store.file_queue().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_untracked_path_is_a_noop() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    worker
        .handle_deleted(Path::new("/never/tracked.txt"))
        .await
        .unwrap();
    assert!(store.file_queue().await.unwrap().is_empty());
    assert!(store.directory_queue().await.unwrap().is_empty());
}

// ============================================================================
// handle_renamed
// ============================================================================

#[tokio::test]
async fn test_renamed_file_preserves_origin_and_moves_row() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let old_path = write(&root, "docs/draft.txt", b"same content");
    worker.handle_added(&old_path).await.unwrap();
    let original = store.file_by_path("/docs", "draft.txt").await.unwrap().unwrap();

    let new_path = root.path().join("docs/final.txt");
    std::fs::rename(&old_path, &new_path).unwrap();
    worker.handle_renamed(&new_path, &old_path).await.unwrap();

    // Old row replaced in place: same origin, new name, one row total.
    assert!(store.file_by_path("/docs", "draft.txt").await.unwrap().is_none());
    let renamed = store.file_by_path("/docs", "final.txt").await.unwrap().unwrap();
    assert_eq!(renamed.origin, original.origin);
    assert_eq!(renamed.uuid, original.uuid);
    assert_eq!(renamed.versions, original.versions);
    assert_eq!(store.all_files().await.unwrap().len(), 1);

    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, SyncStatus::Rename);
    assert_eq!(queue[0].old_filename.as_deref(), Some("draft.txt"));
    assert_eq!(queue[0].old_path.as_deref(), Some("/docs"));
}

#[tokio::test]
async fn test_renamed_directory_moves_subtree() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let old_dir = root.path().join("projects");
    std::fs::create_dir(&old_dir).unwrap();
    worker.handle_added(&old_dir).await.unwrap();
    let inner = write(&root, "projects/plan.md", b"steps");
    worker.handle_added(&inner).await.unwrap();

    let new_dir = root.path().join("archive");
    std::fs::rename(&old_dir, &new_dir).unwrap();
    worker.handle_renamed(&new_dir, &old_dir).await.unwrap();

    // Canonical rows rewritten to the new prefix.
    let dirs = store.all_directories().await.unwrap();
    assert_eq!(dirs.len(), 1);
    assert_eq!(dirs[0].path, "/archive");
    assert_eq!(dirs[0].folder, "archive");

    let moved = store.file_by_path("/archive", "plan.md").await.unwrap().unwrap();
    assert!(moved.abs_path.ends_with("/archive/plan.md"));

    // Stale pending rows under the old path were purged; the rename
    // tombstone carries the old location.
    let dir_queue = store.directory_queue().await.unwrap();
    assert_eq!(dir_queue.len(), 1);
    assert_eq!(dir_queue[0].status, SyncStatus::Rename);
    assert_eq!(dir_queue[0].old_path.as_deref(), Some("/projects"));
    assert_eq!(dir_queue[0].dir.path, "/archive");
}

#[tokio::test]
async fn test_renamed_unknown_file_becomes_add() {
    let root = TempDir::new().unwrap();
    let (store, worker) = setup(&root).await;

    let new_path = write(&root, "appeared.txt", b"moved in from outside the root");
    let outside_old = Path::new("/elsewhere/appeared.txt");
    worker.handle_renamed(&new_path, outside_old).await.unwrap();

    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, SyncStatus::New);
}
