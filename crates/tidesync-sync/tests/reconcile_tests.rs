//! Store-backed reconciliation scenarios
//!
//! Exercises the offline reconciler and the directory-rename pipeline
//! against an in-memory store, with a tempdir standing in for the sync
//! root where the scanner needs real files.

use tempfile::TempDir;
use uuid::Uuid;

use tidesync_core::domain::{
    DirQueueEntry, DirectoryMetadata, FileMetadata, FileQueueEntry, ScanResult, ScannedFile,
    SyncStatus,
};
use tidesync_core::paths;
use tidesync_store::SyncStore;
use tidesync_sync::reconcile::Reconciler;
use tidesync_sync::scanner::Scanner;

async fn setup(root: &TempDir) -> (SyncStore, Reconciler) {
    let sync_root = root.path().to_string_lossy().into_owned();
    let store = SyncStore::in_memory(sync_root.clone()).await.unwrap();
    let scanner = Scanner::new(root.path());
    let reconciler = Reconciler::new(store.clone(), scanner, sync_root);
    (store, reconciler)
}

fn scanned_file(root: &TempDir, path: &str, filename: &str, hash: &str, inode: &str) -> ScannedFile {
    ScannedFile {
        path: path.to_string(),
        filename: filename.to_string(),
        abs_path: format!("{}{}/{}", root.path().display(), path, filename),
        inode: inode.to_string(),
        hash: hash.to_string(),
        size: 5,
        mtime: 20,
    }
}

fn seed_file(path: &str, filename: &str, origin: &str, hash: &str) -> FileMetadata {
    FileMetadata {
        uuid: origin.to_string(),
        path: path.to_string(),
        filename: filename.to_string(),
        last_modified: "10".to_string(),
        hashvalue: hash.to_string(),
        size: 5,
        dir_id: "d1".to_string(),
        inode: format!("i-{origin}"),
        abs_path: format!("/s{path}/{filename}"),
        versions: 1,
        origin: origin.to_string(),
        last_synced_hashvalue: hash.to_string(),
        conflict_id: None,
    }
}

fn seed_dir(path: &str, inode: &str) -> DirectoryMetadata {
    let fd = paths::folder_device(path);
    DirectoryMetadata {
        uuid: Uuid::new_v4().to_string(),
        device: fd.device,
        folder: fd.folder,
        path: path.to_string(),
        created_at: "5".to_string(),
        abs_path: format!("/s{path}"),
        inode: inode.to_string(),
    }
}

// ============================================================================
// Offline add / modify / delete
// ============================================================================

#[tokio::test]
async fn test_offline_add_records_file_and_linked_parent() {
    // S2: a file appeared while the client was down.
    let root = TempDir::new().unwrap();
    let (store, reconciler) = setup(&root).await;

    let scan = ScanResult {
        files: vec![scanned_file(&root, "/dev", "b.txt", "H2", "i2")],
        directories: vec![],
    };
    reconciler.reconcile_local_state(&scan).await.unwrap();

    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    let entry = &queue[0];
    assert_eq!(entry.status, SyncStatus::New);
    assert!(!entry.file.origin.is_empty());
    assert_eq!(entry.file.origin, entry.file.uuid);
    assert_eq!(entry.file.versions, 1);
    assert_eq!(entry.file.last_synced_hashvalue, "H2");

    // Parent directory synthesised and linked.
    let dir_queue = store.directory_queue().await.unwrap();
    assert_eq!(dir_queue.len(), 1);
    assert_eq!(dir_queue[0].status, SyncStatus::FileLinked);
    assert_eq!(dir_queue[0].dir.path, "/dev");

    // I1: canonical file's parent triple exists.
    let file = store.file_by_path("/dev", "b.txt").await.unwrap().unwrap();
    let fd = paths::folder_device(&file.path);
    let parent = store
        .directory_by_triple(&fd.device, &fd.folder, &file.path)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.uuid, file.dir_id);
}

#[tokio::test]
async fn test_offline_modify_preserves_origin_and_synced_hash() {
    let root = TempDir::new().unwrap();
    let (store, reconciler) = setup(&root).await;

    let dir = seed_dir("/dev", "i-dir");
    store.upsert_directory(&dir).await.unwrap();
    let mut existing = seed_file("/dev", "a.txt", "o-a", "H_old");
    existing.dir_id = dir.uuid.clone();
    store.upsert_file(&existing).await.unwrap();

    let scan = ScanResult {
        files: vec![scanned_file(&root, "/dev", "a.txt", "H_new", "i-a")],
        directories: vec![seed_scan_dir(&root, "/dev", "dev", "i-dir")],
    };
    reconciler.reconcile_local_state(&scan).await.unwrap();

    let file = store.file_by_path("/dev", "a.txt").await.unwrap().unwrap();
    assert_eq!(file.origin, "o-a");
    assert_eq!(file.hashvalue, "H_new");
    // The prior synced hash is carried, not the new content hash.
    assert_eq!(file.last_synced_hashvalue, "H_old");
    assert_eq!(file.versions, 2);
    assert_eq!(file.dir_id, dir.uuid);

    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, SyncStatus::Modified);
}

#[tokio::test]
async fn test_offline_delete_leaves_tombstones() {
    let root = TempDir::new().unwrap();
    let (store, reconciler) = setup(&root).await;

    let dir = seed_dir("/dev", "i-dir");
    store.upsert_directory(&dir).await.unwrap();
    let mut existing = seed_file("/dev", "bye.txt", "o-bye", "H");
    existing.dir_id = dir.uuid.clone();
    store.upsert_file(&existing).await.unwrap();

    // Empty scan: everything on disk is gone.
    reconciler
        .reconcile_local_state(&ScanResult::default())
        .await
        .unwrap();

    assert!(store.file_by_path("/dev", "bye.txt").await.unwrap().is_none());
    assert!(store.all_directories().await.unwrap().is_empty());

    let file_queue = store.file_queue().await.unwrap();
    assert_eq!(file_queue.len(), 1);
    assert_eq!(file_queue[0].status, SyncStatus::Delete);

    let dir_queue = store.directory_queue().await.unwrap();
    assert_eq!(dir_queue.len(), 1);
    assert_eq!(dir_queue[0].status, SyncStatus::Delete);
    assert_eq!(dir_queue[0].dir.path, "/dev");
}

fn seed_scan_dir(
    root: &TempDir,
    path: &str,
    name: &str,
    inode: &str,
) -> tidesync_core::domain::ScannedDirectory {
    tidesync_core::domain::ScannedDirectory {
        path: path.to_string(),
        name: name.to_string(),
        abs_path: format!("{}{}", root.path().display(), path),
        inode: inode.to_string(),
        mtime: 20,
    }
}

// ============================================================================
// Offline file rename pass
// ============================================================================

#[tokio::test]
async fn test_offline_file_rename_collapses_queue_pair() {
    // S3 / P5: delete + new sharing an inode and a hash become one rename.
    let root = TempDir::new().unwrap();
    let (store, reconciler) = setup(&root).await;

    let mut deleted = FileQueueEntry::with_status(
        seed_file("/dev", "old.txt", "oX", "H3"),
        SyncStatus::Delete,
    );
    deleted.file.inode = "i7".to_string();
    store.upsert_file_queue(&deleted).await.unwrap();

    let mut added =
        FileQueueEntry::with_status(seed_file("/dev", "new.txt", "oY", "H3"), SyncStatus::New);
    added.file.inode = "i7".to_string();
    store.upsert_file_queue(&added).await.unwrap();

    reconciler
        .reconcile_local_state(&ScanResult::default())
        .await
        .unwrap();

    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 1, "the delete entry must be gone");
    assert_eq!(queue[0].status, SyncStatus::Rename);
    assert_eq!(queue[0].file.filename, "new.txt");
    assert_eq!(queue[0].old_filename.as_deref(), Some("old.txt"));
}

#[tokio::test]
async fn test_rename_pass_requires_matching_hash() {
    let root = TempDir::new().unwrap();
    let (store, reconciler) = setup(&root).await;

    let mut deleted = FileQueueEntry::with_status(
        seed_file("/dev", "old.txt", "oX", "H_one"),
        SyncStatus::Delete,
    );
    deleted.file.inode = "i8".to_string();
    store.upsert_file_queue(&deleted).await.unwrap();

    let mut added = FileQueueEntry::with_status(
        seed_file("/dev", "new.txt", "oY", "H_two"),
        SyncStatus::New,
    );
    added.file.inode = "i8".to_string();
    store.upsert_file_queue(&added).await.unwrap();

    reconciler
        .reconcile_local_state(&ScanResult::default())
        .await
        .unwrap();

    // Different content: stays a delete plus an add.
    let queue = store.file_queue().await.unwrap();
    assert_eq!(queue.len(), 2);
    assert!(queue.iter().all(|e| e.status != SyncStatus::Rename));
}

// ============================================================================
// Directory rename pipeline through reconcile()
// ============================================================================

#[tokio::test]
async fn test_reconcile_collapses_directory_rename_cascade() {
    // S4 end to end: the queue holds the delete/new residue of renaming
    // /a/x to /a/y with a child directory inside.
    let root = TempDir::new().unwrap();
    let (store, reconciler) = setup(&root).await;

    for (path, inode, status) in [
        ("/a/x", "i1", SyncStatus::Delete),
        ("/a/x/child", "i2", SyncStatus::Delete),
        ("/a/y", "i1", SyncStatus::New),
        ("/a/y/child", "i2", SyncStatus::New),
    ] {
        let entry = DirQueueEntry::with_status(seed_dir(path, inode), status);
        store.upsert_directory_queue(&entry).await.unwrap();
    }

    let result = reconciler.reconcile(&[], &[], &[], &[]).await.unwrap();
    assert!(result.files_to_download.is_empty());

    let queue = store.directory_queue().await.unwrap();
    let rename = queue
        .iter()
        .find(|e| e.status == SyncStatus::Rename)
        .expect("a rename entry must be upserted");
    assert_eq!(rename.dir.path, "/a/y");
    assert_eq!(rename.old_path.as_deref(), Some("/a/x"));
    assert_eq!(rename.dir.folder, "y");
    assert!(rename.dir.abs_path.ends_with("/a/y"));

    // Exactly one rename: the child cascade collapsed into the ancestor.
    assert_eq!(
        queue
            .iter()
            .filter(|e| e.status == SyncStatus::Rename)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_reconcile_is_idempotent_over_plan() {
    // P2 at the reconcile() level: a second pass over unchanged inputs
    // produces the same plan.
    let root = TempDir::new().unwrap();
    let (_store, reconciler) = setup(&root).await;

    let cloud_files = vec![tidesync_core::domain::CloudFile {
        uuid: "u1".to_string(),
        path: "/dev".to_string(),
        filename: "a.txt".to_string(),
        last_modified: "10".to_string(),
        hashvalue: "H".to_string(),
        size: 3,
        origin: "o1".to_string(),
        versions: 1,
        conflict_id: None,
    }];

    let first = reconciler
        .reconcile(&cloud_files, &[], &[], &[])
        .await
        .unwrap();
    let second = reconciler
        .reconcile(&cloud_files, &[], &[], &[])
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.files_to_download.len(), 1);
}
