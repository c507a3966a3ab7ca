//! Online event worker
//!
//! Translates one debounced watcher event at a time into canonical and
//! queue mutations, each applied through a store transaction. Failures
//! are logged and dropped: the store stays consistent and the next raw
//! event re-derives the intended mutation.

use std::path::Path;

use tracing::{debug, info, warn};
use uuid::Uuid;

use tidesync_core::domain::{
    DirQueueEntry, DirectoryMetadata, FileMetadata, FileQueueEntry, SyncStatus,
};
use tidesync_core::paths;
use tidesync_store::{StoreError, SyncStore};

use crate::scanner::Scanner;
use crate::watcher::{DebouncedEvent, WatchKind};

/// Applies debounced filesystem events to the store
pub struct Worker {
    store: SyncStore,
    scanner: Scanner,
    sync_root: String,
}

impl Worker {
    pub fn new(store: SyncStore, scanner: Scanner, sync_root: impl Into<String>) -> Self {
        Self {
            store,
            scanner,
            sync_root: sync_root.into(),
        }
    }

    /// Dispatches a single event; errors are logged, never propagated
    pub async fn handle_event(&self, event: DebouncedEvent) {
        let outcome = match event.kind {
            WatchKind::Added => self.handle_added(&event.path).await,
            WatchKind::Modified => self.handle_modified(&event.path).await,
            WatchKind::Deleted => self.handle_deleted(&event.path).await,
            WatchKind::Moved => match &event.old_path {
                Some(old) => self.handle_renamed(&event.path, old).await,
                // The settled half of a move has no pair; the synchronous
                // half already performed the rename.
                None => Ok(()),
            },
        };
        if let Err(e) = outcome {
            warn!(path = %event.path.display(), kind = ?event.kind, error = %e,
                "event handling failed, store unchanged");
        }
    }

    /// Records a newly created file or directory
    pub async fn handle_added(&self, path: &Path) -> Result<(), StoreError> {
        if path.is_dir() {
            return self.add_directory(path).await;
        }

        let rel_path = self.scanner.to_relative_path(path);
        let filename = leaf_name(path);
        if self
            .store
            .file_by_path(&rel_path, &filename)
            .await?
            .is_some()
        {
            // Already known: likely our own down-sync from the cloud.
            debug!(path = %path.display(), "file already tracked, skipping add");
            return Ok(());
        }

        let Some((hash, size, mtime)) = read_file_facts(path) else {
            return Ok(());
        };

        let uuid = Uuid::new_v4().to_string();
        let mut file = FileMetadata {
            uuid: uuid.clone(),
            path: rel_path.clone(),
            filename: filename.clone(),
            last_modified: mtime.to_string(),
            hashvalue: hash.clone(),
            size,
            dir_id: String::new(),
            inode: Scanner::inode(path),
            abs_path: path.to_string_lossy().into_owned(),
            versions: 1,
            origin: uuid,
            last_synced_hashvalue: hash,
            conflict_id: None,
        };
        file.dir_id = self.ensure_parent_directory(&rel_path).await?;

        let mut entry = FileQueueEntry::with_status(file.clone(), SyncStatus::New);
        entry.old_path = Some(rel_path);
        entry.old_filename = Some(filename);

        info!(path = %path.display(), "file added");
        self.store.insert_file_with_queue(&file, &entry).await
    }

    /// Records a content change on a tracked file
    ///
    /// Preserves `origin` and `dir_id`, bumps `versions`, and keeps the
    /// prior `last_synced_hashvalue` until the cloud acknowledges the
    /// push. An untracked path falls back to [`Worker::handle_added`].
    pub async fn handle_modified(&self, path: &Path) -> Result<(), StoreError> {
        if path.is_dir() {
            return Ok(());
        }

        let rel_path = self.scanner.to_relative_path(path);
        let filename = leaf_name(path);
        let Some(db_file) = self.store.file_by_path(&rel_path, &filename).await? else {
            return self.handle_added(path).await;
        };

        let Some((hash, size, mtime)) = read_file_facts(path) else {
            return Ok(());
        };

        let file = FileMetadata {
            uuid: Uuid::new_v4().to_string(),
            path: rel_path,
            filename,
            last_modified: mtime.to_string(),
            hashvalue: hash,
            size,
            dir_id: db_file.dir_id.clone(),
            inode: Scanner::inode(path),
            abs_path: path.to_string_lossy().into_owned(),
            versions: db_file.versions + 1,
            origin: db_file.origin.clone(),
            last_synced_hashvalue: db_file.last_synced_hashvalue.clone(),
            conflict_id: db_file.conflict_id.clone(),
        };
        let entry = FileQueueEntry::with_status(file.clone(), SyncStatus::Modified);

        info!(path = %path.display(), versions = file.versions, "file modified");
        self.store.insert_file_with_queue(&file, &entry).await
    }

    /// Records a deletion, of a directory subtree or a single file
    ///
    /// The path is gone from disk, so the store decides what it was: a
    /// directory row at the path itself, else a file row under its parent.
    pub async fn handle_deleted(&self, path: &Path) -> Result<(), StoreError> {
        let rel_path = self.scanner.relative_of(path);
        let fd = paths::folder_device(&rel_path);

        if let Some(dir) = self
            .store
            .directory_by_triple(&fd.device, &fd.folder, &rel_path)
            .await?
        {
            let mut tombstone = DirQueueEntry::with_status(dir.clone(), SyncStatus::Delete);
            tombstone.old_path = Some(rel_path.clone());
            info!(path = %path.display(), "directory deleted");
            return self.store.delete_folder(&rel_path, &tombstone).await;
        }

        let parent_rel = self
            .scanner
            .relative_of(path.parent().unwrap_or(path));
        let filename = leaf_name(path);
        if let Some(file) = self.store.file_by_path(&parent_rel, &filename).await? {
            let mut tombstone = FileQueueEntry::with_status(file, SyncStatus::Delete);
            tombstone.old_path = Some(parent_rel.clone());
            tombstone.old_filename = Some(filename.clone());
            info!(path = %path.display(), "file deleted");
            return self
                .store
                .delete_file_with_tombstone(&parent_rel, &filename, &tombstone)
                .await;
        }

        debug!(path = %path.display(), "deleted path was not tracked");
        Ok(())
    }

    /// Records a move, of a directory subtree or a single file
    pub async fn handle_renamed(&self, new_path: &Path, old_path: &Path) -> Result<(), StoreError> {
        if new_path.is_dir() {
            return self.rename_directory(new_path, old_path).await;
        }

        let old_parent_rel = self
            .scanner
            .relative_of(old_path.parent().unwrap_or(old_path));
        let old_filename = leaf_name(old_path);

        let Some(db_file) = self
            .store
            .file_by_path(&old_parent_rel, &old_filename)
            .await?
        else {
            // Unknown origin location: treat as a plain add of the new path.
            return self.handle_added(new_path).await;
        };

        let Some((hash, size, mtime)) = read_file_facts(new_path) else {
            return Ok(());
        };

        let new_parent_rel = self.scanner.to_relative_path(new_path);
        let new_filename = leaf_name(new_path);

        let mut file = FileMetadata {
            uuid: db_file.uuid.clone(),
            path: new_parent_rel.clone(),
            filename: new_filename.clone(),
            last_modified: mtime.to_string(),
            hashvalue: hash,
            size,
            dir_id: String::new(),
            inode: Scanner::inode(new_path),
            abs_path: new_path.to_string_lossy().into_owned(),
            versions: db_file.versions,
            origin: db_file.origin.clone(),
            last_synced_hashvalue: db_file.last_synced_hashvalue.clone(),
            conflict_id: db_file.conflict_id.clone(),
        };
        file.dir_id = self.ensure_parent_directory(&new_parent_rel).await?;

        let mut entry = FileQueueEntry::with_status(file.clone(), SyncStatus::Rename);
        entry.old_path = Some(old_parent_rel);
        entry.old_filename = Some(old_filename);

        info!(old = %old_path.display(), new = %new_path.display(), "file renamed");
        self.store.insert_file_with_queue(&file, &entry).await
    }

    async fn add_directory(&self, path: &Path) -> Result<(), StoreError> {
        let rel_path = self.scanner.relative_of(path);
        let fd = paths::folder_device(&rel_path);

        let existing = self
            .store
            .directory_by_triple(&fd.device, &fd.folder, &rel_path)
            .await?;
        let dir = DirectoryMetadata {
            uuid: existing
                .map(|d| d.uuid)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            device: fd.device,
            folder: fd.folder,
            path: rel_path.clone(),
            created_at: Scanner::mtime_secs(path)
                .map(|m| m.to_string())
                .unwrap_or_default(),
            abs_path: path.to_string_lossy().into_owned(),
            inode: Scanner::inode(path),
        };
        let mut entry = DirQueueEntry::with_status(dir.clone(), SyncStatus::New);
        entry.old_path = Some(rel_path);

        info!(path = %path.display(), "directory added");
        self.store.insert_directory_with_queue(&dir, &entry).await?;
        Ok(())
    }

    async fn rename_directory(&self, new_path: &Path, old_path: &Path) -> Result<(), StoreError> {
        let old_rel = self.scanner.relative_of(old_path);
        let new_rel = self.scanner.relative_of(new_path);
        let old_fd = paths::folder_device(&old_rel);

        let Some(dir) = self
            .store
            .directory_by_triple(&old_fd.device, &old_fd.folder, &old_rel)
            .await?
        else {
            return self.handle_added(new_path).await;
        };

        let new_fd = paths::folder_device(&new_rel);
        let moved = DirectoryMetadata {
            uuid: dir.uuid.clone(),
            device: new_fd.device,
            folder: new_fd.folder,
            path: new_rel.clone(),
            created_at: dir.created_at.clone(),
            abs_path: new_path.to_string_lossy().into_owned(),
            inode: dir.inode.clone(),
        };
        let mut entry = DirQueueEntry::with_status(moved, SyncStatus::Rename);
        entry.old_path = Some(old_rel.clone());

        info!(old = %old_path.display(), new = %new_path.display(), "directory renamed");
        self.store.move_directory(&new_rel, &old_rel, &entry).await
    }

    /// Looks up or synthesises (FILE_LINKED) the parent directory row,
    /// returning the uuid for the file's `dir_id`
    async fn ensure_parent_directory(&self, file_path: &str) -> Result<String, StoreError> {
        let fd = paths::folder_device(file_path);
        if let Some(dir) = self
            .store
            .directory_by_triple(&fd.device, &fd.folder, file_path)
            .await?
        {
            return Ok(dir.uuid);
        }

        let abs_path = paths::join_abs(&self.sync_root, file_path);
        let abs = Path::new(&abs_path);
        let created_at = Scanner::mtime_secs(abs)
            .map(|m| m.to_string())
            .unwrap_or_default();
        let inode = Scanner::inode(abs);
        let dir = DirectoryMetadata {
            uuid: Uuid::new_v4().to_string(),
            device: fd.device,
            folder: fd.folder,
            path: file_path.to_string(),
            created_at,
            abs_path,
            inode,
        };
        let mut entry = DirQueueEntry::with_status(dir.clone(), SyncStatus::FileLinked);
        entry.old_path = Some(dir.path.clone());

        debug!(path = %dir.path, "synthesised parent directory (FILE_LINKED)");
        self.store.insert_directory_with_queue(&dir, &entry).await
    }
}

/// Leaf name of a path as a plain string
fn leaf_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Hash, size, and mtime of a file; `None` (logged) when unreadable
fn read_file_facts(path: &Path) -> Option<(String, i64, i64)> {
    let hash = match Scanner::hash_file(path) {
        Ok(hash) => hash,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unable to read file, skipping");
            return None;
        }
    };
    let size = std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0);
    let mtime = Scanner::mtime_secs(path).unwrap_or(0);
    Some((hash, size, mtime))
}
