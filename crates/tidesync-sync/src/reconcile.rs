//! Reconciliation engine
//!
//! Two entry points:
//!
//! - [`Reconciler::reconcile_local_state`] runs once at startup, aligning
//!   the canonical store with what the scanner actually found on disk:
//!   offline adds, modifies, deletes, and the inode+hash file rename pass.
//! - [`Reconciler::reconcile`] is the periodic three-way pass over
//!   (cloud metadata, canonical store, pending queues). It classifies
//!   every cloud file into download / update / rename / conflict / no-op,
//!   plans local deletions and folder changes, and folds cascaded
//!   directory renames in the queue down to a single rename entry.
//!
//! The classification itself is pure over its inputs; only the offline
//! pass and the directory-rename upserts write to the store. Every
//! decision path is total: ambiguity yields "no action".

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};
use uuid::Uuid;

use tidesync_core::domain::{
    CloudFile, CloudFolder, DirQueueEntry, DirectoryMetadata, FileMetadata, FileQueueEntry,
    FileRename, FolderCreate, FolderDelete, ReconciliationResult, RenameInfo, ScanResult,
    ScannedDirectory, ScannedFile, SyncStatus,
};
use tidesync_core::paths;
use tidesync_store::{StoreError, SyncStore};

use crate::scanner::Scanner;

/// Drives both reconciliation passes against a store
pub struct Reconciler {
    store: SyncStore,
    scanner: Scanner,
    sync_root: String,
}

impl Reconciler {
    pub fn new(store: SyncStore, scanner: Scanner, sync_root: impl Into<String>) -> Self {
        Self {
            store,
            scanner,
            sync_root: sync_root.into(),
        }
    }

    // ========================================================================
    // Offline reconciliation (scan vs canonical)
    // ========================================================================

    /// Aligns the canonical store with the scanned filesystem state
    ///
    /// Detects changes that happened while the client was not running and
    /// records them as canonical rows plus queue entries, finishing with
    /// the file-level rename pass over the queue.
    pub async fn reconcile_local_state(&self, scanned: &ScanResult) -> Result<(), StoreError> {
        info!("reconciling local filesystem with store");

        let db_files = self.store.all_files().await?;
        let db_dirs = self.store.all_directories().await?;

        let db_files_by_key: HashMap<String, &FileMetadata> = db_files
            .iter()
            .map(|f| (paths::path_key(&f.path, &f.filename), f))
            .collect();
        let db_dirs_by_path: HashMap<&str, &DirectoryMetadata> = db_dirs
            .iter()
            .map(|d| (paths::normalize_dir(&d.path), d))
            .filter(|(p, _)| *p != "/")
            .collect();

        let scan_files_by_key: HashMap<String, &ScannedFile> = scanned
            .files
            .iter()
            .map(|f| (paths::path_key(&f.path, &f.filename), f))
            .collect();
        let scan_dirs_by_path: HashMap<&str, &ScannedDirectory> =
            scanned.directories.iter().map(|d| (d.path.as_str(), d)).collect();

        // Offline ADD / MODIFY.
        for (key, scanned_file) in &scan_files_by_key {
            match db_files_by_key.get(key) {
                None => {
                    debug!(key = %key, "offline add detected");
                    self.record_offline_add(scanned_file).await?;
                }
                Some(db_file) if db_file.hashvalue != scanned_file.hash => {
                    debug!(key = %key, "offline modify detected");
                    self.record_offline_modify(scanned_file, db_file).await?;
                }
                Some(_) => {}
            }
        }

        // Offline DELETE.
        for (key, db_file) in &db_files_by_key {
            if !scan_files_by_key.contains_key(key) {
                debug!(key = %key, "offline delete detected");
                let mut tombstone =
                    FileQueueEntry::with_status((*db_file).clone(), SyncStatus::Delete);
                tombstone.old_path = Some(db_file.path.clone());
                tombstone.old_filename = Some(db_file.filename.clone());
                self.store
                    .delete_file_with_tombstone(&db_file.path, &db_file.filename, &tombstone)
                    .await?;
            }
        }

        // Offline DIR ADD.
        for (path, scanned_dir) in &scan_dirs_by_path {
            if !db_dirs_by_path.contains_key(paths::normalize_dir(path)) {
                debug!(path = %path, "offline directory add detected");
                self.record_offline_dir_add(scanned_dir).await?;
            }
        }

        // Offline DIR DELETE.
        for (path, db_dir) in &db_dirs_by_path {
            if !scan_dirs_by_path.contains_key(path) {
                debug!(path = %path, "offline directory delete detected");
                let mut tombstone =
                    DirQueueEntry::with_status((*db_dir).clone(), SyncStatus::Delete);
                tombstone.old_path = Some(db_dir.path.clone());
                self.store.remove_directory(&db_dir.uuid).await?;
                self.store.upsert_directory_queue(&tombstone).await?;
            }
        }

        self.collapse_file_renames().await
    }

    /// Records a scanned file absent from the canonical store
    async fn record_offline_add(
        &self,
        scanned: &ScannedFile,
    ) -> Result<(), StoreError> {
        let uuid = Uuid::new_v4().to_string();
        let mut file = FileMetadata {
            uuid: uuid.clone(),
            path: scanned.path.clone(),
            filename: scanned.filename.clone(),
            last_modified: scanned.mtime.to_string(),
            hashvalue: scanned.hash.clone(),
            size: scanned.size,
            dir_id: String::new(),
            inode: scanned.inode.clone(),
            abs_path: scanned.abs_path.clone(),
            versions: 1,
            origin: uuid,
            last_synced_hashvalue: scanned.hash.clone(),
            conflict_id: None,
        };
        file.dir_id = self.ensure_parent_directory(&file.path).await?;

        let mut entry = FileQueueEntry::with_status(file.clone(), SyncStatus::New);
        entry.old_path = Some(file.path.clone());
        entry.old_filename = Some(file.filename.clone());

        self.store.insert_file_with_queue(&file, &entry).await
    }

    /// Records a scanned file whose content hash differs from canonical
    ///
    /// Preserves `origin` and `dir_id`, bumps `versions`, and carries the
    /// *prior* `last_synced_hashvalue` forward: the new hash is not synced
    /// until the cloud acknowledges it.
    async fn record_offline_modify(
        &self,
        scanned: &ScannedFile,
        db_file: &FileMetadata,
    ) -> Result<(), StoreError> {
        let file = FileMetadata {
            uuid: Uuid::new_v4().to_string(),
            path: scanned.path.clone(),
            filename: scanned.filename.clone(),
            last_modified: scanned.mtime.to_string(),
            hashvalue: scanned.hash.clone(),
            size: scanned.size,
            dir_id: db_file.dir_id.clone(),
            inode: scanned.inode.clone(),
            abs_path: scanned.abs_path.clone(),
            versions: db_file.versions + 1,
            origin: db_file.origin.clone(),
            last_synced_hashvalue: db_file.last_synced_hashvalue.clone(),
            conflict_id: db_file.conflict_id.clone(),
        };
        let entry = FileQueueEntry::with_status(file.clone(), SyncStatus::Modified);
        self.store.insert_file_with_queue(&file, &entry).await
    }

    /// Records a scanned directory absent from the canonical store
    async fn record_offline_dir_add(
        &self,
        scanned: &ScannedDirectory,
    ) -> Result<(), StoreError> {
        let fd = paths::folder_device(&scanned.path);
        let existing = self
            .store
            .directory_by_triple(&fd.device, &scanned.name, &scanned.path)
            .await?;

        let dir = DirectoryMetadata {
            uuid: existing
                .map(|d| d.uuid)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            device: fd.device,
            folder: scanned.name.clone(),
            path: scanned.path.clone(),
            created_at: scanned.mtime.to_string(),
            abs_path: scanned.abs_path.clone(),
            inode: scanned.inode.clone(),
        };
        let entry = DirQueueEntry::with_status(dir.clone(), SyncStatus::New);
        self.store.insert_directory_with_queue(&dir, &entry).await?;
        Ok(())
    }

    /// Looks up the parent directory for a file path, synthesising a
    /// FILE_LINKED directory when the store does not know it yet
    ///
    /// Returns the uuid the file's `dir_id` should reference.
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
        let abs = std::path::Path::new(&abs_path);
        let created_at = Scanner::mtime_secs(abs).map(|m| m.to_string()).unwrap_or_default();
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

    /// File-level rename pass over the queue
    ///
    /// A pair of one `delete` and one `new` entry sharing an inode and a
    /// content hash is a rename: the `new` entry is rewritten to `rename`
    /// carrying the deleted filename, and the `delete` entry is removed
    /// by origin (it still sits at the old path).
    async fn collapse_file_renames(&self) -> Result<(), StoreError> {
        let queue = self.store.file_queue().await?;

        let mut by_inode: BTreeMap<&str, Vec<&FileQueueEntry>> = BTreeMap::new();
        for entry in &queue {
            if !entry.file.inode.is_empty() {
                by_inode.entry(&entry.file.inode).or_default().push(entry);
            }
        }

        for (inode, group) in by_inode {
            if group.len() != 2 {
                continue;
            }
            let added = group.iter().find(|e| e.status == SyncStatus::New);
            let deleted = group.iter().find(|e| e.status == SyncStatus::Delete);
            let (Some(added), Some(deleted)) = (added, deleted) else {
                continue;
            };
            if added.file.hashvalue != deleted.file.hashvalue {
                continue;
            }

            info!(
                inode,
                old = %deleted.file.filename,
                new = %added.file.filename,
                "offline file rename detected"
            );
            let mut renamed = (*added).clone();
            renamed.status = SyncStatus::Rename;
            renamed.old_filename = Some(deleted.file.filename.clone());
            self.store
                .remove_file_queue_by_origin(&deleted.file.origin)
                .await?;
            self.store.update_file_queue(&renamed).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Three-way reconciliation (cloud vs canonical vs queue)
    // ========================================================================

    /// Classifies cloud state against the canonical store and the queues
    ///
    /// Pure over `cloud_files` / `cloud_dirs` / `db_files` / `db_dirs` and
    /// the queues read from the store; the only writes are the collapsed
    /// directory-rename entries.
    pub async fn reconcile(
        &self,
        cloud_files: &[CloudFile],
        cloud_dirs: &[CloudFolder],
        db_files: &[FileMetadata],
        db_dirs: &[DirectoryMetadata],
    ) -> Result<ReconciliationResult, StoreError> {
        debug!(
            cloud_files = cloud_files.len(),
            cloud_dirs = cloud_dirs.len(),
            "starting reconciliation pass"
        );

        let file_queue = self.store.file_queue().await?;
        let dir_queue = self.store.directory_queue().await?;

        let mut result = classify_files(cloud_files, db_files, &file_queue);
        let (creates, deletes) =
            reconcile_directories(cloud_dirs, db_dirs, &dir_queue, &self.sync_root);
        result.folders_to_create_local = creates;
        result.folders_to_delete_local = deletes;

        let renames = collapse_dir_renames(detect_dir_renames(&dir_queue));
        for info in &renames {
            info!(old = %info.old_path, new = %info.new_path, "directory rename detected");
            let dir = DirectoryMetadata {
                uuid: info.uuid.clone(),
                device: info.device.clone(),
                folder: info
                    .new_segment
                    .clone()
                    .unwrap_or_else(|| info.folder.clone()),
                path: info.new_path.clone(),
                created_at: info.created_at.clone(),
                abs_path: paths::join_abs(&self.sync_root, &info.new_path),
                inode: info.inode.clone(),
            };
            let mut entry = DirQueueEntry::with_status(dir, SyncStatus::Rename);
            entry.old_path = Some(info.old_path.clone());
            self.store.upsert_directory_queue(&entry).await?;
        }

        Ok(result)
    }
}

// ============================================================================
// Pure classification
// ============================================================================

/// Classifies every cloud file and plans local deletions
///
/// Implements the decision table: download when the file is unknown both
/// by path and by origin and nothing local is pending; update on a cloud
/// content change; rename on a cloud name change; conflict when both
/// sides changed content. A locally-pending entry with no cloud change
/// suppresses any action (resurrection protection). Canonical files
/// absent from the cloud become deletions unless local work is pending,
/// and the old side of a planned rename is never also a deletion.
pub fn classify_files(
    cloud_files: &[CloudFile],
    db_files: &[FileMetadata],
    file_queue: &[FileQueueEntry],
) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();

    let db_by_origin: HashMap<&str, &FileMetadata> =
        db_files.iter().map(|f| (f.origin.as_str(), f)).collect();
    let db_by_key: HashMap<String, &FileMetadata> = db_files
        .iter()
        .map(|f| (paths::path_key(&f.path, &f.filename), f))
        .collect();
    let cloud_by_key: HashMap<String, &CloudFile> = cloud_files
        .iter()
        .map(|f| (paths::path_key(&f.path, &f.filename), f))
        .collect();

    let queue_by_origin: HashMap<&str, &FileQueueEntry> = file_queue
        .iter()
        .filter(|e| !e.file.origin.is_empty())
        .map(|e| (e.file.origin.as_str(), e))
        .collect();
    let mut queue_by_uuid: HashMap<&str, Vec<&FileQueueEntry>> = HashMap::new();
    for entry in file_queue {
        queue_by_uuid
            .entry(entry.file.uuid.as_str())
            .or_default()
            .push(entry);
    }
    let queue_by_key: HashMap<String, &FileQueueEntry> = file_queue
        .iter()
        .map(|e| (paths::path_key(&e.file.path, &e.file.filename), e))
        .collect();

    for cloud_file in cloud_files {
        let key = paths::path_key(&cloud_file.path, &cloud_file.filename);

        let local_by_origin = db_by_origin.get(cloud_file.origin.as_str()).copied();
        let local_by_path = db_by_key.get(&key).copied();
        let local_in_queue = queue_by_origin
            .get(cloud_file.origin.as_str())
            .copied()
            .or_else(|| {
                queue_by_uuid
                    .get(cloud_file.uuid.as_str())
                    .and_then(|v| v.first().copied())
            })
            .or_else(|| queue_by_key.get(&key).copied());

        let is_local_modified = queue_by_key
            .get(&key)
            .map(|e| e.status == SyncStatus::Modified)
            .unwrap_or(false);
        let queue_by_origin_entry = queue_by_origin.get(cloud_file.origin.as_str());
        let is_local_renamed = queue_by_origin_entry
            .map(|e| e.status == SyncStatus::Rename)
            .unwrap_or(false);

        let is_cloud_modified = local_by_path
            .map(|f| cloud_file.hashvalue != f.last_synced_hashvalue)
            .unwrap_or(false);
        let is_cloud_renamed = if is_local_renamed {
            queue_by_origin_entry
                .and_then(|e| e.old_filename.as_ref())
                .map(|old| *old != cloud_file.filename)
                .unwrap_or(false)
        } else {
            local_by_origin
                .map(|f| f.filename != cloud_file.filename)
                .unwrap_or(false)
        };

        // Unknown on both axes: download unless local work already names it.
        if local_by_path.is_none() && local_by_origin.is_none() {
            if local_in_queue.is_none() {
                result.files_to_download.push(cloud_file.clone());
                continue;
            }
        }

        if let Some(local) = local_by_origin {
            if is_cloud_modified && !is_cloud_renamed && !is_local_modified && !is_local_renamed {
                result.files_to_update.push(cloud_file.clone());
            }
            if !is_cloud_modified && is_cloud_renamed && !is_local_modified && !is_local_renamed {
                result.files_to_rename.push(FileRename {
                    local: local.clone(),
                    cloud: cloud_file.clone(),
                });
            }
            if is_cloud_modified && !is_cloud_renamed && is_local_modified && !is_local_renamed {
                result.files_in_conflict.push(cloud_file.clone());
            }
        }

        // Anything else with pending local work and no cloud change is a
        // deliberate no-op: the queue will push it, the cloud must not
        // resurrect it.
    }

    // Deletion pass: canonical files the cloud no longer has.
    let mut to_delete: BTreeMap<String, &FileMetadata> = BTreeMap::new();
    for db_file in db_files {
        let key = paths::path_key(&db_file.path, &db_file.filename);
        if cloud_by_key.contains_key(&key) {
            continue;
        }
        if let Some(entry) = queue_by_origin.get(db_file.origin.as_str()) {
            if matches!(
                entry.status,
                SyncStatus::Modified | SyncStatus::Rename | SyncStatus::New
            ) {
                continue;
            }
        }
        to_delete.insert(key, db_file);
    }

    // Safety filter: the old side of a planned rename is not a deletion.
    for rename in &result.files_to_rename {
        let old_key = paths::path_key(&rename.local.path, &rename.local.filename);
        to_delete.remove(&old_key);
    }
    result.files_to_delete_local = to_delete.into_values().cloned().collect();

    result
}

/// Plans local folder creations and deletions; paths are authoritative
/// and the root is excluded. Entries already present in the directory
/// queue are suppressed.
pub fn reconcile_directories(
    cloud_dirs: &[CloudFolder],
    db_dirs: &[DirectoryMetadata],
    dir_queue: &[DirQueueEntry],
    sync_root: &str,
) -> (Vec<FolderCreate>, Vec<FolderDelete>) {
    let cloud_by_path: BTreeMap<&str, &CloudFolder> = cloud_dirs
        .iter()
        .filter(|d| d.path != "/")
        .map(|d| (d.path.as_str(), d))
        .collect();
    let db_by_path: BTreeMap<&str, &DirectoryMetadata> = db_dirs
        .iter()
        .filter(|d| d.path != "/")
        .map(|d| (d.path.as_str(), d))
        .collect();

    let mut creates = Vec::new();
    for (path, cloud_dir) in &cloud_by_path {
        if db_by_path.contains_key(path) {
            continue;
        }
        let queued = dir_queue.iter().any(|e| {
            e.dir.path == *path && e.dir.device == cloud_dir.device && e.dir.folder == cloud_dir.folder
        });
        if !queued {
            creates.push(FolderCreate {
                abs_path: paths::join_abs(sync_root, path),
                path: cloud_dir.path.clone(),
                folder: cloud_dir.folder.clone(),
                uuid: cloud_dir.uuid.clone(),
                device: cloud_dir.device.clone(),
                created_at: cloud_dir.created_at.clone(),
            });
        }
    }

    let mut deletes = Vec::new();
    for (path, db_dir) in &db_by_path {
        if cloud_by_path.contains_key(path) {
            continue;
        }
        let queued = dir_queue.iter().any(|e| e.dir.path == *path);
        if !queued {
            deletes.push(FolderDelete {
                abs_path: db_dir.abs_path.clone(),
                path: db_dir.path.clone(),
                folder: db_dir.folder.clone(),
            });
        }
    }

    (creates, deletes)
}

/// Detects directory renames by inode coincidence in the queue
///
/// Within each inode group the shortest-path `delete` entry and the
/// shortest-path `new` entry are compared; a path diff between them
/// yields one [`RenameInfo`]. Groups without both sides, or with no
/// usable inode, are skipped.
pub fn detect_dir_renames(entries: &[DirQueueEntry]) -> Vec<RenameInfo> {
    let mut by_inode: BTreeMap<&str, Vec<&DirQueueEntry>> = BTreeMap::new();
    for entry in entries {
        if !entry.dir.inode.is_empty() {
            by_inode.entry(&entry.dir.inode).or_default().push(entry);
        }
    }

    let mut renames = Vec::new();
    for (inode, group) in by_inode {
        // Top-most entries carry the rename; children are cascade noise.
        let old_entry = group
            .iter()
            .filter(|e| e.status == SyncStatus::Delete)
            .min_by_key(|e| e.dir.path.len());
        let new_entry = group
            .iter()
            .filter(|e| e.status == SyncStatus::New)
            .min_by_key(|e| e.dir.path.len());
        let (Some(old_entry), Some(new_entry)) = (old_entry, new_entry) else {
            continue;
        };

        let Some(diff) = paths::path_diff(&old_entry.dir.path, &new_entry.dir.path) else {
            continue;
        };

        renames.push(RenameInfo {
            inode: inode.to_string(),
            uuid: new_entry.dir.uuid.clone(),
            device: new_entry.dir.device.clone(),
            folder: new_entry.dir.folder.clone(),
            created_at: new_entry.dir.created_at.clone(),
            depth: diff.depth,
            old_segment: diff.old_segment,
            new_segment: diff.new_segment,
            old_path: old_entry.dir.path.clone(),
            new_path: new_entry.dir.path.clone(),
        });
    }
    renames
}

/// Collapses a cascade of child renames into the ancestor rename
///
/// Renaming `/a/x` to `/a/y` also reports `/a/x/child` → `/a/y/child`
/// with the same segment change; keeping the shortest old path per
/// `(old_segment → new_segment)` pair leaves only the ancestor.
pub fn collapse_dir_renames(renames: Vec<RenameInfo>) -> Vec<RenameInfo> {
    let mut by_change: BTreeMap<String, RenameInfo> = BTreeMap::new();
    for info in renames {
        let key = format!(
            "{}=>{}",
            info.old_segment.as_deref().unwrap_or(""),
            info.new_segment.as_deref().unwrap_or("")
        );
        match by_change.get(&key) {
            Some(existing) if existing.old_path.len() <= info.old_path.len() => {}
            _ => {
                by_change.insert(key, info);
            }
        }
    }
    by_change.into_values().collect()
}
