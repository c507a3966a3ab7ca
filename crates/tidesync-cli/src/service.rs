//! The long-running sync service
//!
//! Wires the store, scanner, watcher, worker, reconciler, and api
//! together:
//!
//! ```text
//! startup:       Scanner ──→ Reconciler::reconcile_local_state ──→ Store
//! steady state:  FileWatcher ──→ Worker ──→ Store
//! every cycle:   push queues ──→ Api verbs
//!                Api::get_metadata + Store ──→ Reconciler::reconcile ──→ apply plan
//! ```
//!
//! Cycle failures are logged and retried on the next tick; only startup
//! errors (store open, missing sync root that cannot be created) are
//! fatal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tidesync_api::ApiClient;
use tidesync_core::config::Config;
use tidesync_core::domain::{
    DirectoryMetadata, FileMetadata, ReconciliationResult, SyncStatus,
};
use tidesync_core::paths;
use tidesync_core::ports::CloudApi;
use tidesync_store::SyncStore;
use tidesync_sync::reconcile::Reconciler;
use tidesync_sync::scanner::Scanner;
use tidesync_sync::watcher::{FileWatcher, NotifyBackend, SettleConfig};
use tidesync_sync::worker::Worker;

/// Owns every long-lived component of the client
pub struct SyncService {
    config: Config,
    store: SyncStore,
    api: Arc<dyn CloudApi>,
    scanner: Scanner,
    worker: Worker,
    reconciler: Reconciler,
    sync_root: String,
    shutdown: CancellationToken,
}

impl SyncService {
    /// Builds the service; any failure here is unrecoverable
    pub async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        if !config.sync.root.exists() {
            info!(root = %config.sync.root.display(), "creating missing sync folder");
            std::fs::create_dir_all(&config.sync.root)
                .with_context(|| format!("cannot create sync folder {}", config.sync.root.display()))?;
        }
        let sync_root = config.sync.root.to_string_lossy().into_owned();

        let store = SyncStore::open(&config.store.db_path, sync_root.clone())
            .await
            .context("failed to open state database")?;

        let api: Arc<dyn CloudApi> = Arc::new(
            ApiClient::new(config.api.base_url.clone(), config.api.user_email.clone())
                .context("failed to build api client")?,
        );

        let scanner = Scanner::new(&config.sync.root);
        let worker = Worker::new(store.clone(), scanner.clone(), sync_root.clone());
        let reconciler = Reconciler::new(store.clone(), scanner.clone(), sync_root.clone());

        Ok(Self {
            config,
            store,
            api,
            scanner,
            worker,
            reconciler,
            sync_root,
            shutdown,
        })
    }

    /// Main loop: initial reconcile, then watch + periodic cloud cycles
    pub async fn run(&self) -> Result<()> {
        info!("performing initial filesystem scan");
        let scanner = self.scanner.clone();
        let scan = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .context("scan task panicked")?;
        self.reconciler
            .reconcile_local_state(&scan)
            .await
            .context("offline reconciliation failed")?;
        info!("initial scan and local reconciliation complete");

        let settle = SettleConfig {
            poll_interval: Duration::from_millis(self.config.watcher.poll_interval_ms),
            settle_time: Duration::from_millis(self.config.watcher.settle_ms),
            ..SettleConfig::default()
        };
        let (watcher, mut events) = FileWatcher::start(
            Box::new(NotifyBackend::new()),
            Path::new(&self.sync_root),
            settle,
            self.shutdown.child_token(),
        )
        .context("failed to start filesystem watcher")?;

        let mut cycle = tokio::time::interval(Duration::from_secs(self.config.sync.poll_interval));
        cycle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(root = %self.sync_root, "monitoring sync folder");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                event = events.recv() => {
                    match event {
                        Some(event) => self.worker.handle_event(event).await,
                        None => break,
                    }
                }

                _ = cycle.tick() => {
                    if let Err(e) = self.sync_cycle().await {
                        warn!(error = %e, "sync cycle failed, retrying next tick");
                    }
                }
            }
        }

        watcher.stop().await;
        Ok(())
    }

    /// One cloud cycle: push pending local work, pull metadata, apply plan
    async fn sync_cycle(&self) -> Result<()> {
        self.push_pending().await;

        let metadata = self.api.get_metadata().await.context("metadata fetch failed")?;
        let db_files = self.store.all_files().await?;
        let db_dirs = self.store.all_directories().await?;

        let plan = self
            .reconciler
            .reconcile(&metadata.files, &metadata.directories, &db_files, &db_dirs)
            .await?;

        if plan.is_empty() {
            debug!("nothing to reconcile");
            return Ok(());
        }
        info!(
            download = plan.files_to_download.len(),
            update = plan.files_to_update.len(),
            delete = plan.files_to_delete_local.len(),
            rename = plan.files_to_rename.len(),
            conflicts = plan.files_in_conflict.len(),
            mkdir = plan.folders_to_create_local.len(),
            rmdir = plan.folders_to_delete_local.len(),
            "applying reconciliation plan"
        );
        self.apply_plan(plan).await;
        Ok(())
    }

    // ========================================================================
    // Push: drain the pending queues through the api verbs
    // ========================================================================

    /// Sends queued local work to the cloud; each acknowledged entry is
    /// removed, failures stay queued for the next cycle
    async fn push_pending(&self) {
        let dir_entries = match self.store.directory_queue().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot read directory queue");
                return;
            }
        };
        for entry in dir_entries {
            let outcome = match entry.status {
                SyncStatus::New | SyncStatus::FileLinked => {
                    self.api.create_folder(&entry.dir).await
                }
                SyncStatus::Delete => self.api.delete_folder(&entry.dir).await,
                SyncStatus::Rename => self.api.rename_folder(&entry).await,
                SyncStatus::Modified => Ok(()),
            };
            match outcome {
                Ok(()) => {
                    if let Err(e) = self.store.remove_directory_queue(&entry.dir.uuid).await {
                        warn!(path = %entry.dir.path, error = %e, "queue cleanup failed");
                    }
                }
                Err(e) => warn!(path = %entry.dir.path, status = %entry.status, error = %e,
                    "folder push failed, will retry"),
            }
        }

        let file_entries = match self.store.file_queue().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot read file queue");
                return;
            }
        };
        for entry in file_entries {
            let outcome = match entry.status {
                SyncStatus::New | SyncStatus::Modified => {
                    let path_ids = self.path_ids_for(&entry.file.path).await;
                    match self.api.upload_file(&entry, &path_ids).await {
                        Ok(_id) => {
                            // The cloud now holds this content: refresh the
                            // acknowledged hash on the canonical row.
                            self.mark_synced(&entry.file).await;
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                SyncStatus::Delete => self.api.delete_file(&entry).await,
                SyncStatus::Rename => self.api.rename_file(&entry).await,
                SyncStatus::FileLinked => Ok(()),
            };
            match outcome {
                Ok(()) => {
                    if let Err(e) = self
                        .store
                        .remove_file_queue_by_origin(&entry.file.origin)
                        .await
                    {
                        warn!(file = %entry.file.filename, error = %e, "queue cleanup failed");
                    }
                }
                Err(e) => warn!(file = %entry.file.filename, status = %entry.status, error = %e,
                    "file push failed, will retry"),
            }
        }
    }

    /// Directory uuids along a file's path, outermost first
    async fn path_ids_for(&self, file_path: &str) -> Vec<String> {
        let segments = paths::split_segments(file_path);
        let mut ids = Vec::new();
        let mut prefix = String::new();
        for segment in segments {
            prefix.push('/');
            prefix.push_str(segment);
            let fd = paths::folder_device(&prefix);
            if let Ok(Some(dir)) = self
                .store
                .directory_by_triple(&fd.device, &fd.folder, &prefix)
                .await
            {
                ids.push(dir.uuid);
            }
        }
        ids
    }

    /// Records that the cloud acknowledged the file's current content
    async fn mark_synced(&self, file: &FileMetadata) {
        let mut synced = file.clone();
        synced.last_synced_hashvalue = file.hashvalue.clone();
        if let Err(e) = self.store.upsert_file(&synced).await {
            warn!(file = %file.filename, error = %e, "failed to record synced hash");
        }
    }

    // ========================================================================
    // Pull: apply the reconciliation plan locally
    // ========================================================================

    /// Applies a plan; each item is independent and failures only log
    async fn apply_plan(&self, plan: ReconciliationResult) {
        for folder in &plan.folders_to_create_local {
            if let Err(e) = std::fs::create_dir_all(&folder.abs_path) {
                warn!(path = %folder.path, error = %e, "local folder create failed");
                continue;
            }
            let dir = DirectoryMetadata {
                uuid: folder.uuid.clone(),
                device: folder.device.clone(),
                folder: folder.folder.clone(),
                path: folder.path.clone(),
                created_at: folder.created_at.clone(),
                abs_path: folder.abs_path.clone(),
                inode: Scanner::inode(Path::new(&folder.abs_path)),
            };
            if let Err(e) = self.store.upsert_directory(&dir).await {
                warn!(path = %folder.path, error = %e, "folder row upsert failed");
            }
        }

        for cloud_file in plan.files_to_download.iter().chain(&plan.files_to_update) {
            let abs_dir = paths::join_abs(&self.sync_root, &cloud_file.path);
            let target = Path::new(&abs_dir).join(&cloud_file.filename);
            if let Err(e) = self.api.download_file(cloud_file, &target).await {
                warn!(file = %cloud_file.filename, error = %e, "download failed");
                continue;
            }
            let dir_id = self.directory_id_for(&cloud_file.path).await;
            let file = FileMetadata {
                uuid: cloud_file.uuid.clone(),
                path: cloud_file.path.clone(),
                filename: cloud_file.filename.clone(),
                last_modified: cloud_file.last_modified.clone(),
                hashvalue: cloud_file.hashvalue.clone(),
                size: cloud_file.size,
                dir_id,
                inode: Scanner::inode(&target),
                abs_path: target.to_string_lossy().into_owned(),
                versions: cloud_file.versions,
                origin: cloud_file.origin.clone(),
                last_synced_hashvalue: cloud_file.hashvalue.clone(),
                conflict_id: cloud_file.conflict_id.clone(),
            };
            if let Err(e) = self.store.upsert_file(&file).await {
                warn!(file = %file.filename, error = %e, "file row upsert failed");
            }
        }

        for rename in &plan.files_to_rename {
            let old_abs = &rename.local.abs_path;
            let new_dir = paths::join_abs(&self.sync_root, &rename.cloud.path);
            let new_abs = Path::new(&new_dir).join(&rename.cloud.filename);
            if let Err(e) = std::fs::rename(old_abs, &new_abs) {
                warn!(old = %old_abs, error = %e, "local rename failed");
                continue;
            }
            let mut moved = rename.local.clone();
            moved.path = rename.cloud.path.clone();
            moved.filename = rename.cloud.filename.clone();
            moved.abs_path = new_abs.to_string_lossy().into_owned();
            if let Err(e) = self.store.upsert_file(&moved).await {
                warn!(file = %moved.filename, error = %e, "renamed row upsert failed");
            }
        }

        for file in &plan.files_to_delete_local {
            if let Err(e) = std::fs::remove_file(&file.abs_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %file.filename, error = %e, "local delete failed");
                    continue;
                }
            }
            if let Err(e) = self.store.remove_file(&file.path, &file.filename).await {
                warn!(file = %file.filename, error = %e, "file row delete failed");
            }
        }

        for folder in &plan.folders_to_delete_local {
            if let Err(e) = std::fs::remove_dir_all(&folder.abs_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %folder.path, error = %e, "local folder delete failed");
                    continue;
                }
            }
            let fd = paths::folder_device(&folder.path);
            match self
                .store
                .directory_by_triple(&fd.device, &fd.folder, &folder.path)
                .await
            {
                Ok(Some(dir)) => {
                    if let Err(e) = self.store.remove_directory(&dir.uuid).await {
                        warn!(path = %folder.path, error = %e, "folder row delete failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(path = %folder.path, error = %e, "folder lookup failed"),
            }
        }

        for conflict in &plan.files_in_conflict {
            // Both sides changed; surfacing it is all this client does.
            warn!(
                file = %conflict.filename,
                path = %conflict.path,
                origin = %conflict.origin,
                "conflict: local and cloud both modified"
            );
        }
    }

    /// Canonical uuid of the directory row at `path`, synthesising one
    /// from disk when the cloud sent files before their folder
    async fn directory_id_for(&self, path: &str) -> String {
        let fd = paths::folder_device(path);
        match self
            .store
            .directory_by_triple(&fd.device, &fd.folder, path)
            .await
        {
            Ok(Some(dir)) => dir.uuid,
            Ok(None) => {
                let abs_path = paths::join_abs(&self.sync_root, path);
                let created_at = Scanner::mtime_secs(Path::new(&abs_path))
                    .map(|m| m.to_string())
                    .unwrap_or_default();
                let inode = Scanner::inode(Path::new(&abs_path));
                let dir = DirectoryMetadata {
                    uuid: Uuid::new_v4().to_string(),
                    device: fd.device,
                    folder: fd.folder,
                    path: path.to_string(),
                    created_at,
                    abs_path,
                    inode,
                };
                match self.store.upsert_directory(&dir).await {
                    Ok(uuid) => uuid,
                    Err(e) => {
                        warn!(path, error = %e, "directory synthesis failed");
                        String::new()
                    }
                }
            }
            Err(e) => {
                warn!(path, error = %e, "directory lookup failed");
                String::new()
            }
        }
    }
}
