//! Ports consumed by the sync core
//!
//! The cloud service is a narrow capability: metadata fetch plus one verb
//! per planned action. The reconciler and the main loop depend only on
//! this trait; the HTTP implementation lives in `tidesync-api`.
//!
//! Port methods return `anyhow::Result` because failures at this boundary
//! are adapter-specific (HTTP status, body shape) and the callers treat
//! every failure the same way: log, skip, retry next cycle.

use std::path::Path;

use crate::domain::{
    CloudFile, CloudMetadata, DirQueueEntry, DirectoryMetadata, FileQueueEntry,
};

/// Remote object-store operations
#[async_trait::async_trait]
pub trait CloudApi: Send + Sync {
    /// Fetches the full metadata snapshot for the configured user
    async fn get_metadata(&self) -> anyhow::Result<CloudMetadata>;

    /// Streams a cloud file's bytes into `local_abs_path`
    async fn download_file(&self, file: &CloudFile, local_abs_path: &Path) -> anyhow::Result<()>;

    /// Uploads a queued file (content + metadata); returns the server id
    ///
    /// `path_ids` are the uuids of the directories along the file's path,
    /// outermost first.
    async fn upload_file(
        &self,
        entry: &FileQueueEntry,
        path_ids: &[String],
    ) -> anyhow::Result<String>;

    /// Deletes a file on the server
    async fn delete_file(&self, entry: &FileQueueEntry) -> anyhow::Result<()>;

    /// Renames a file on the server (old name taken from the entry)
    async fn rename_file(&self, entry: &FileQueueEntry) -> anyhow::Result<()>;

    /// Creates a folder on the server
    async fn create_folder(&self, dir: &DirectoryMetadata) -> anyhow::Result<()>;

    /// Deletes a folder on the server
    async fn delete_folder(&self, dir: &DirectoryMetadata) -> anyhow::Result<()>;

    /// Renames a folder on the server (old path taken from the entry)
    async fn rename_folder(&self, entry: &DirQueueEntry) -> anyhow::Result<()>;
}
