//! HTTP client for the sync service
//!
//! Wire surface:
//!
//! - `GET  /getSyncItems`  - full metadata snapshot (files + folders)
//! - `GET  /syncDownFile`  - streamed file content
//! - `POST /syncUpFile`    - multipart upload (content + filestat JSON)
//! - `DELETE /deleteFiles` - file deletion
//! - `POST /renameFile`    - file rename
//! - `POST /createFolder`, `DELETE /deleteFolder`, `POST /renameFolder`
//!
//! The logical path of a cloud file is derived from its `device` /
//! `directory` pair; folders carry their path directly. All connects,
//! reads, and writes are bounded by a 30 second timeout.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart;
use serde::Deserialize;
use tracing::{debug, info, warn};

use tidesync_core::domain::{
    CloudFile, CloudFolder, CloudMetadata, DirQueueEntry, DirectoryMetadata, FileQueueEntry,
    SyncStatus,
};
use tidesync_core::paths;
use tidesync_core::ports::CloudApi;

use crate::{encode::url_encode, ApiError};

/// Timeout applied to connects and whole requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SyncItemsResponse {
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireItem {
    #[serde(rename = "file")]
    File(WireFile),
    #[serde(rename = "folder")]
    Folder(WireFolder),
}

#[derive(Debug, Deserialize)]
struct WireFile {
    uuid: String,
    filename: String,
    device: Option<String>,
    directory: Option<String>,
    origin: String,
    checksum: String,
    size: i64,
    mtime: String,
    version: i32,
    #[serde(rename = "conflictId")]
    conflict_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFolder {
    uuid: String,
    device: String,
    folder: String,
    path: String,
    #[serde(default)]
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// Derives the logical containing-directory path from the wire pair
///
/// device `/` → `/`; directory `/` → `/{device}`; otherwise
/// `/{device}/{directory}`.
fn derive_path(device: Option<&str>, directory: Option<&str>) -> String {
    match (device, directory) {
        (Some("/"), Some(_)) => "/".to_string(),
        (Some(device), Some("/")) => format!("/{device}"),
        (Some(device), Some(directory)) => format!("/{device}/{directory}"),
        _ => "/".to_string(),
    }
}

// ============================================================================
// ApiClient
// ============================================================================

/// Typed HTTP client carrying the service base URL and user identity
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
}

impl ApiClient {
    /// Creates a client for `base_url`, authenticating as `username`
    pub fn new(base_url: impl Into<String>, username: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            username: username.into(),
        })
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    fn check(resp: &reqwest::Response, endpoint: &'static str) -> Result<(), ApiError> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            warn!(endpoint, status = status.as_u16(), "request failed");
            Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait::async_trait]
impl CloudApi for ApiClient {
    async fn get_metadata(&self) -> anyhow::Result<CloudMetadata> {
        let url = self.url(&format!("/getSyncItems?username={}", url_encode(&self.username)));
        let resp = self.http.get(&url).send().await.map_err(ApiError::from)?;
        Self::check(&resp, "/getSyncItems")?;

        let body: SyncItemsResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        let mut metadata = CloudMetadata::default();
        for item in body.items {
            match item {
                WireItem::File(file) => metadata.files.push(CloudFile {
                    uuid: file.uuid,
                    path: derive_path(file.device.as_deref(), file.directory.as_deref()),
                    filename: file.filename,
                    last_modified: file.mtime,
                    hashvalue: file.checksum,
                    size: file.size,
                    origin: file.origin,
                    versions: file.version,
                    conflict_id: file.conflict_id,
                }),
                WireItem::Folder(folder) => metadata.directories.push(CloudFolder {
                    uuid: folder.uuid,
                    device: folder.device,
                    folder: folder.folder,
                    path: folder.path,
                    created_at: folder.created_at,
                }),
            }
        }

        debug!(
            files = metadata.files.len(),
            folders = metadata.directories.len(),
            "cloud metadata fetched"
        );
        Ok(metadata)
    }

    async fn download_file(&self, file: &CloudFile, local_abs_path: &Path) -> anyhow::Result<()> {
        let parts = paths::parse_path(&file.path);
        let url = self.url(&format!(
            "/syncDownFile?file={}&dir={}&device={}&uuid={}&db=file&username={}",
            url_encode(&file.filename),
            url_encode(&parts.directory),
            url_encode(&parts.device),
            url_encode(&file.uuid),
            url_encode(&self.username),
        ));

        let mut resp = self.http.get(&url).send().await.map_err(ApiError::from)?;
        Self::check(&resp, "/syncDownFile")?;

        if let Some(parent) = local_abs_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ApiError::from)?;
        }

        // Stream into a temp file beside the target, then rename so a
        // dropped connection never leaves a truncated file.
        let tmp_path = {
            let mut p = local_abs_path.as_os_str().to_owned();
            p.push(".part");
            std::path::PathBuf::from(p)
        };
        let mut out = tokio::fs::File::create(&tmp_path).await.map_err(ApiError::from)?;
        while let Some(chunk) = resp.chunk().await.map_err(ApiError::from)? {
            tokio::io::AsyncWriteExt::write_all(&mut out, &chunk)
                .await
                .map_err(ApiError::from)?;
        }
        tokio::io::AsyncWriteExt::flush(&mut out).await.map_err(ApiError::from)?;
        drop(out);
        tokio::fs::rename(&tmp_path, local_abs_path)
            .await
            .map_err(ApiError::from)?;

        info!(file = %file.filename, target = %local_abs_path.display(), "file downloaded");
        Ok(())
    }

    async fn upload_file(
        &self,
        entry: &FileQueueEntry,
        path_ids: &[String],
    ) -> anyhow::Result<String> {
        let file = &entry.file;
        let content = tokio::fs::read(&file.abs_path).await.map_err(ApiError::from)?;
        let parts = paths::parse_path(&file.path);

        let extension = file
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or(&file.filename);
        let filestat = serde_json::json!({
            "filename": file.filename,
            "directory": parts.directory,
            "device": parts.device,
            "uuid": file.uuid,
            "origin": file.origin,
            "checksum": file.hashvalue,
            "size": file.size,
            "mtime": file.last_modified,
            "username": self.username,
            "version": file.versions,
            "isModified": entry.status == SyncStatus::Modified,
            "pathids": path_ids,
            "type": extension,
        });

        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(content)
                    .file_name(file.filename.clone())
                    .mime_str("application/octet-stream")
                    .map_err(ApiError::from)?,
            )
            .part(
                "filestat",
                multipart::Part::text(filestat.to_string())
                    .mime_str("application/json")
                    .map_err(ApiError::from)?,
            );

        let resp = self
            .http
            .post(self.url("/syncUpFile"))
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::from)?;
        Self::check(&resp, "/syncUpFile")?;

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        info!(file = %file.filename, id = %body.id, "file uploaded");
        Ok(body.id)
    }

    async fn delete_file(&self, entry: &FileQueueEntry) -> anyhow::Result<()> {
        let file = &entry.file;
        let parts = paths::parse_path(&file.path);
        let path_info = format!(
            "device={}&dir={}&file={}",
            url_encode(&parts.device),
            url_encode(&parts.directory),
            url_encode(&file.filename),
        );
        let body = serde_json::json!({
            "username": self.username,
            "directories": [],
            "fileIds": [{
                "id": file.uuid,
                "origin": file.uuid,
                "dir": parts.directory,
                "versions": 1,
                "path": path_info,
            }],
        });

        let resp = self
            .http
            .delete(self.url("/deleteFiles"))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from)?;
        Self::check(&resp, "/deleteFiles")?;
        info!(file = %file.filename, "file deleted remotely");
        Ok(())
    }

    async fn rename_file(&self, entry: &FileQueueEntry) -> anyhow::Result<()> {
        let file = &entry.file;
        let parts = paths::parse_path(&file.path);
        let body = serde_json::json!({
            "data": {
                "type": "fi",
                "dir": parts.directory,
                "device": parts.device,
                "filename": entry.old_filename.clone().unwrap_or_default(),
                "to": file.filename,
                "origin": file.origin,
                "username": self.username,
            },
        });

        let resp = self
            .http
            .post(self.url("/renameFile"))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from)?;
        Self::check(&resp, "/renameFile")?;
        info!(
            old = %entry.old_filename.as_deref().unwrap_or(""),
            new = %file.filename,
            "file renamed remotely"
        );
        Ok(())
    }

    async fn create_folder(&self, dir: &DirectoryMetadata) -> anyhow::Result<()> {
        let url = self.url(&format!(
            "/createFolder?path={}&device={}&username={}&uuid={}&folder={}",
            url_encode(&dir.path),
            url_encode(&dir.device),
            url_encode(&self.username),
            url_encode(&dir.uuid),
            url_encode(&dir.folder),
        ));
        let resp = self.http.post(&url).send().await.map_err(ApiError::from)?;
        Self::check(&resp, "/createFolder")?;
        info!(path = %dir.path, "folder created remotely");
        Ok(())
    }

    async fn delete_folder(&self, dir: &DirectoryMetadata) -> anyhow::Result<()> {
        let parts = paths::parse_path(&dir.path);
        let url = self.url(&format!(
            "/deleteFolder?path={}&folder={}&directory={}&username={}&device={}",
            url_encode(&dir.path),
            url_encode(&dir.folder),
            url_encode(&parts.directory),
            url_encode(&self.username),
            url_encode(&dir.device),
        ));
        let resp = self.http.delete(&url).send().await.map_err(ApiError::from)?;
        Self::check(&resp, "/deleteFolder")?;
        info!(path = %dir.path, "folder deleted remotely");
        Ok(())
    }

    async fn rename_folder(&self, entry: &DirQueueEntry) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "oldPath": entry.old_path.clone().unwrap_or_default(),
            "newPath": entry.dir.path,
            "username": self.username,
        });
        let resp = self
            .http
            .post(self.url("/renameFolder"))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from)?;
        Self::check(&resp, "/renameFolder")?;
        info!(
            old = %entry.old_path.as_deref().unwrap_or(""),
            new = %entry.dir.path,
            "folder renamed remotely"
        );
        Ok(())
    }
}
