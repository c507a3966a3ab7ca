//! Canonical and queue entity types
//!
//! A queue entry is a canonical record plus pending-work fields, modelled
//! by composition: [`FileQueueEntry`] *contains* a [`FileMetadata`] rather
//! than extending it. The store persists both sides in separate tables and
//! relates them only through `dir_id` / `uuid`, never through references.

use serde::{Deserialize, Serialize};

// ============================================================================
// SyncStatus
// ============================================================================

/// Pending-work state of a queue entry
///
/// Persisted as TEXT in the queue tables. `FileLinked` marks a directory
/// synthesised purely so that a file added under an unknown parent has a
/// valid `dir_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    New,
    Modified,
    Delete,
    Rename,
    FileLinked,
}

/// Error returned when parsing an unrecognized status string from storage
#[derive(Debug, thiserror::Error)]
#[error("unknown sync status: {0}")]
pub struct UnknownStatus(pub String);

impl SyncStatus {
    /// Storage representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::New => "new",
            SyncStatus::Modified => "modified",
            SyncStatus::Delete => "delete",
            SyncStatus::Rename => "rename",
            SyncStatus::FileLinked => "FILE_LINKED",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(SyncStatus::New),
            "modified" => Ok(SyncStatus::Modified),
            "delete" => Ok(SyncStatus::Delete),
            "rename" => Ok(SyncStatus::Rename),
            "FILE_LINKED" => Ok(SyncStatus::FileLinked),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Canonical entities
// ============================================================================

/// Canonical file record
///
/// Primary key is `(path, filename)`; `origin` is the server-assigned
/// durable identity, unique across the table and immutable for the life of
/// the file: a rename changes `(path, filename)` but never `origin`.
/// `last_modified` is kept as a seconds-since-epoch string for schema
/// compatibility with the cloud service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    pub uuid: String,
    /// Containing directory, forward-slash, rooted at "/" (e.g. "/a/b")
    pub path: String,
    pub filename: String,
    pub last_modified: String,
    /// Lowercase hex SHA-256 of the file bytes
    pub hashvalue: String,
    pub size: i64,
    /// References `DirectoryMetadata::uuid`
    pub dir_id: String,
    /// Opaque stable filesystem identifier, used for rename detection
    pub inode: String,
    pub abs_path: String,
    pub versions: i32,
    pub origin: String,
    /// Hash last acknowledged by the cloud; diverges from `hashvalue`
    /// while a local edit is pending
    pub last_synced_hashvalue: String,
    pub conflict_id: Option<String>,
}

/// Canonical directory record
///
/// Primary key is `(device, folder, path)`; `uuid` is unique. `device` is
/// the first segment of `path`, `folder` the leaf name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryMetadata {
    pub uuid: String,
    pub device: String,
    pub folder: String,
    /// The directory itself, forward-slash, rooted at "/"
    pub path: String,
    pub created_at: String,
    pub abs_path: String,
    pub inode: String,
}

// ============================================================================
// Queue entries
// ============================================================================

/// Pending file work: a canonical record plus its queued status
///
/// `old_path` / `old_filename` carry the pre-rename location and are only
/// meaningful for `Rename` entries (the offline reconciler also records
/// them on `New` entries, mirroring what the cloud expects on upload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQueueEntry {
    pub file: FileMetadata,
    pub status: SyncStatus,
    pub old_path: Option<String>,
    pub old_filename: Option<String>,
}

impl FileQueueEntry {
    /// Wraps a canonical record with a queued status
    pub fn with_status(file: FileMetadata, status: SyncStatus) -> Self {
        Self {
            file,
            status,
            old_path: None,
            old_filename: None,
        }
    }
}

/// Pending directory work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirQueueEntry {
    pub dir: DirectoryMetadata,
    pub status: SyncStatus,
    pub old_path: Option<String>,
}

impl DirQueueEntry {
    pub fn with_status(dir: DirectoryMetadata, status: SyncStatus) -> Self {
        Self {
            dir,
            status,
            old_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in [
            SyncStatus::New,
            SyncStatus::Modified,
            SyncStatus::Delete,
            SyncStatus::Rename,
            SyncStatus::FileLinked,
        ] {
            let parsed: SyncStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_rejects_unknown_string() {
        assert!("uploaded".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_file_linked_uses_legacy_storage_form() {
        assert_eq!(SyncStatus::FileLinked.as_str(), "FILE_LINKED");
    }

    #[test]
    fn test_queue_entry_wraps_metadata() {
        let file = FileMetadata {
            filename: "a.txt".into(),
            path: "/dev".into(),
            ..Default::default()
        };
        let entry = FileQueueEntry::with_status(file.clone(), SyncStatus::New);
        assert_eq!(entry.file, file);
        assert_eq!(entry.status, SyncStatus::New);
        assert!(entry.old_path.is_none());
    }
}
