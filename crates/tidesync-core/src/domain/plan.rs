//! Reconciliation plan types
//!
//! [`ReconciliationResult`] is the output of the three-way reconcile:
//! every cloud file and folder classified into the action the client
//! should take. The plan is data; executing it (downloads, local folder
//! creation) happens in the main loop.

use super::cloud::CloudFile;
use super::metadata::FileMetadata;

/// A folder that exists in the cloud but not locally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderCreate {
    pub abs_path: String,
    pub path: String,
    pub folder: String,
    pub uuid: String,
    pub device: String,
    pub created_at: String,
}

/// A folder that exists locally but is gone from the cloud
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderDelete {
    pub abs_path: String,
    pub path: String,
    pub folder: String,
}

/// A file the cloud renamed: the local row to move and its cloud target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRename {
    pub local: FileMetadata,
    pub cloud: CloudFile,
}

/// Planned actions from one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub files_to_download: Vec<CloudFile>,
    pub files_to_update: Vec<CloudFile>,
    pub files_in_conflict: Vec<CloudFile>,
    pub files_to_delete_local: Vec<FileMetadata>,
    pub files_to_rename: Vec<FileRename>,
    pub folders_to_create_local: Vec<FolderCreate>,
    pub folders_to_delete_local: Vec<FolderDelete>,
}

impl ReconciliationResult {
    /// True when the pass produced no planned actions at all
    pub fn is_empty(&self) -> bool {
        self.files_to_download.is_empty()
            && self.files_to_update.is_empty()
            && self.files_in_conflict.is_empty()
            && self.files_to_delete_local.is_empty()
            && self.files_to_rename.is_empty()
            && self.folders_to_create_local.is_empty()
            && self.folders_to_delete_local.is_empty()
    }
}

/// First point where two paths diverge
///
/// `depth` is the index of the first differing segment; either side may
/// be `None` when one path is a strict prefix of the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathDiff {
    pub depth: usize,
    pub old_segment: Option<String>,
    pub new_segment: Option<String>,
}

/// A directory rename inferred from inode-matched queue entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameInfo {
    pub inode: String,
    pub uuid: String,
    pub device: String,
    pub folder: String,
    pub created_at: String,
    pub depth: usize,
    pub old_segment: Option<String>,
    pub new_segment: Option<String>,
    pub old_path: String,
    pub new_path: String,
}
