//! Domain entities for the sync engine
//!
//! The canonical tables (`FileMetadata`, `DirectoryMetadata`) describe what
//! the client believes the cloud holds. The queue entries wrap a canonical
//! record with a pending [`SyncStatus`] and the pre-rename location. Cloud
//! DTOs and scan DTOs are kept separate so the reconciler's inputs stay
//! independent of both the wire format and the filesystem walk.

pub mod cloud;
pub mod metadata;
pub mod plan;
pub mod scan;

pub use cloud::{CloudFile, CloudFolder, CloudMetadata};
pub use metadata::{
    DirQueueEntry, DirectoryMetadata, FileMetadata, FileQueueEntry, SyncStatus, UnknownStatus,
};
pub use plan::{
    FileRename, FolderCreate, FolderDelete, PathDiff, ReconciliationResult, RenameInfo,
};
pub use scan::{ScanResult, ScannedDirectory, ScannedFile};
