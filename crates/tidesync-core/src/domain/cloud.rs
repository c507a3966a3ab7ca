//! Cloud-side DTOs
//!
//! These mirror what `/getSyncItems` reports, after the api crate has
//! derived the logical `path` from the wire's `device` / `directory`
//! pair. They are inputs to the reconciler only; nothing in the core
//! persists them directly.

/// A file as the cloud reports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudFile {
    pub uuid: String,
    /// Logical containing-directory path, rooted at "/"
    pub path: String,
    pub filename: String,
    pub last_modified: String,
    pub hashvalue: String,
    pub size: i64,
    pub origin: String,
    pub versions: i32,
    pub conflict_id: Option<String>,
}

/// A folder as the cloud reports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudFolder {
    pub uuid: String,
    pub device: String,
    pub folder: String,
    pub path: String,
    pub created_at: String,
}

/// Full metadata snapshot returned by `/getSyncItems`
#[derive(Debug, Clone, Default)]
pub struct CloudMetadata {
    pub files: Vec<CloudFile>,
    pub directories: Vec<CloudFolder>,
}
