//! Filesystem scan DTOs produced by the scanner

/// A regular file found during a scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedFile {
    /// Containing-directory path relative to the sync root (e.g. "/foo")
    pub path: String,
    pub filename: String,
    pub abs_path: String,
    pub inode: String,
    /// Lowercase hex SHA-256 of the file bytes
    pub hash: String,
    pub size: i64,
    /// Seconds since epoch, UTC
    pub mtime: i64,
}

/// A directory found during a scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedDirectory {
    /// The directory's own path relative to the sync root
    pub path: String,
    pub name: String,
    pub abs_path: String,
    pub inode: String,
    pub mtime: i64,
}

/// Everything a recursive walk of the sync root produced
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub files: Vec<ScannedFile>,
    pub directories: Vec<ScannedDirectory>,
}
