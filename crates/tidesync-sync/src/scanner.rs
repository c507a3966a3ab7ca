//! Startup filesystem scanner
//!
//! Walks the sync root recursively and produces a [`ScanResult`]: every
//! regular file with its relative path, inode, size, mtime, and SHA-256
//! content hash, plus every directory. The scan is best-effort: an entry
//! that cannot be read is logged and skipped, and the walk itself never
//! fails once the root exists.
//!
//! Relative paths are forward-slash and rooted at `/`. For a file the
//! relative path is its *containing directory*; for a directory it is
//! the directory itself.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::warn;

use tidesync_core::domain::{ScanResult, ScannedDirectory, ScannedFile};

/// Recursive walker over the configured sync root
#[derive(Debug, Clone)]
pub struct Scanner {
    sync_root: PathBuf,
}

impl Scanner {
    pub fn new(sync_root: impl Into<PathBuf>) -> Self {
        Self {
            sync_root: sync_root.into(),
        }
    }

    /// The configured sync root
    pub fn sync_root(&self) -> &Path {
        &self.sync_root
    }

    /// Maps an absolute path to its sync-relative form, treating the
    /// path as the object itself (directory semantics)
    ///
    /// Does not touch the filesystem, so it also works for paths that
    /// no longer exist.
    pub fn relative_of(&self, abs: &Path) -> String {
        let rel = abs.strip_prefix(&self.sync_root).unwrap_or(abs);
        let mut out = String::new();
        for component in rel.components() {
            if let std::path::Component::Normal(part) = component {
                out.push('/');
                out.push_str(&part.to_string_lossy());
            }
        }
        if out.is_empty() {
            "/".to_string()
        } else {
            out
        }
    }

    /// Maps an absolute path to the relative path the data model wants:
    /// the containing directory for files, the path itself for directories
    pub fn to_relative_path(&self, abs: &Path) -> String {
        if abs.is_dir() {
            self.relative_of(abs)
        } else {
            self.relative_of(abs.parent().unwrap_or(abs))
        }
    }

    /// Stable filesystem identifier for rename detection
    ///
    /// The inode number on unix. On other platforms an empty string is
    /// returned and rename detection degrades to delete + add.
    pub fn inode(abs: &Path) -> String {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            match std::fs::metadata(abs) {
                Ok(meta) => meta.ino().to_string(),
                Err(_) => String::new(),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = abs;
            String::new()
        }
    }

    /// Lowercase hex SHA-256 of the file's bytes
    pub fn hash_file(abs: &Path) -> io::Result<String> {
        let mut file = std::fs::File::open(abs)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Modification time as whole seconds since the unix epoch
    pub fn mtime_secs(abs: &Path) -> io::Result<i64> {
        let modified = std::fs::metadata(abs)?.modified()?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0))
    }

    /// Walks the sync root and collects every readable file and directory
    pub fn scan(&self) -> ScanResult {
        let mut result = ScanResult::default();
        if !self.sync_root.exists() {
            warn!(root = %self.sync_root.display(), "sync root does not exist, empty scan");
            return result;
        }

        let mut stack = vec![self.sync_root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                let abs = entry.path();
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => {
                        if let Some(scanned) = self.scan_directory(&abs) {
                            result.directories.push(scanned);
                        }
                        stack.push(abs);
                    }
                    Ok(ft) if ft.is_file() => {
                        if let Some(scanned) = self.scan_file(&abs) {
                            result.files.push(scanned);
                        }
                    }
                    // Symlinks and specials are not synchronized.
                    Ok(_) => {}
                    Err(e) => {
                        warn!(path = %abs.display(), error = %e, "skipping entry without file type");
                    }
                }
            }
        }

        tracing::info!(
            files = result.files.len(),
            directories = result.directories.len(),
            "scan complete"
        );
        result
    }

    fn scan_file(&self, abs: &Path) -> Option<ScannedFile> {
        let meta = std::fs::metadata(abs)
            .map_err(|e| warn!(path = %abs.display(), error = %e, "skipping unreadable file"))
            .ok()?;
        let hash = Self::hash_file(abs)
            .map_err(|e| warn!(path = %abs.display(), error = %e, "skipping unhashable file"))
            .ok()?;

        Some(ScannedFile {
            path: self.to_relative_path(abs),
            filename: abs
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            abs_path: abs.to_string_lossy().into_owned(),
            inode: Self::inode(abs),
            hash,
            size: meta.len() as i64,
            mtime: Self::mtime_secs(abs).unwrap_or(0),
        })
    }

    fn scan_directory(&self, abs: &Path) -> Option<ScannedDirectory> {
        Some(ScannedDirectory {
            path: self.relative_of(abs),
            name: abs
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            abs_path: abs.to_string_lossy().into_owned(),
            inode: Self::inode(abs),
            mtime: Self::mtime_secs(abs).unwrap_or(0),
        })
    }
}
