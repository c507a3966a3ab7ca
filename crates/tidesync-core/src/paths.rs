//! Path utilities shared by the scanner, reconciler, worker, and api
//!
//! All relative paths are forward-slash and rooted at `/` (the sync
//! root). Precondition violations (empty input, bare root) yield the
//! sentinel pair `("/", "/")` rather than an error; reconciliation must
//! stay total.

use crate::domain::PathDiff;

/// Device / directory split of a relative path, as the wire expects it
///
/// `/a/b/c` → device `a`, directory `/b/c`; `/a` → device `a`,
/// directory `/`; root and empty → `("/", "/")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParts {
    pub device: String,
    pub directory: String,
}

/// Device / leaf-folder split of a relative path, as the directory
/// table keys it
///
/// `/a/b/c` → device `a`, folder `c`; `/a` → device `a`, folder `a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFolder {
    pub device: String,
    pub folder: String,
}

/// Splits a path on `/`, dropping empty segments
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Splits a relative path into the wire's `device` / `directory` pair
pub fn parse_path(path: &str) -> PathParts {
    let segments = split_segments(path);
    let Some((device, rest)) = segments.split_first() else {
        return PathParts {
            device: "/".to_string(),
            directory: "/".to_string(),
        };
    };

    let directory = if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rest.join("/"))
    };

    PathParts {
        device: device.to_string(),
        directory,
    }
}

/// Splits a relative path into the directory table's `device` / `folder`
/// pair (first segment, leaf segment)
pub fn folder_device(path: &str) -> DeviceFolder {
    let segments = split_segments(path);
    let device = segments.first().map_or("/", |s| *s).to_string();
    let folder = segments.last().map_or("/", |s| *s).to_string();
    DeviceFolder { device, folder }
}

/// Compound lookup key for a file: containing directory + `/` + filename
///
/// The directory is normalized to end with exactly one slash, so
/// `"/a" + "b.txt"` and `"/a/" + "b.txt"` key identically.
pub fn path_key(dir: &str, filename: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{filename}")
    } else {
        format!("{dir}/{filename}")
    }
}

/// Strips a trailing slash from a directory path, preserving the root
pub fn normalize_dir(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

/// Concatenates the sync root and a relative path into an absolute path
pub fn join_abs(sync_root: &str, rel_path: &str) -> String {
    if rel_path == "/" || rel_path.is_empty() {
        sync_root.to_string()
    } else {
        format!("{sync_root}{rel_path}")
    }
}

/// Finds the first segment where two paths diverge
///
/// Returns `None` when the paths are segment-for-segment identical;
/// otherwise the index of the first difference plus the differing
/// segments (either side absent when one path is a prefix of the other).
pub fn path_diff(old_path: &str, new_path: &str) -> Option<PathDiff> {
    let old_segs = split_segments(old_path);
    let new_segs = split_segments(new_path);

    let len = old_segs.len().min(new_segs.len());
    let mut idx = 0;
    while idx < len && old_segs[idx] == new_segs[idx] {
        idx += 1;
    }

    if idx == len && old_segs.len() == new_segs.len() {
        return None;
    }

    Some(PathDiff {
        depth: idx,
        old_segment: old_segs.get(idx).map(|s| s.to_string()),
        new_segment: new_segs.get(idx).map(|s| s.to_string()),
    })
}
