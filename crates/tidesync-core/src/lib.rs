//! TideSync Core - Domain model and ports
//!
//! Provides:
//! - Canonical and queue entity types shared by every crate
//! - Path utilities (device/folder parsing, path keys, prefix diffs)
//! - Typed configuration loaded from YAML
//! - The `CloudApi` port consumed by the reconciler and the main loop

pub mod config;
pub mod domain;
pub mod paths;
pub mod ports;
