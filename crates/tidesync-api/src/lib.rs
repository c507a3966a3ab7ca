//! TideSync Api - Remote service client
//!
//! Implements the [`CloudApi`](tidesync_core::ports::CloudApi) port over
//! HTTP: metadata fetch plus one verb per planned sync action. All calls
//! carry the configured user identity; failures come back as an
//! [`ApiError`] kind, and the caller's policy is always the same: log,
//! skip, retry on the next cycle.

pub mod client;
pub mod encode;

pub use client::ApiClient;
pub use encode::url_encode;

/// Errors surfaced by the remote client
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered outside the 2xx range
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: &'static str, status: u16 },

    /// A response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Local file I/O during an upload or download failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
