//! HTTP client for ZimaOS storage appliances.
//!
//! Covers the endpoints the migration engine needs: login (with the
//! token-shape zoo older firmware ships), folder creation, streamed
//! multipart uploads with progress and cancellation, directory-listing
//! metadata lookups, ranged downloads for verification, and the storage
//! device list.

mod client;
mod types;

use std::sync::Arc;

pub use client::{ZimaClient, DEFAULT_UPLOAD_CHUNK_SIZE};
pub use types::{FileListResponse, FileMetadata, LoginResponse, StorageDevice, TokenField};

/// Callback receiving byte deltas as they leave the upload producer.
///
/// Invoked from the request body's execution context, so it must be
/// cheap and thread-safe.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Errors from appliance operations.
#[derive(Debug, thiserror::Error)]
pub enum ApplianceError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connection failed: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("upload failed with status {status}: {body}")]
    UploadFailed { status: u16, body: String },

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("remote file not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parent of a `/`-separated remote path (`/` for top-level entries).
pub fn remote_parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &trimmed[..i],
    }
}

/// Final component of a `/`-separated remote path.
pub fn remote_file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
