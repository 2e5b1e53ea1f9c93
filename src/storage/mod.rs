//! Storage module for generated media
//!
//! Provides a pluggable backend contract with two implementations: local
//! filesystem storage and S3-compatible remote storage with presigned URL
//! delivery and TTL-based cleanup. Object names are content-addressed so
//! storing identical bytes twice yields the same key.

mod local;
mod resolver;
mod s3;

pub use local::LocalStorage;
pub use resolver::resolve_input_path;
pub use s3::S3Storage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::StorageSettings;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid storage configuration: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for the missing-object/missing-path condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result of a successful store operation
#[derive(Debug, Clone, Serialize)]
pub struct StorageResult {
    /// Access string handed back to the caller: absolute path for local
    /// storage, presigned URL for remote storage
    pub location: String,

    /// Stable backend identifier usable for later retrieve/delete
    /// (e.g. "2024/12/23/genimage_abc123def4567890.png")
    pub object_key: String,

    /// Hex-encoded SHA-256 of the stored bytes
    pub content_hash: String,

    pub mime_type: String,

    /// Content size in bytes
    pub size: u64,

    /// Presigned URL expiry; `None` for local storage. Object deletion is
    /// governed separately by the object TTL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A stored object resolved back to a local file
///
/// Remote retrievals download into a transient file that is removed when
/// this value is dropped, so the file stays valid for exactly the caller's
/// scope. Local paths are left untouched on drop.
#[derive(Debug)]
pub struct RetrievedMedia {
    path: PathBuf,
    transient: bool,
}

impl RetrievedMedia {
    pub(crate) fn persistent(path: PathBuf) -> Self {
        Self {
            path,
            transient: false,
        }
    }

    pub(crate) fn transient(path: PathBuf) -> Self {
        Self {
            path,
            transient: true,
        }
    }

    /// Local path to the media, valid until this value is dropped
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RetrievedMedia {
    fn drop(&mut self) {
        if self.transient {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Contract for storing generated media
///
/// Operations are safe to call concurrently; backends keep no mutable state
/// beyond their client handle and configuration.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Save content and return the storage result
    ///
    /// * `data` - the raw bytes to store
    /// * `mime_type` - content type (e.g. "image/png", "video/mp4")
    /// * `prefix` - filename prefix (e.g. "genimage", "genvideo")
    async fn store(
        &self,
        data: &[u8],
        mime_type: &str,
        prefix: &str,
    ) -> Result<StorageResult, StorageError>;

    /// Fetch a stored object back to a local file for reuse as input
    async fn retrieve(&self, object_key: &str) -> Result<RetrievedMedia, StorageError>;

    /// Remove an object by its key; deleting an absent key is not an error
    async fn delete(&self, object_key: &str) -> Result<(), StorageError>;

    /// Release backend resources (stops the cleanup sweep); idempotent
    async fn close(&self) -> Result<(), StorageError>;

    /// True if storage is remote (S3), false for local
    fn is_remote(&self) -> bool;
}

/// Hex-encoded SHA-256 of the content
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// File extension for a given MIME type; unknown types get no extension
pub fn extension_from_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "application/json" => ".json",
        _ => "",
    }
}

/// Deterministic filename: `<prefix>_<first 16 hash chars><ext>`
pub(crate) fn object_filename(prefix: &str, content_hash: &str, mime_type: &str) -> String {
    format!(
        "{}_{}{}",
        prefix,
        &content_hash[..16],
        extension_from_mime(mime_type)
    )
}

/// Create the storage backend selected by configuration
///
/// Picks the S3 backend when one is configured and enabled, otherwise local
/// filesystem storage under `output_dir`. Construction failures surface as
/// [`StorageError::Configuration`]; no partial backend is returned.
pub async fn new_storage(
    settings: &StorageSettings,
) -> Result<Arc<dyn MediaStorage>, StorageError> {
    if let Some(s3) = settings.s3.as_ref().filter(|_| settings.s3_enabled()) {
        info!(
            endpoint = %s3.endpoint,
            bucket = %s3.bucket,
            "initializing S3 storage"
        );
        return Ok(Arc::new(S3Storage::new(s3).await?));
    }

    info!(dir = %settings.output_dir.display(), "initializing local storage");
    Ok(Arc::new(LocalStorage::new(&settings.output_dir).await?))
}
