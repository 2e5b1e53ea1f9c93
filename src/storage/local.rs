//! Local filesystem storage backend
//!
//! Writes content-addressed files into a single base directory. Used in
//! local workflows where callers read results straight off disk, so
//! `location` is the absolute file path and nothing ever expires.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::{
    content_hash, object_filename, MediaStorage, RetrievedMedia, StorageError, StorageResult,
};

/// Filesystem-backed implementation of [`MediaStorage`]
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Create a local storage instance rooted at `base_dir`
    ///
    /// The directory is created if missing and resolved to an absolute path
    /// so returned locations are usable from any working directory.
    pub async fn new(base_dir: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(base_dir)
            .await
            .map_err(|e| StorageError::Configuration(format!("cannot create {}: {}", base_dir.display(), e)))?;
        let base_dir = tokio::fs::canonicalize(base_dir)
            .await
            .map_err(|e| StorageError::Configuration(format!("cannot resolve {}: {}", base_dir.display(), e)))?;
        Ok(Self { base_dir })
    }
}

#[async_trait]
impl MediaStorage for LocalStorage {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn store(
        &self,
        data: &[u8],
        mime_type: &str,
        prefix: &str,
    ) -> Result<StorageResult, StorageError> {
        let hash = content_hash(data);
        let filename = object_filename(prefix, &hash, mime_type);
        let output_path = self.base_dir.join(&filename);

        tokio::fs::write(&output_path, data).await?;
        debug!(path = %output_path.display(), "wrote media file");

        Ok(StorageResult {
            location: output_path.to_string_lossy().into_owned(),
            object_key: filename,
            content_hash: hash,
            mime_type: mime_type.to_string(),
            size: data.len() as u64,
            expires_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn retrieve(&self, object_key: &str) -> Result<RetrievedMedia, StorageError> {
        let path = self.base_dir.join(object_key);
        match tokio::fs::metadata(&path).await {
            // Nothing to release: the file stays where it is
            Ok(_) => Ok(RetrievedMedia::persistent(path)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(object_key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, object_key: &str) -> Result<(), StorageError> {
        let path = self.base_dir.join(object_key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Deleting an absent key stays idempotent
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn close(&self) -> Result<(), StorageError> {
        // No background resources to release
        Ok(())
    }

    fn is_remote(&self) -> bool {
        false
    }
}
