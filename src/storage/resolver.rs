//! Input path resolution
//!
//! Handlers that re-consume previously generated media receive an arbitrary
//! identifier from their caller: an absolute local path, a storage object
//! key, or (legacy local-only workflows) a relative path. This resolves any
//! of those to a local file valid for the caller's scope.

use std::path::Path;
use tracing::{debug, instrument};

use super::{MediaStorage, RetrievedMedia, StorageError};

/// Resolve a caller-supplied identifier to a local file
///
/// Resolution order:
/// 1. An absolute path is used directly when the file exists, and fails as
///    not-found otherwise; it is never reinterpreted as an object key.
/// 2. Anything else is retrieved from the configured backend.
/// 3. With local storage only, a failed retrieval falls back to treating the
///    identifier as a relative filesystem path. An unresolved remote key is
///    a hard failure.
///
/// The returned handle removes any transient download when dropped.
#[instrument(skip(storage))]
pub async fn resolve_input_path(
    storage: &dyn MediaStorage,
    input: &str,
) -> Result<RetrievedMedia, StorageError> {
    let candidate = Path::new(input);

    if candidate.is_absolute() {
        if tokio::fs::metadata(candidate).await.is_ok() {
            debug!(path = %input, "using absolute local path");
            return Ok(RetrievedMedia::persistent(candidate.to_path_buf()));
        }
        return Err(StorageError::NotFound(input.to_string()));
    }

    if storage.is_remote() {
        return storage.retrieve(input).await;
    }

    match storage.retrieve(input).await {
        Ok(media) => Ok(media),
        Err(_) => {
            // Legacy workflows pass paths relative to the working directory
            if tokio::fs::metadata(candidate).await.is_ok() {
                debug!(path = %input, "using relative local path");
                Ok(RetrievedMedia::persistent(candidate.to_path_buf()))
            } else {
                Err(StorageError::NotFound(input.to_string()))
            }
        }
    }
}
