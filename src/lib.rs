//! Media Vault
//!
//! Content-addressed storage for machine-generated binary media (images,
//! video). Generation pipelines hand raw bytes to the active backend and get
//! back a stable object key plus an access location: an absolute filesystem
//! path for the local backend, or a time-limited presigned URL for the
//! S3-compatible remote backend. Previously stored artifacts can be resolved
//! back to a local file for reuse as input to later operations.
//!
//! The backend is selected by an explicit factory from validated
//! configuration; the remote backend owns a background sweep task that
//! deletes objects past their configured TTL.

pub mod config;
pub mod storage;

pub use crate::config::{S3Settings, Settings, StorageSettings};
pub use crate::storage::{
    new_storage, resolve_input_path, LocalStorage, MediaStorage, RetrievedMedia, S3Storage,
    StorageError, StorageResult,
};
