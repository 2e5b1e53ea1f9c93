//! S3-compatible remote storage backend
//!
//! Works against AWS S3 or MinIO via aws-sdk-s3 with a custom endpoint.
//! Uploads are keyed by UTC date plus content hash, callers get a presigned
//! download URL, and a background sweep deletes objects older than the
//! configured TTL.
//!
//! ## Bucket layout
//! ```text
//! genmedia/
//! └── {YYYY}/{MM}/{DD}/                 # UTC date of the store call
//!     └── {prefix}_{hash16}{ext}        # e.g. genimage_a1b2c3d4e5f60718.png
//! ```

use aws_sdk_s3::{
    config::{BehaviorVersion, Builder, Credentials, Region},
    error::SdkError,
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client as S3Client,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::S3Settings;

use super::{
    content_hash, object_filename, MediaStorage, RetrievedMedia, StorageError, StorageResult,
};

/// S3/MinIO implementation of [`MediaStorage`]
#[derive(Debug)]
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    presign_ttl: Duration,
    object_ttl: Duration,
    shutdown: watch::Sender<bool>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl S3Storage {
    /// Create an S3 storage instance from settings
    ///
    /// Verifies bucket access (creating the bucket when missing) and starts
    /// the cleanup sweep. Fails with [`StorageError::Configuration`] when
    /// credentials or the endpoint are unusable; no partial backend is
    /// returned.
    pub async fn new(settings: &S3Settings) -> Result<Self, StorageError> {
        if settings.endpoint.is_empty() {
            return Err(StorageError::Configuration("S3 endpoint is required".to_string()));
        }
        if settings.access_key_id.is_empty() || settings.secret_access_key.is_empty() {
            return Err(StorageError::Configuration("S3 credentials are required".to_string()));
        }

        let endpoint = endpoint_url(&settings.endpoint, settings.use_ssl);
        debug!(endpoint = %endpoint, "creating S3 client");

        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None, // session token
            None, // expiry
            "media-vault-static-credentials",
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&endpoint)
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true) // required for MinIO-style endpoints
            .build();

        let client = S3Client::from_conf(config);

        ensure_bucket(&client, &settings.bucket).await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let sweep_task = tokio::spawn(run_sweep(
            client.clone(),
            settings.bucket.clone(),
            chrono::Duration::seconds(settings.object_ttl_secs as i64),
            Duration::from_secs(settings.cleanup_interval_secs),
            shutdown_rx,
        ));

        Ok(Self {
            client,
            bucket: settings.bucket.clone(),
            presign_ttl: Duration::from_secs(settings.presign_ttl_secs),
            object_ttl: Duration::from_secs(settings.object_ttl_secs),
            shutdown,
            sweep_task: Mutex::new(Some(sweep_task)),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait::async_trait]
impl MediaStorage for S3Storage {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn store(
        &self,
        data: &[u8],
        mime_type: &str,
        prefix: &str,
    ) -> Result<StorageResult, StorageError> {
        let hash = content_hash(data);
        let now = Utc::now();
        let object_key = date_partitioned_key(prefix, &hash, mime_type, now);
        // Advisory only: actual deletion is the sweep's job
        let object_expiry = now + chrono::Duration::seconds(self.object_ttl.as_secs() as i64);

        debug!(key = %object_key, "uploading to S3");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(data.to_vec()))
            .content_type(mime_type)
            .metadata("created-at", now.to_rfc3339())
            .metadata("expires-at", object_expiry.to_rfc3339())
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{:?}", e)))?;

        let presign = PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| StorageError::Configuration(format!("invalid presign TTL: {}", e)))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .presigned(presign)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("presigning failed: {:?}", e)))?;

        info!(key = %object_key, size = data.len(), "uploaded to S3");

        Ok(StorageResult {
            location: presigned.uri().to_string(),
            object_key,
            content_hash: hash,
            mime_type: mime_type.to_string(),
            size: data.len() as u64,
            expires_at: Some(now + chrono::Duration::seconds(self.presign_ttl.as_secs() as i64)),
        })
    }

    #[instrument(skip(self))]
    async fn retrieve(&self, object_key: &str) -> Result<RetrievedMedia, StorageError> {
        debug!(key = %object_key, "downloading from S3");

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| {
                if is_not_found_error(&e) {
                    StorageError::NotFound(object_key.to_string())
                } else {
                    StorageError::DownloadFailed(format!("{:?}", e))
                }
            })?;

        let data = result
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("failed to read body: {:?}", e)))?
            .into_bytes();

        let path = transient_download_path(object_key);
        tokio::fs::write(&path, &data).await?;

        debug!(key = %object_key, path = %path.display(), "downloaded to transient file");

        // Removed again when the caller drops the handle
        Ok(RetrievedMedia::transient(path))
    }

    #[instrument(skip(self))]
    async fn delete(&self, object_key: &str) -> Result<(), StorageError> {
        // S3 DeleteObject succeeds for absent keys, keeping deletion idempotent
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(format!("{:?}", e)))?;

        info!(key = %object_key, "deleted from S3");
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Already-closed senders just return an error we can ignore
        let _ = self.shutdown.send(true);

        if let Some(task) = self.sweep_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("cleanup sweep task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn is_remote(&self) -> bool {
        true
    }
}

/// Build a full endpoint URL, inferring TLS from an embedded scheme when
/// present and falling back to the `use_ssl` flag for bare `host:port`
fn endpoint_url(endpoint: &str, use_ssl: bool) -> String {
    if let Ok(parsed) = Url::parse(endpoint) {
        // "minio:9000" parses with scheme "minio" but no host
        if parsed.has_host() {
            return endpoint.trim_end_matches('/').to_string();
        }
    }
    let scheme = if use_ssl { "https" } else { "http" };
    format!("{}://{}", scheme, endpoint)
}

/// Date-organized object key: `YYYY/MM/DD/prefix_hash16.ext`, UTC date of
/// the store call
fn date_partitioned_key(
    prefix: &str,
    content_hash: &str,
    mime_type: &str,
    now: DateTime<Utc>,
) -> String {
    format!(
        "{}/{}",
        now.format("%Y/%m/%d"),
        object_filename(prefix, content_hash, mime_type)
    )
}

/// Unique path under the system temp directory for a retrieved object
fn transient_download_path(object_key: &str) -> PathBuf {
    let filename = object_key.rsplit('/').next().unwrap_or("object");
    std::env::temp_dir().join(format!("media-vault-{}-{}", Uuid::new_v4(), filename))
}

/// Verify the target bucket exists, creating it when missing
async fn ensure_bucket(client: &S3Client, bucket: &str) -> Result<(), StorageError> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found_error(&e) => {
            info!(bucket, "bucket does not exist, creating");
            match client.create_bucket().bucket(bucket).send().await {
                Ok(_) => {
                    info!(bucket, "bucket created");
                    Ok(())
                }
                // Another instance may have created it concurrently
                Err(e) if is_already_exists_error(&e) => Ok(()),
                Err(e) => Err(StorageError::Configuration(format!(
                    "failed to create bucket {}: {:?}",
                    bucket, e
                ))),
            }
        }
        Err(e) => Err(StorageError::Configuration(format!(
            "failed to check bucket {}: {:?}",
            bucket, e
        ))),
    }
}

/// Periodic cleanup loop owned by the backend instance
///
/// Runs until `close` sends the shutdown signal (or the backend is dropped,
/// which closes the channel). The signal is raced against the interval sleep
/// so shutdown never waits for a full tick.
async fn run_sweep(
    client: S3Client,
    bucket: String,
    object_ttl: chrono::Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(?interval, ?object_ttl, "S3 cleanup sweep started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                sweep_expired_objects(&client, &bucket, object_ttl).await;
            }
            _ = shutdown.changed() => {
                info!("S3 cleanup sweep stopped");
                return;
            }
        }
    }
}

/// One sweep tick: list the whole bucket and delete objects past their TTL
///
/// Listing and deletion failures are logged and counted, never propagated;
/// a failed page ends the tick but the next tick starts over.
async fn sweep_expired_objects(client: &S3Client, bucket: &str, object_ttl: chrono::Duration) {
    let now = Utc::now();
    let mut deleted_count = 0u64;
    let mut error_count = 0u64;
    let mut continuation_token: Option<String> = None;

    loop {
        let mut request = client.list_objects_v2().bucket(bucket);
        if let Some(token) = continuation_token.take() {
            request = request.continuation_token(token);
        }

        let page = match request.send().await {
            Ok(page) => page,
            Err(e) => {
                warn!("error listing objects during sweep: {:?}", e);
                error_count += 1;
                break;
            }
        };

        if let Some(contents) = page.contents {
            for object in contents {
                let Some(key) = object.key else { continue };
                let Some(modified) = object.last_modified.and_then(|m| to_utc(&m)) else {
                    continue;
                };

                if is_expired(modified, now, object_ttl) {
                    match client.delete_object().bucket(bucket).key(&key).send().await {
                        Ok(_) => deleted_count += 1,
                        Err(e) => {
                            warn!(key = %key, "failed to delete expired object: {:?}", e);
                            error_count += 1;
                        }
                    }
                }
            }
        }

        if page.is_truncated.unwrap_or(false) {
            continuation_token = page.next_continuation_token;
        } else {
            break;
        }
    }

    if deleted_count > 0 || error_count > 0 {
        info!(
            deleted = deleted_count,
            errors = error_count,
            "S3 cleanup sweep completed"
        );
    }
}

/// Whether an object's age strictly exceeds the TTL; age equal to the TTL
/// survives the tick
fn is_expired(last_modified: DateTime<Utc>, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
    now.signed_duration_since(last_modified) > ttl
}

fn to_utc(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Helper to check if an SDK error is a "not found" error
fn is_not_found_error<E: fmt::Debug>(err: &SdkError<E>) -> bool {
    let debug_str = format!("{:?}", err);
    debug_str.contains("NoSuchKey") || debug_str.contains("NotFound") || debug_str.contains("404")
}

/// Helper to check if creating a bucket lost a race to another creator
fn is_already_exists_error<E: fmt::Debug>(err: &SdkError<E>) -> bool {
    let debug_str = format!("{:?}", err);
    debug_str.contains("BucketAlreadyOwnedByYou") || debug_str.contains("BucketAlreadyExists")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn endpoint_scheme_wins_over_ssl_flag() {
        assert_eq!(
            endpoint_url("http://minio:9000", true),
            "http://minio:9000"
        );
        assert_eq!(
            endpoint_url("https://s3.amazonaws.com", false),
            "https://s3.amazonaws.com"
        );
    }

    #[test]
    fn bare_endpoint_uses_ssl_flag() {
        assert_eq!(endpoint_url("minio:9000", false), "http://minio:9000");
        assert_eq!(endpoint_url("minio:9000", true), "https://minio:9000");
        assert_eq!(
            endpoint_url("s3.amazonaws.com", true),
            "https://s3.amazonaws.com"
        );
    }

    #[test]
    fn object_key_is_partitioned_by_utc_date() {
        let hash = content_hash(b"hello world!");
        let when = Utc.with_ymd_and_hms(2024, 12, 23, 18, 30, 0).unwrap();

        let key = date_partitioned_key("genimage", &hash, "image/png", when);
        assert_eq!(key, format!("2024/12/23/genimage_{}.png", &hash[..16]));
    }

    #[test]
    fn object_key_zero_pads_date_segments() {
        let hash = content_hash(b"x");
        let when = Utc.with_ymd_and_hms(2025, 3, 5, 0, 0, 1).unwrap();

        let key = date_partitioned_key("genvideo", &hash, "video/mp4", when);
        assert!(key.starts_with("2025/03/05/"));
    }

    #[test]
    fn identical_content_stored_across_midnight_gets_distinct_keys() {
        let hash = content_hash(b"same bytes");
        let before = Utc.with_ymd_and_hms(2024, 12, 23, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 12, 24, 0, 0, 1).unwrap();

        let a = date_partitioned_key("genimage", &hash, "image/png", before);
        let b = date_partitioned_key("genimage", &hash, "image/png", after);
        assert_ne!(a, b);
    }

    #[test]
    fn object_past_ttl_is_expired_younger_survives() {
        let ttl = chrono::Duration::hours(24);
        let now = Utc.with_ymd_and_hms(2024, 12, 23, 12, 0, 0).unwrap();

        let stale = now - chrono::Duration::hours(25);
        assert!(is_expired(stale, now, ttl));

        let fresh = now - chrono::Duration::hours(23);
        assert!(!is_expired(fresh, now, ttl));
    }

    #[test]
    fn age_exactly_at_ttl_survives() {
        let ttl = chrono::Duration::hours(24);
        let now = Utc.with_ymd_and_hms(2024, 12, 23, 12, 0, 0).unwrap();

        let at_boundary = now - ttl;
        assert!(!is_expired(at_boundary, now, ttl));

        // One second past the boundary tips it over
        assert!(is_expired(at_boundary - chrono::Duration::seconds(1), now, ttl));
    }

    #[tokio::test]
    async fn construction_rejects_missing_credentials() {
        let settings = S3Settings {
            enabled: true,
            endpoint: "minio:9000".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: "us-east-1".to_string(),
            bucket: "genmedia".to_string(),
            use_ssl: false,
            presign_ttl_secs: 60,
            object_ttl_secs: 60,
            cleanup_interval_secs: 60,
        };

        let err = S3Storage::new(&settings).await.unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[tokio::test]
    async fn sweep_exits_promptly_on_shutdown() {
        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url("http://127.0.0.1:1")
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .force_path_style(true)
            .build();
        let client = S3Client::from_conf(config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_sweep(
            client,
            "genmedia".to_string(),
            chrono::Duration::seconds(60),
            Duration::from_secs(3600),
            shutdown_rx,
        ));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweep did not stop before the next tick")
            .unwrap();
    }

    #[test]
    fn transient_paths_are_unique_per_retrieval() {
        let a = transient_download_path("2024/12/23/genimage_abc.png");
        let b = transient_download_path("2024/12/23/genimage_abc.png");
        assert_ne!(a, b);
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("genimage_abc.png"));
    }
}
