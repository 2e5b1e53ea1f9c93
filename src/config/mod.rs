//! Configuration module for the media vault

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Main application settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub storage: StorageSettings,
}

/// Storage backend configuration
///
/// The backend factory picks S3 when a `[storage.s3]` section is present and
/// enabled; otherwise media is written under `output_dir` on the local
/// filesystem.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Base directory for the local backend
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// S3-compatible remote backend, used when configured and enabled
    pub s3: Option<S3Settings>,
}

/// S3/MinIO remote backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Endpoint, with or without scheme (e.g. "minio:9000" or "https://s3.amazonaws.com")
    pub endpoint: String,

    pub access_key_id: String,
    pub secret_access_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Used only when the endpoint carries no scheme of its own
    #[serde(default = "default_true")]
    pub use_ssl: bool,

    /// How long presigned download URLs remain valid
    #[serde(default = "default_day_secs")]
    pub presign_ttl_secs: u64,

    /// How long objects live before the sweep deletes them
    #[serde(default = "default_day_secs")]
    pub object_ttl_secs: u64,

    /// How often the background sweep runs
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/tmp/media-vault")
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket() -> String {
    "genmedia".to_string()
}

fn default_day_secs() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_secs() -> u64 {
    60 * 60
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables (prefixed with MEDIAVAULT_)
    /// 2. config/local.toml (gitignored)
    /// 3. config/default.toml
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local overrides (gitignored)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment variables (MEDIAVAULT_STORAGE__OUTPUT_DIR, etc.)
            .add_source(
                Environment::with_prefix("MEDIAVAULT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            storage: StorageSettings {
                output_dir: default_output_dir(),
                s3: None,
            },
        }
    }
}

impl StorageSettings {
    /// Whether the factory should build the remote backend
    pub fn s3_enabled(&self) -> bool {
        self.s3.as_ref().map(|s| s.enabled).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_use_local_backend() {
        let settings = Settings::default();
        assert!(!settings.storage.s3_enabled());
        assert_eq!(
            settings.storage.output_dir,
            PathBuf::from("/tmp/media-vault")
        );
    }

    #[test]
    fn s3_section_defaults() {
        let s3: S3Settings = serde_json::from_value(serde_json::json!({
            "endpoint": "minio:9000",
            "access_key_id": "minioadmin",
            "secret_access_key": "minioadmin",
        }))
        .unwrap();

        assert!(s3.enabled);
        assert!(s3.use_ssl);
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(s3.bucket, "genmedia");
        assert_eq!(s3.presign_ttl_secs, 86_400);
        assert_eq!(s3.object_ttl_secs, 86_400);
        assert_eq!(s3.cleanup_interval_secs, 3_600);
    }
}
