//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum size of a single fragment payload in bytes.
    #[serde(default = "default_max_fragment_size")]
    pub max_fragment_size: u64,
    /// Maximum number of fragments a single upload may declare.
    #[serde(default = "default_max_total_chunks")]
    pub max_total_chunks: u32,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// When enabled, restrict this endpoint to the scraper at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_fragment_size() -> u64 {
    crate::DEFAULT_MAX_FRAGMENT_SIZE
}

fn default_max_total_chunks() -> u32 {
    crate::DEFAULT_MAX_TOTAL_CHUNKS
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_fragment_size: default_max_fragment_size(),
            max_total_chunks: default_max_total_chunks(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_fragment_size == 0 {
            return Err("server.max_fragment_size must be greater than 0".to_string());
        }
        if usize::try_from(self.max_fragment_size).is_err() {
            return Err(format!(
                "server.max_fragment_size {} exceeds platform address space",
                self.max_fragment_size
            ));
        }
        if self.max_total_chunks == 0 {
            return Err("server.max_total_chunks must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Transient staging area for in-flight fragments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory holding fragments and combined artifacts.
    #[serde(default = "default_staging_path")]
    pub path: PathBuf,
    /// Entries older than this are removed by the sweep (default: 1 hour).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Interval between sweeps (default: 1 hour).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_staging_path() -> PathBuf {
    std::env::temp_dir().join("upload-chunks")
}

fn default_retention_secs() -> u64 {
    crate::DEFAULT_RETENTION_SECS
}

fn default_sweep_interval_secs() -> u64 {
    crate::DEFAULT_SWEEP_INTERVAL_SECS
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            path: default_staging_path(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl StagingConfig {
    /// Get the retention window as a Duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Get the sweep interval as a Duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retention_secs == 0 {
            return Err("staging.retention_secs must be greater than 0".to_string());
        }
        // tokio::time::interval panics on a zero period
        if self.sweep_interval_secs == 0 {
            return Err("staging.sweep_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Remote object store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage (development and tests).
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
        /// Prefix for assembled object keys.
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
        /// Base URL under which `path` is served, if any.
        #[serde(default)]
        public_base_url: Option<String>,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Prefix for assembled object keys.
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
        /// Base URL for returned locations (e.g. a CDN in front of the bucket).
        #[serde(default)]
        public_base_url: Option<String>,
        /// AWS access key ID. Falls back to the ambient AWS credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient AWS credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

fn default_key_prefix() -> String {
    crate::upload::DEFAULT_KEY_PREFIX.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/objects"),
            key_prefix: default_key_prefix(),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    /// Prefix applied to assembled object keys.
    pub fn key_prefix(&self) -> &str {
        match self {
            StorageConfig::Filesystem { key_prefix, .. } | StorageConfig::S3 { key_prefix, .. } => {
                key_prefix
            }
        }
    }

    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Transient staging configuration.
    #[serde(default)]
    pub staging: StagingConfig,
    /// Remote object store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Create a test configuration rooted in `dir`.
    ///
    /// **For testing only.** Uses filesystem staging and filesystem object storage.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            server: ServerConfig::default(),
            staging: StagingConfig {
                path: dir.join("staging"),
                ..Default::default()
            },
            storage: StorageConfig::Filesystem {
                path: dir.join("objects"),
                key_prefix: default_key_prefix(),
                public_base_url: Some("http://localhost:8080/files".to_string()),
            },
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> crate::Result<()> {
        self.server
            .validate()
            .and_then(|_| self.staging.validate())
            .and_then(|_| self.storage.validate())
            .map_err(crate::Error::Config)
    }
}
