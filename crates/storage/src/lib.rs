//! Storage abstraction and backends for Splice.
//!
//! This crate provides:
//! - `FragmentStore`: the transient staging area for in-flight fragments
//! - `ObjectStore`: the remote destination for assembled uploads
//! - Backends: local filesystem, S3-compatible, and in-memory

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{FragmentStore, ObjectStore, StagedEntry, StagedListing, StreamingUpload};

use splice_core::config::{StagingConfig, StorageConfig};
use std::sync::Arc;

/// Create the remote object store from configuration.
pub async fn object_store_from_config(
    config: &StorageConfig,
) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem {
            path,
            public_base_url,
            ..
        } => {
            let mut backend = FilesystemBackend::new(path).await?;
            if let Some(base_url) = public_base_url {
                backend = backend.with_public_base_url(base_url.clone());
            }
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            public_base_url,
            access_key_id,
            secret_access_key,
            force_path_style,
            ..
        } => {
            let mut backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            if let Some(base_url) = public_base_url {
                backend = backend.with_public_base_url(base_url.clone());
            }
            Ok(Arc::new(backend))
        }
    }
}

/// Create the staging area from configuration, creating its directory if needed.
pub async fn staging_from_config(config: &StagingConfig) -> StorageResult<Arc<dyn FragmentStore>> {
    config.validate().map_err(StorageError::Config)?;
    let backend = FilesystemBackend::new(&config.path).await?;
    Ok(Arc::new(backend))
}
