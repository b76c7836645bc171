//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

/// Transient staging area for fragments and combined artifacts.
///
/// Keys are flat names produced by `splice_core::upload`; backends must not
/// allow a key to address anything outside their own root.
#[async_trait]
pub trait FragmentStore: Send + Sync + 'static {
    /// Store an entry, replacing any previous entry at `key`.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Get an entry's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Check if an entry exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete an entry.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Start a streaming write. The entry only becomes visible at `key` once
    /// the upload is finished.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// List entries last modified strictly before `cutoff`.
    ///
    /// Entries whose metadata cannot be read are skipped and counted in
    /// [`StagedListing::skipped`] rather than failing the whole listing.
    async fn list_older_than(&self, cutoff: OffsetDateTime) -> StorageResult<StagedListing>;

    /// Get the name of this backend, used for logging and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the staging area is usable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Remote destination for assembled uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object and return its public location.
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str)
    -> StorageResult<String>;

    /// Public location of `key`, whether or not it exists yet.
    fn location(&self, key: &str) -> String;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup so configuration errors surface before the
    /// server accepts requests. The default implementation returns Ok(()).
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// A staging entry reported by [`FragmentStore::list_older_than`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: OffsetDateTime,
}

/// Result of a staging listing.
#[derive(Clone, Debug, Default)]
pub struct StagedListing {
    pub entries: Vec<StagedEntry>,
    /// Entries that could not be inspected.
    pub skipped: u64,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
