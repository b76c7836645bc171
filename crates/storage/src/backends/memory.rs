//! In-memory storage backend.
//!
//! Used by tests and local experiments. Modification times can be set
//! explicitly so retention logic is testable without waiting, and failures
//! can be injected per operation.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    FragmentStore, ObjectStore, StagedEntry, StagedListing, StreamingUpload,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;

#[derive(Clone, Debug)]
struct Entry {
    data: Bytes,
    last_modified: OffsetDateTime,
    content_type: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<BTreeMap<String, Entry>>,
    object_puts: AtomicU64,
    fail_puts: AtomicBool,
    fail_object_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        // A panic while holding the lock cannot leave a half-written entry
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, key: &str, data: Bytes, content_type: Option<String>) {
        self.entries().insert(
            key.to_string(),
            Entry {
                data,
                last_modified: OffsetDateTime::now_utc(),
                content_type,
            },
        );
    }
}

/// In-memory store implementing both [`FragmentStore`] and [`ObjectStore`].
///
/// Clones share the same contents.
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
    base_url: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            base_url: "memory://objects".to_string(),
        }
    }

    /// Override the modification time of an entry. Returns false if absent.
    pub fn set_last_modified(&self, key: &str, at: OffsetDateTime) -> bool {
        match self.inner.entries().get_mut(key) {
            Some(entry) => {
                entry.last_modified = at;
                true
            }
            None => false,
        }
    }

    /// Make every subsequent staging write fail, both `put` and `put_stream`.
    pub fn fail_puts(&self, fail: bool) {
        self.inner.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `put_object` fail.
    pub fn fail_object_puts(&self, fail: bool) {
        self.inner.fail_object_puts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent delete fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.inner.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `put_object` calls.
    pub fn object_put_count(&self) -> u64 {
        self.inner.object_puts.load(Ordering::SeqCst)
    }

    /// All keys currently stored, in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries().keys().cloned().collect()
    }

    /// Content and content type of an entry.
    pub fn entry(&self, key: &str) -> Option<(Bytes, Option<String>)> {
        self.inner
            .entries()
            .get(key)
            .map(|e| (e.data.clone(), e.content_type.clone()))
    }

    fn read(&self, key: &str) -> StorageResult<Bytes> {
        self.inner
            .entries()
            .get(key)
            .map(|e| e.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        if self.inner.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("injected delete failure: {key}"),
            )));
        }
        self.inner
            .entries()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn check_writable(&self, key: &str) -> StorageResult<()> {
        if self.inner.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                format!("injected write failure: {key}"),
            )));
        }
        Ok(())
    }

    fn validate_key(key: &str) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FragmentStore for MemoryBackend {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        Self::validate_key(key)?;
        self.check_writable(key)?;
        self.inner.insert(key, data, None);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.read(key)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.inner.entries().contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.remove(key)
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Self::validate_key(key)?;
        self.check_writable(key)?;
        Ok(Box::new(MemoryUpload {
            inner: self.inner.clone(),
            key: key.to_string(),
            buffer: BytesMut::new(),
        }))
    }

    async fn list_older_than(&self, cutoff: OffsetDateTime) -> StorageResult<StagedListing> {
        let entries = self
            .inner
            .entries()
            .iter()
            .filter(|(_, e)| e.last_modified < cutoff)
            .map(|(key, e)| StagedEntry {
                key: key.clone(),
                size: e.data.len() as u64,
                last_modified: e.last_modified,
            })
            .collect();

        Ok(StagedListing {
            entries,
            skipped: 0,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<String> {
        Self::validate_key(key)?;
        if self.inner.fail_object_puts.load(Ordering::SeqCst) {
            return Err(StorageError::S3(
                format!("injected put_object failure: {key}").into(),
            ));
        }
        self.inner
            .insert(key, data, Some(content_type.to_string()));
        self.inner.object_puts.fetch_add(1, Ordering::SeqCst);
        Ok(self.location(key))
    }

    fn location(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, crate::backends::encode_key(key))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Buffered streaming upload; the entry appears on finish.
struct MemoryUpload {
    inner: Arc<Inner>,
    key: String,
    buffer: BytesMut,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let len = self.buffer.len() as u64;
        self.inner.insert(&self.key, self.buffer.freeze(), None);
        Ok(len)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
