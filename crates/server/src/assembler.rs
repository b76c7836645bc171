//! Fragment intake and assembly.
//!
//! Fragments of a logical upload are staged as `<file name>.part<index>`. The
//! fragment carrying the final index triggers assembly: every fragment is
//! appended in ascending index order to a combined artifact, which is then
//! published to the object store and removed from staging.

use crate::metrics;
use bytes::Bytes;
use futures::StreamExt;
use splice_core::upload::{combined_key, remote_object_key};
use splice_core::{AssemblyState, FileName, FragmentKey, FragmentSpec, UploadSession};
use splice_storage::{FragmentStore, ObjectStore, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use time::OffsetDateTime;
use tracing::instrument;

/// Content type used when a fragment does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Concurrent `exists` probes when checking upload completeness.
const PROBE_CONCURRENCY: usize = 32;

/// Failure of a single fragment submission.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("invalid fragment: {0}")]
    Validation(#[from] splice_core::Error),

    #[error("failed to stage fragment: {0}")]
    WriteFailed(#[source] StorageError),

    #[error("incomplete upload: {} fragment(s) missing", .missing.len())]
    IncompleteUpload { missing: Vec<u32> },

    #[error("failed to assemble fragments: {0}")]
    AssemblyFailed(#[source] StorageError),

    #[error("failed to upload assembled file: {0}")]
    UploadFailed(#[source] StorageError),
}

impl AssemblyError {
    /// Stage label used in logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::WriteFailed(_) => "write",
            Self::IncompleteUpload { .. } => "incomplete",
            Self::AssemblyFailed(_) => "assembly",
            Self::UploadFailed(_) => "upload",
        }
    }
}

/// Result of a successful submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Fragment staged; the upload is not finished yet.
    Received,
    /// Final fragment staged and the whole file published.
    Assembled { url: String, size: u64 },
}

/// Async mutexes keyed by string, created on demand.
///
/// Entries are dropped once nothing holds or waits on them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mutex = self.table().entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: self,
            guard: Some(guard),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key of a [`KeyedLocks`].
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        let locks = self.locks;
        let mut table = locks.table();
        drop(self.guard.take());
        // Only the table's own reference left: no holder, no waiter.
        // Also clears entries abandoned by cancelled waiters.
        table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

/// Stages fragments and assembles completed uploads.
pub struct ChunkAssembler {
    staging: Arc<dyn FragmentStore>,
    objects: Arc<dyn ObjectStore>,
    key_prefix: String,
    max_total_chunks: u32,
    locks: KeyedLocks,
}

impl ChunkAssembler {
    pub fn new(
        staging: Arc<dyn FragmentStore>,
        objects: Arc<dyn ObjectStore>,
        key_prefix: impl Into<String>,
        max_total_chunks: u32,
    ) -> Self {
        Self {
            staging,
            objects,
            key_prefix: key_prefix.into(),
            max_total_chunks,
            locks: KeyedLocks::new(),
        }
    }

    /// Per-file-name locks held during final fragment handling.
    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Stage one fragment, assembling and publishing the file when it is the
    /// final one.
    ///
    /// The fragment overwrites any previous payload at the same position.
    /// Final fragments for the same file name are handled one at a time.
    #[instrument(
        skip(self, data, content_type),
        fields(size = data.len())
    )]
    pub async fn submit_fragment(
        &self,
        file_name: &str,
        index: u32,
        total_chunks: u32,
        data: Bytes,
        content_type: &str,
    ) -> Result<SubmitOutcome, AssemblyError> {
        let result = self
            .submit_inner(file_name, index, total_chunks, data, content_type)
            .await;
        if let Err(err) = &result {
            metrics::record_assembly_failure(err.stage());
            match err {
                AssemblyError::Validation(_) | AssemblyError::IncompleteUpload { .. } => {
                    tracing::warn!(stage = err.stage(), error = %err, "Fragment rejected");
                }
                _ => {
                    tracing::error!(stage = err.stage(), error = %err, "Fragment submission failed");
                }
            }
        }
        result
    }

    async fn submit_inner(
        &self,
        file_name: &str,
        index: u32,
        total_chunks: u32,
        data: Bytes,
        content_type: &str,
    ) -> Result<SubmitOutcome, AssemblyError> {
        let file_name = FileName::parse(file_name)?;
        let spec = FragmentSpec::new(index, total_chunks, self.max_total_chunks)?;

        if !spec.is_final() {
            self.stage_fragment(&file_name, spec.index(), data).await?;
            return Ok(SubmitOutcome::Received);
        }

        let _guard = self.locks.lock(file_name.as_str()).await;
        self.stage_fragment(&file_name, spec.index(), data).await?;

        metrics::ACTIVE_ASSEMBLIES.inc();
        let started = Instant::now();
        let result = self.assemble(&file_name, &spec, content_type).await;
        metrics::ACTIVE_ASSEMBLIES.dec();

        if let Ok(SubmitOutcome::Assembled { size, .. }) = &result {
            metrics::ASSEMBLIES_COMPLETED.inc();
            metrics::BYTES_UPLOADED.inc_by(*size);
            metrics::ASSEMBLY_DURATION.observe(started.elapsed().as_secs_f64());
        }
        result
    }

    async fn stage_fragment(
        &self,
        file_name: &FileName,
        index: u32,
        data: Bytes,
    ) -> Result<(), AssemblyError> {
        let key = FragmentKey::new(file_name, index).to_key();
        let size = data.len() as u64;
        self.staging
            .put(&key, data)
            .await
            .map_err(AssemblyError::WriteFailed)?;

        metrics::FRAGMENTS_RECEIVED.inc();
        metrics::FRAGMENT_BYTES_RECEIVED.inc_by(size);
        tracing::debug!(key = %key, size, "Fragment staged");
        Ok(())
    }

    /// Which fragments of `file_name` are currently staged.
    pub async fn probe_session(
        &self,
        file_name: &FileName,
        total_chunks: u32,
    ) -> StorageResult<UploadSession> {
        let mut session = UploadSession::new(file_name.clone(), total_chunks);

        let mut probes = futures::stream::iter(0..total_chunks)
            .map(move |index| async move {
                let key = FragmentKey::new(file_name, index).to_key();
                self.staging.exists(&key).await.map(|found| (index, found))
            })
            .buffer_unordered(PROBE_CONCURRENCY);

        while let Some(probe) = probes.next().await {
            let (index, found) = probe?;
            if found {
                session.record(index);
            }
        }
        Ok(session)
    }

    async fn assemble(
        &self,
        file_name: &FileName,
        spec: &FragmentSpec,
        content_type: &str,
    ) -> Result<SubmitOutcome, AssemblyError> {
        let mut state = AssemblyState::Receiving;

        let session = self
            .probe_session(file_name, spec.total_chunks())
            .await
            .map_err(AssemblyError::AssemblyFailed)?;
        if !session.is_complete() {
            return Err(AssemblyError::IncompleteUpload {
                missing: session.missing(),
            });
        }

        advance(&mut state, AssemblyState::Assembling);
        let combined = combined_key(file_name);
        let size = match self
            .concatenate(file_name, spec.total_chunks(), &combined)
            .await
        {
            Ok(size) => size,
            Err(err) => {
                advance(&mut state, AssemblyState::Failed);
                return Err(AssemblyError::AssemblyFailed(err));
            }
        };
        tracing::info!(combined = %combined, size, fragments = spec.total_chunks(), "Fragments assembled");

        advance(&mut state, AssemblyState::Uploading);
        let object_key = remote_object_key(&self.key_prefix, OffsetDateTime::now_utc(), file_name);
        let url = match self.publish(&combined, &object_key, content_type).await {
            Ok(url) => url,
            Err(err) => {
                advance(&mut state, AssemblyState::Failed);
                return Err(err);
            }
        };

        if let Err(err) = self.staging.delete(&combined).await {
            advance(&mut state, AssemblyState::Failed);
            tracing::error!(
                combined = %combined,
                object_key = %object_key,
                error = %err,
                "Object published but combined artifact could not be removed"
            );
            return Err(AssemblyError::AssemblyFailed(err));
        }

        advance(&mut state, AssemblyState::Done);
        tracing::info!(object_key = %object_key, url = %url, size, "Upload published");
        Ok(SubmitOutcome::Assembled { url, size })
    }

    /// Append fragments `0..total_chunks` to `combined`, consuming each one.
    async fn concatenate(
        &self,
        file_name: &FileName,
        total_chunks: u32,
        combined: &str,
    ) -> StorageResult<u64> {
        let mut writer = self.staging.put_stream(combined).await?;

        for index in 0..total_chunks {
            let key = FragmentKey::new(file_name, index).to_key();
            let step = async {
                let data = self.staging.get(&key).await?;
                writer.write(data).await?;
                self.staging.delete(&key).await
            }
            .await;

            if let Err(err) = step {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(combined = %combined, error = %abort_err, "Failed to abort combined artifact");
                }
                return Err(err);
            }
        }

        writer.finish().await
    }

    /// Upload the combined artifact, discarding it if the upload fails.
    async fn publish(
        &self,
        combined: &str,
        object_key: &str,
        content_type: &str,
    ) -> Result<String, AssemblyError> {
        let data = self
            .staging
            .get(combined)
            .await
            .map_err(AssemblyError::AssemblyFailed)?;

        match self.objects.put_object(object_key, data, content_type).await {
            Ok(url) => Ok(url),
            Err(err) => {
                if let Err(cleanup_err) = self.staging.delete(combined).await {
                    tracing::warn!(
                        combined = %combined,
                        error = %cleanup_err,
                        "Failed to discard combined artifact, leaving it for the sweep"
                    );
                }
                Err(AssemblyError::UploadFailed(err))
            }
        }
    }
}

fn advance(state: &mut AssemblyState, next: AssemblyState) {
    if let Err(err) = state.transition(next) {
        tracing::warn!(error = %err, "Unexpected assembly state transition");
        *state = next;
        return;
    }
    tracing::trace!(state = %state, "Assembly state changed");
}
