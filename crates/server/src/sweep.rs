//! Staging housekeeping.
//!
//! Fragments of abandoned uploads, and combined artifacts left behind by
//! failed assemblies, stay in staging until they age past the retention
//! window. The sweep deletes them.

use crate::metrics;
use serde::Serialize;
use splice_storage::FragmentStore;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Outcome of one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Entries older than the cutoff.
    pub items_processed: u64,
    /// Entries deleted.
    pub items_deleted: u64,
    /// Bytes reclaimed.
    pub bytes_reclaimed: u64,
    /// Entries that could not be inspected or deleted.
    pub errors: u64,
}

/// Delete every staging entry last modified before `now - retention`.
///
/// Never fails: listing and per-entry errors are logged and counted.
pub async fn run_sweep(
    staging: &dyn FragmentStore,
    now: OffsetDateTime,
    retention: Duration,
) -> SweepStats {
    let mut stats = SweepStats::default();
    let cutoff = now - retention;

    let listing = match staging.list_older_than(cutoff).await {
        Ok(listing) => listing,
        Err(e) => {
            tracing::error!(
                backend = staging.backend_name(),
                error = %e,
                "Failed to list staging entries, skipping sweep"
            );
            stats.errors += 1;
            metrics::SWEEP_ERRORS.inc();
            return stats;
        }
    };
    stats.errors += listing.skipped;

    for entry in listing.entries {
        stats.items_processed += 1;
        match staging.delete(&entry.key).await {
            Ok(()) => {
                stats.items_deleted += 1;
                stats.bytes_reclaimed += entry.size;
                tracing::debug!(
                    key = %entry.key,
                    size = entry.size,
                    last_modified = %entry.last_modified,
                    "Deleted stale staging entry"
                );
            }
            // Consumed by an assembly between listing and delete
            Err(e) if e.is_not_found() => {
                tracing::debug!(key = %entry.key, "Staging entry already gone");
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(key = %entry.key, error = %e, "Failed to delete stale staging entry");
            }
        }
    }

    metrics::SWEEP_ITEMS_DELETED.inc_by(stats.items_deleted);
    metrics::SWEEP_BYTES_RECLAIMED.inc_by(stats.bytes_reclaimed);
    metrics::SWEEP_ERRORS.inc_by(stats.errors);

    if stats.items_processed > 0 || stats.errors > 0 {
        tracing::info!(
            items_processed = stats.items_processed,
            items_deleted = stats.items_deleted,
            bytes_reclaimed = stats.bytes_reclaimed,
            errors = stats.errors,
            cutoff = %cutoff,
            "Staging sweep finished"
        );
    }

    stats
}

/// Run [`run_sweep`] every `interval`, starting immediately.
pub fn spawn_sweeper(
    staging: Arc<dyn FragmentStore>,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            run_sweep(staging.as_ref(), OffsetDateTime::now_utc(), retention).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use splice_storage::MemoryBackend;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_sweep_deletes_only_stale_entries() {
        let backend = MemoryBackend::new();
        let now = OffsetDateTime::now_utc();
        for key in ["old.jpg.part0", "old.jpg.part1", "new.jpg.part0"] {
            backend.put(key, Bytes::from_static(b"1234")).await.unwrap();
        }
        backend.set_last_modified("old.jpg.part0", now - time::Duration::minutes(61));
        backend.set_last_modified("old.jpg.part1", now - time::Duration::hours(5));
        backend.set_last_modified("new.jpg.part0", now - time::Duration::minutes(59));

        let stats = run_sweep(&backend, now, HOUR).await;
        assert_eq!(
            stats,
            SweepStats {
                items_processed: 2,
                items_deleted: 2,
                bytes_reclaimed: 8,
                errors: 0,
            }
        );
        assert_eq!(backend.keys(), vec!["new.jpg.part0"]);
    }

    #[tokio::test]
    async fn test_sweep_counts_delete_failures_and_continues() {
        let backend = MemoryBackend::new();
        let now = OffsetDateTime::now_utc();
        backend.put("a.part0", Bytes::from_static(b"x")).await.unwrap();
        backend.put("b.part0", Bytes::from_static(b"y")).await.unwrap();
        backend.set_last_modified("a.part0", now - time::Duration::hours(2));
        backend.set_last_modified("b.part0", now - time::Duration::hours(2));
        backend.fail_deletes(true);

        let stats = run_sweep(&backend, now, HOUR).await;
        assert_eq!(stats.items_processed, 2);
        assert_eq!(stats.items_deleted, 0);
        assert_eq!(stats.errors, 2);
        assert_eq!(backend.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_staging() {
        let backend = MemoryBackend::new();
        let stats = run_sweep(&backend, OffsetDateTime::now_utc(), HOUR).await;
        assert_eq!(stats, SweepStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let backend = MemoryBackend::new();
        backend.put("stale.part0", Bytes::from_static(b"x")).await.unwrap();
        backend.set_last_modified(
            "stale.part0",
            OffsetDateTime::now_utc() - time::Duration::hours(3),
        );

        let handle = spawn_sweeper(Arc::new(backend.clone()), HOUR, HOUR);
        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(backend.keys().is_empty());
        handle.abort();
    }
}
