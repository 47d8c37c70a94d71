//! Periodic reclamation of expired certificate records.
//!
//! A record is useless once the certificate it tracks can no longer be
//! refreshed. The cleaner deletes records whose certificate expired more
//! than one maximum certificate lifetime ago.
//!
//! ```text
//! spawn(interval) ──► run_once() ──► tick ──► run_once() ──► ...
//!                        │
//!                        └─► get_connection() ──► delete_expired_x509_cert_records(cutoff)
//! ```
//!
//! A failed run is logged and the schedule carries on.

use std::{sync::Arc, time::Duration};

use certissue_store::{CertRecordStore, StoreError};
use chrono::Utc;
use fail::fail_point;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shortest schedule [`ExpiredRecordCleaner::spawn`] accepts.
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Deletes expired records from a [`CertRecordStore`].
#[derive(Clone)]
pub struct ExpiredRecordCleaner {
    store: Arc<dyn CertRecordStore>,
    expiry_time_mins: u32,
}

impl std::fmt::Debug for ExpiredRecordCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiredRecordCleaner")
            .field("expiry_time_mins", &self.expiry_time_mins)
            .finish_non_exhaustive()
    }
}

impl ExpiredRecordCleaner {
    /// Creates a cleaner that keeps records for `expiry_time_mins` past expiry.
    #[must_use]
    pub fn new(store: Arc<dyn CertRecordStore>, expiry_time_mins: u32) -> Self {
        Self { store, expiry_time_mins }
    }

    /// Runs one cleanup pass and returns the number of deleted records.
    ///
    /// Errors are logged; the count then covers records removed before the
    /// failure.
    #[tracing::instrument(skip(self), fields(expiry_time_mins = self.expiry_time_mins))]
    pub async fn run_once(&self) -> usize {
        tracing::info!("expired cert record cleaner starting");
        let deleted = match self.delete_expired().await {
            Ok(count) => count,
            Err(err) => {
                let deleted = err.deleted_before_failure();
                tracing::error!(error = %err, deleted, "unable to delete expired cert records");
                deleted
            },
        };
        tracing::info!(deleted, "expired cert record cleaner completed");
        deleted
    }

    async fn delete_expired(&self) -> Result<usize, StoreError> {
        fail_point!("cleaner-before-delete", |_| {
            Err(StoreError::internal("injected failure before expired record delete"))
        });
        let cutoff = Utc::now() - chrono::Duration::minutes(i64::from(self.expiry_time_mins));
        let conn = self.store.get_connection().await?;
        conn.delete_expired_x509_cert_records(cutoff).await
    }

    /// Starts the periodic schedule: one run immediately, then every `interval`.
    ///
    /// Intervals shorter than [`MIN_CLEANUP_INTERVAL`] are raised to it.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> CleanerHandle {
        let interval = if interval < MIN_CLEANUP_INTERVAL {
            tracing::warn!(
                requested = ?interval,
                applied = ?MIN_CLEANUP_INTERVAL,
                "cleanup interval below minimum"
            );
            MIN_CLEANUP_INTERVAL
        } else {
            interval
        };
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            // The first tick completes immediately.
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        tracing::info!("expired cert record cleaner shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        });

        CleanerHandle { cancel_token: token, task: Mutex::new(Some(handle)) }
    }
}

/// Owner of a running cleaner task.
///
/// Dropping the handle cancels the task without waiting for it.
#[derive(Debug)]
pub struct CleanerHandle {
    cancel_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CleanerHandle {
    /// Stops the task and waits for it to exit. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "expired cert record cleaner task panicked");
        }
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for CleanerHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use async_trait::async_trait;
    use certissue_store::{
        CertRecordStoreConnection, MemoryCertRecordStore, StoreResult, X509CertRecord,
        testutil::{FailingCertRecordStore, make_record_expiring},
    };
    use chrono::{DateTime, Duration as ChronoDuration};

    use super::*;

    const DAY_MINS: u32 = 24 * 60;

    /// Removes two records and then fails the bulk delete.
    struct PartialDeleteStore;

    #[async_trait]
    impl CertRecordStore for PartialDeleteStore {
        async fn get_connection(&self) -> StoreResult<Box<dyn CertRecordStoreConnection>> {
            Ok(Box::new(PartialDeleteStore))
        }
    }

    #[async_trait]
    impl CertRecordStoreConnection for PartialDeleteStore {
        async fn get_x509_cert_record(
            &self,
            _provider: &str,
            _instance_id: &str,
            _service: &str,
        ) -> StoreResult<Option<X509CertRecord>> {
            Ok(None)
        }

        async fn insert_x509_cert_record(&self, _record: &X509CertRecord) -> StoreResult<bool> {
            Ok(false)
        }

        async fn update_x509_cert_record(&self, _record: &X509CertRecord) -> StoreResult<bool> {
            Ok(false)
        }

        async fn delete_x509_cert_record(
            &self,
            _provider: &str,
            _instance_id: &str,
            _service: &str,
        ) -> StoreResult<bool> {
            Ok(false)
        }

        async fn delete_expired_x509_cert_records(
            &self,
            _cutoff: DateTime<Utc>,
        ) -> StoreResult<usize> {
            let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
            Err(StoreError::interrupted_with_source(2, "unable to delete third record", io))
        }
    }

    async fn seed(store: &MemoryCertRecordStore) {
        let conn = store.get_connection().await.unwrap();
        let now = Utc::now();
        for (id, expiry) in [
            ("ancient", now - ChronoDuration::days(10)),
            ("recent", now - ChronoDuration::hours(12)),
            ("live", now + ChronoDuration::days(1)),
        ] {
            conn.insert_x509_cert_record(&make_record_expiring("sys.auth.aws", id, "svc", expiry))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_run_once_deletes_past_cutoff() {
        let store = MemoryCertRecordStore::new();
        seed(&store).await;

        let cleaner = ExpiredRecordCleaner::new(Arc::new(store.clone()), DAY_MINS);
        assert_eq!(cleaner.run_once().await, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_run_once_swallows_store_errors() {
        let store = FailingCertRecordStore::new();
        let cleaner = ExpiredRecordCleaner::new(Arc::new(store.clone()), DAY_MINS);

        assert_eq!(cleaner.run_once().await, 0);
        assert_eq!(store.acquired(), 1);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_immediately_then_per_interval() {
        let store = FailingCertRecordStore::new();
        let cleaner = ExpiredRecordCleaner::new(Arc::new(store.clone()), DAY_MINS);
        let handle = cleaner.spawn(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.acquired(), 1, "first run happens at spawn");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.acquired(), 2, "failures do not stop the schedule");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.acquired(), 4);

        handle.shutdown().await;
        assert!(handle.is_cancelled());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.acquired(), 4, "no runs after shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let store = FailingCertRecordStore::new();
        let handle = ExpiredRecordCleaner::new(Arc::new(store.clone()), DAY_MINS)
            .spawn(Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.acquired(), 1);

        tokio::time::sleep(MIN_CLEANUP_INTERVAL).await;
        assert_eq!(store.acquired(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_partial_failure_reports_deleted_count() {
        let store = PartialDeleteStore;
        let cleaner = ExpiredRecordCleaner::new(Arc::new(store), DAY_MINS);

        assert_eq!(cleaner.run_once().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let store = MemoryCertRecordStore::new();
        let handle = ExpiredRecordCleaner::new(Arc::new(store), DAY_MINS).spawn(Duration::from_secs(60));

        handle.shutdown().await;
        handle.shutdown().await;
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_task() {
        let store = FailingCertRecordStore::new();
        let handle = ExpiredRecordCleaner::new(Arc::new(store.clone()), DAY_MINS)
            .spawn(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(1)).await;
        let token = handle.cancel_token.clone();

        drop(handle);
        assert!(token.is_cancelled());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.acquired(), 1);
    }
}
