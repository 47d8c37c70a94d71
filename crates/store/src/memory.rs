//! In-memory record store.
//!
//! [`MemoryCertRecordStore`] keeps records in a shared hash map. It is used
//! for tests and single-node development deployments; nothing survives a
//! restart.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    error::StoreResult,
    record::{CertRecordKey, X509CertRecord},
    store::{CertRecordStore, CertRecordStoreConnection},
};

type RecordMap = Arc<RwLock<HashMap<CertRecordKey, X509CertRecord>>>;

/// In-memory implementation of [`CertRecordStore`].
///
/// Cloning is cheap; all clones share the same records. The store counts
/// open connections so tests can assert that every operation released the
/// connection it acquired.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use certissue_store::{CertRecordStore, MemoryCertRecordStore, X509CertRecord};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryCertRecordStore::new();
///     let record = X509CertRecord::builder()
///         .provider("sys.auth.aws")
///         .instance_id("i-1")
///         .service("media.api")
///         .current_serial("1")
///         .expiry_time(Utc::now() + Duration::days(1))
///         .build();
///
///     {
///         let conn = store.get_connection().await?;
///         assert!(conn.insert_x509_cert_record(&record).await?);
///     }
///     assert_eq!(store.open_connections(), 0);
///     Ok(())
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryCertRecordStore {
    records: RecordMap,
    open_connections: Arc<AtomicUsize>,
}

impl MemoryCertRecordStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of connections acquired and not yet dropped.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CertRecordStore for MemoryCertRecordStore {
    async fn get_connection(&self) -> StoreResult<Box<dyn CertRecordStoreConnection>> {
        self.open_connections.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryConnection {
            records: Arc::clone(&self.records),
            open_connections: Arc::clone(&self.open_connections),
        }))
    }
}

struct MemoryConnection {
    records: RecordMap,
    open_connections: Arc<AtomicUsize>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl CertRecordStoreConnection for MemoryConnection {
    #[tracing::instrument(skip(self))]
    async fn get_x509_cert_record(
        &self,
        provider: &str,
        instance_id: &str,
        service: &str,
    ) -> StoreResult<Option<X509CertRecord>> {
        let key = CertRecordKey::new(provider, instance_id, service);
        Ok(self.records.read().get(&key).cloned())
    }

    #[tracing::instrument(skip(self, record), fields(key = %record.key()))]
    async fn insert_x509_cert_record(&self, record: &X509CertRecord) -> StoreResult<bool> {
        let mut records = self.records.write();
        let key = record.key();
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, record.clone());
        Ok(true)
    }

    #[tracing::instrument(skip(self, record), fields(key = %record.key()))]
    async fn update_x509_cert_record(&self, record: &X509CertRecord) -> StoreResult<bool> {
        let mut records = self.records.write();
        match records.get_mut(&record.key()) {
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            },
            None => Ok(false),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn delete_x509_cert_record(
        &self,
        provider: &str,
        instance_id: &str,
        service: &str,
    ) -> StoreResult<bool> {
        let key = CertRecordKey::new(provider, instance_id, service);
        Ok(self.records.write().remove(&key).is_some())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_expired_x509_cert_records(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !record.expired_before(cutoff));
        Ok(before - records.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testutil::make_record;

    #[tokio::test]
    async fn test_insert_does_not_overwrite() {
        let store = MemoryCertRecordStore::new();
        let conn = store.get_connection().await.expect("connection");

        let record = make_record("sys.auth.aws", "i-1", "media.api");
        assert!(conn.insert_x509_cert_record(&record).await.expect("insert"));

        let mut other = record.clone();
        other.current_serial = "other".to_owned();
        assert!(!conn.insert_x509_cert_record(&other).await.expect("insert"));

        let stored = conn
            .get_x509_cert_record("sys.auth.aws", "i-1", "media.api")
            .await
            .expect("get")
            .expect("record exists");
        assert_eq!(stored.current_serial, record.current_serial);
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let store = MemoryCertRecordStore::new();
        let conn = store.get_connection().await.expect("connection");
        let mut record = make_record("sys.auth.aws", "i-2", "media.api");

        assert!(!conn.update_x509_cert_record(&record).await.expect("update"));

        conn.insert_x509_cert_record(&record).await.expect("insert");
        record.current_serial = "2".to_owned();
        assert!(conn.update_x509_cert_record(&record).await.expect("update"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_expired_is_strict() {
        let store = MemoryCertRecordStore::new();
        let conn = store.get_connection().await.expect("connection");
        let cutoff = Utc::now();

        let mut old = make_record("p", "old", "svc");
        old.expiry_time = cutoff - Duration::seconds(1);
        let mut boundary = make_record("p", "boundary", "svc");
        boundary.expiry_time = cutoff;
        let mut fresh = make_record("p", "fresh", "svc");
        fresh.expiry_time = cutoff + Duration::hours(1);

        for record in [&old, &boundary, &fresh] {
            conn.insert_x509_cert_record(record).await.expect("insert");
        }

        let deleted = conn.delete_expired_x509_cert_records(cutoff).await.expect("delete");
        assert_eq!(deleted, 1);
        assert!(conn.get_x509_cert_record("p", "old", "svc").await.expect("get").is_none());
        assert!(conn.get_x509_cert_record("p", "boundary", "svc").await.expect("get").is_some());
        assert!(conn.get_x509_cert_record("p", "fresh", "svc").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_connections_are_released_on_drop() {
        let store = MemoryCertRecordStore::new();
        let first = store.get_connection().await.expect("connection");
        let second = store.get_connection().await.expect("connection");
        assert_eq!(store.open_connections(), 2);

        drop(first);
        assert_eq!(store.open_connections(), 1);
        drop(second);
        assert_eq!(store.open_connections(), 0);
    }
}
