//! Shared test utilities for record store testing.
//!
//! Feature-gated behind `testutil`:
//!
//! ```toml
//! [dev-dependencies]
//! certissue-store = { path = "../store", features = ["testutil"] }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    CertLogEvent, CertRecordStore, CertRecordStoreConnection, StoreError, StoreResult,
    X509CertRecord,
};

/// Creates a record expiring 30 days from now.
///
/// The serial is derived from the instance id so records built by
/// different calls are distinguishable.
#[must_use]
pub fn make_record(provider: &str, instance_id: &str, service: &str) -> X509CertRecord {
    X509CertRecord::builder()
        .provider(provider)
        .instance_id(instance_id)
        .service(service)
        .current_serial(format!("serial-{instance_id}"))
        .current_ip("10.0.0.1")
        .expiry_time(Utc::now() + Duration::days(30))
        .build()
}

/// Creates a record with an explicit expiry time.
#[must_use]
pub fn make_record_expiring(
    provider: &str,
    instance_id: &str,
    service: &str,
    expiry_time: DateTime<Utc>,
) -> X509CertRecord {
    let mut record = make_record(provider, instance_id, service);
    record.expiry_time = expiry_time;
    record
}

/// Store whose connections fail every operation with a connection error.
///
/// Tracks how many connections were acquired and how many remain open, so
/// tests can assert release on error paths. `log` fails as well.
#[derive(Debug, Default, Clone)]
pub struct FailingCertRecordStore {
    acquired: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
}

impl FailingCertRecordStore {
    /// Creates a new failing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of connections handed out.
    #[must_use]
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    /// Number of connections not yet dropped.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CertRecordStore for FailingCertRecordStore {
    async fn get_connection(&self) -> StoreResult<Box<dyn CertRecordStoreConnection>> {
        self.acquired.fetch_add(1, Ordering::AcqRel);
        self.open.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(FailingConnection { open: Arc::clone(&self.open) }))
    }

    async fn log(&self, _event: &CertLogEvent) -> StoreResult<()> {
        Err(StoreError::connection("audit sink unavailable"))
    }
}

struct FailingConnection {
    open: Arc<AtomicUsize>,
}

impl Drop for FailingConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

fn unavailable<T>() -> StoreResult<T> {
    Err(StoreError::connection("store unavailable"))
}

#[async_trait]
impl CertRecordStoreConnection for FailingConnection {
    async fn get_x509_cert_record(
        &self,
        _provider: &str,
        _instance_id: &str,
        _service: &str,
    ) -> StoreResult<Option<X509CertRecord>> {
        unavailable()
    }

    async fn insert_x509_cert_record(&self, _record: &X509CertRecord) -> StoreResult<bool> {
        unavailable()
    }

    async fn update_x509_cert_record(&self, _record: &X509CertRecord) -> StoreResult<bool> {
        unavailable()
    }

    async fn delete_x509_cert_record(
        &self,
        _provider: &str,
        _instance_id: &str,
        _service: &str,
    ) -> StoreResult<bool> {
        unavailable()
    }

    async fn delete_expired_x509_cert_records(&self, _cutoff: DateTime<Utc>) -> StoreResult<usize> {
        unavailable()
    }
}

/// Assert that a [`StoreResult`] is a [`StoreError::Connection`].
#[macro_export]
macro_rules! assert_connection_error {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::StoreError::Connection { .. })),
            "expected StoreError::Connection, got: {:?}",
            $result,
        );
    };
}
