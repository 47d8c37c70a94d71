//! Record store traits.
//!
//! A [`CertRecordStore`] is a factory of short-lived connections. Every
//! logical operation acquires one connection, performs its work and drops
//! it; implementations release whatever the connection holds in `Drop`, so
//! the release happens on every exit path including `?` returns.
//!
//! ```text
//! manager op ──► store.get_connection() ──► conn.get/insert/update/delete ──► drop(conn)
//! cleaner    ──► store.get_connection() ──► conn.delete_expired_x509_cert_records ──► drop(conn)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use certissue_store::{CertRecordStore, StoreResult, X509CertRecord};
//!
//! async fn lookup(
//!     store: &dyn CertRecordStore,
//!     provider: &str,
//!     instance_id: &str,
//!     service: &str,
//! ) -> StoreResult<Option<X509CertRecord>> {
//!     let conn = store.get_connection().await?;
//!     conn.get_x509_cert_record(provider, instance_id, service).await
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    audit::{CertLogEvent, emit_tracing_event},
    error::StoreResult,
    record::X509CertRecord,
};

/// Persistence backend for issued-certificate records.
///
/// Backends must be `Send + Sync`: the issuance path calls them from many
/// concurrent requests and the cleaner calls them from its own task.
#[async_trait]
pub trait CertRecordStore: Send + Sync {
    /// Acquires a connection scoped to one logical operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`](crate::StoreError::Connection) when
    /// the backend cannot hand out a connection.
    async fn get_connection(&self) -> StoreResult<Box<dyn CertRecordStoreConnection>>;

    /// Records an issuance audit event.
    ///
    /// The default implementation emits a structured tracing event. Callers
    /// treat any error as non-fatal.
    async fn log(&self, event: &CertLogEvent) -> StoreResult<()> {
        emit_tracing_event(event);
        Ok(())
    }
}

/// Connection to a [`CertRecordStore`].
///
/// Dropping the connection releases it.
#[async_trait]
pub trait CertRecordStoreConnection: Send + Sync {
    /// Retrieves the record for `(provider, instance_id, service)`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))` if the record exists
    /// - `Ok(None)` if it doesn't
    /// - `Err(...)` on storage errors
    async fn get_x509_cert_record(
        &self,
        provider: &str,
        instance_id: &str,
        service: &str,
    ) -> StoreResult<Option<X509CertRecord>>;

    /// Stores a new record.
    ///
    /// Returns `Ok(false)` without modifying anything if a record with the
    /// same key already exists.
    async fn insert_x509_cert_record(&self, record: &X509CertRecord) -> StoreResult<bool>;

    /// Replaces an existing record.
    ///
    /// Returns `Ok(false)` if no record with the same key exists.
    async fn update_x509_cert_record(&self, record: &X509CertRecord) -> StoreResult<bool>;

    /// Deletes the record for `(provider, instance_id, service)`.
    ///
    /// Returns `Ok(false)` if there was nothing to delete.
    async fn delete_x509_cert_record(
        &self,
        provider: &str,
        instance_id: &str,
        service: &str,
    ) -> StoreResult<bool>;

    /// Deletes every record whose expiry time is strictly before `cutoff`.
    ///
    /// Returns the number of deleted records.
    async fn delete_expired_x509_cert_records(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}
