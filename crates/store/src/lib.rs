//! Issued-certificate record store abstraction.
//!
//! The certificate issuance path records every X.509 certificate it hands
//! out, keyed by `(provider, instance_id, service)`. The record lets a later
//! refresh request prove it holds the most recent credential, and lets a
//! background cleaner drop records for certificates that have long expired.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 certissue-manager                           │
//! │    InstanceCertManager  │  ExpiredRecordCleaner             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 certissue-store                             │
//! │      CertRecordStore ──► CertRecordStoreConnection          │
//! │   (get, insert, update, delete, delete_expired, log)        │
//! ├──────────────────────────┬──────────────────────────────────┤
//! │  MemoryCertRecordStore   │      FileCertRecordStore         │
//! │   (testing, dev)         │    (single node, durable)        │
//! └──────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! # Implementing a Backend
//!
//! 1. Implement [`CertRecordStore`] to hand out connections
//! 2. Implement [`CertRecordStoreConnection`] for the per-operation work
//! 3. Release connection resources in `Drop`
//! 4. Map backend-specific errors to [`StoreError`]
//!
//! # Feature Flags
//!
//! - **`testutil`**: record builders, a store that fails every operation and
//!   the [`conformance`] suite.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod file;
pub mod memory;
pub mod record;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use audit::CertLogEvent;
pub use error::{BoxError, StoreError, StoreResult};
pub use file::FileCertRecordStore;
pub use memory::MemoryCertRecordStore;
pub use record::{CertRecordKey, X509CertRecord};
pub use store::{CertRecordStore, CertRecordStoreConnection};
