//! Record store error types and result alias.
//!
//! Every [`CertRecordStore`](crate::CertRecordStore) backend maps its internal
//! failures onto [`StoreError`]. Callers in the issuance path treat all of these
//! as per-request operational failures; none of them is fatal to the process.
//!
//! # Example
//!
//! ```
//! use certissue_store::{StoreError, StoreResult};
//!
//! fn open(dir: &str) -> StoreResult<()> {
//!     Err(StoreError::connection(format!("record directory {dir} is not reachable")))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during record store operations.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached, or a connection could not be acquired.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A record could not be encoded for storage or decoded when read back.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// A record key component cannot be represented by the backend.
    #[error("Invalid record key: {message}")]
    InvalidKey {
        /// Why the key was rejected.
        message: String,
    },

    /// A bulk delete failed after removing some records.
    #[error("Interrupted after {deleted} deletions: {message}")]
    Interrupted {
        /// Records removed before the failure.
        deleted: usize,
        /// Description of the failure.
        message: String,
        /// The underlying error that stopped the operation.
        #[source]
        source: Option<BoxError>,
    },

    /// Backend-specific failure that does not fit another category.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey { message: message.into() }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Interrupted` error for a bulk delete that stopped after
    /// `deleted` removals.
    #[must_use]
    pub fn interrupted_with_source(
        deleted: usize,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Interrupted { deleted, message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Records a bulk delete removed before failing; zero for other errors.
    #[must_use]
    pub fn deleted_before_failure(&self) -> usize {
        match self {
            Self::Interrupted { deleted, .. } => *deleted,
            _ => 0,
        }
    }

    /// Returns `true` for failures that may clear up on a later attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
