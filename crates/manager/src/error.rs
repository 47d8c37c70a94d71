//! Error types for the issuance core.
//!
//! [`ManagerError`] covers startup failures; the manager refuses to come up
//! when any of them occurs. [`SignerError`] and [`SshSignerError`] are the
//! runtime error types of the signing backends, and [`IpBlockError`]
//! describes a malformed address range.

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::BackendKind;

/// Error type produced by backend factories.
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for startup operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Fatal startup errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// No factory is registered under the configured identifier.
    #[error("Unknown {kind} backend: {id}")]
    UnknownBackend {
        /// Which backend slot was being resolved.
        kind: BackendKind,
        /// The configured identifier.
        id: String,
    },

    /// A registered factory failed to construct its backend.
    #[error("Unable to initialize {kind} backend '{id}'")]
    BackendInit {
        /// Which backend slot was being resolved.
        kind: BackendKind,
        /// The configured identifier.
        id: String,
        /// The factory's failure.
        #[source]
        source: FactoryError,
    },

    /// A configured file could not be read.
    #[error("Unable to read {}", path.display())]
    FileRead {
        /// Path of the file.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A configured file could not be parsed.
    #[error("Unable to parse {}: {message}", path.display())]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// What was wrong with the contents.
        message: String,
    },

    /// A configured file parsed but listed nothing.
    #[error("No entries available in {}", path.display())]
    NoEntries {
        /// Path of the file.
        path: PathBuf,
    },

    /// An IP policy file contains an invalid IPv4 prefix.
    #[error("Invalid IP block in {}", path.display())]
    InvalidIpBlock {
        /// Path of the policy file.
        path: PathBuf,
        /// The rejected entry.
        #[source]
        source: IpBlockError,
    },

    /// A CA bundle could not be loaded.
    #[error("Invalid certificate bundle '{name}': {message}")]
    InvalidBundle {
        /// Bundle name from the descriptor.
        name: String,
        /// What was wrong with the bundle.
        message: String,
    },

    /// Two bundles in the descriptor share a name.
    #[error("Duplicate certificate bundle name: {name}")]
    DuplicateBundle {
        /// The repeated name.
        name: String,
    },

    /// The configuration is internally inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ManagerError {
    pub(crate) fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead { path: path.into(), source }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Parse { path: path.into(), message: message.to_string() }
    }

    pub(crate) fn invalid_bundle(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidBundle { name: name.into(), message: message.into() }
    }
}

/// Errors returned by an X.509 signing backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignerError {
    /// The backend could not be reached.
    #[error("Signer unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<FactoryError>,
    },

    /// The backend refused the request (bad CSR, policy violation).
    #[error("Signing request rejected: {message}")]
    Rejected {
        /// Why the request was refused.
        message: String,
    },

    /// Backend-specific failure.
    #[error("Signer internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl SignerError {
    /// Creates an `Unavailable` error without a source.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates an `Unavailable` error wrapping `source`.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Creates a `Rejected` error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

/// Errors returned by an SSH signing backend.
///
/// The resource layer maps these onto client responses through
/// [`code`](Self::code).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SshSignerError {
    /// The principal may not obtain the requested certificate.
    #[error("SSH certificate request not authorized: {message}")]
    AuthorizationDenied {
        /// Reason reported by the backend.
        message: String,
    },

    /// The signing backend failed with its own status code.
    #[error("SSH signing backend error ({code}): {message}")]
    SigningBackendError {
        /// Backend status code.
        code: u16,
        /// Backend message.
        message: String,
    },

    /// The request itself is malformed.
    #[error("Invalid SSH certificate request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },
}

impl SshSignerError {
    /// Creates an `AuthorizationDenied` error.
    #[must_use]
    pub fn authorization_denied(message: impl Into<String>) -> Self {
        Self::AuthorizationDenied { message: message.into() }
    }

    /// Creates a `SigningBackendError`.
    #[must_use]
    pub fn signing_backend(code: u16, message: impl Into<String>) -> Self {
        Self::SigningBackendError { code, message: message.into() }
    }

    /// Creates an `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// Status code the resource layer should answer with.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::AuthorizationDenied { .. } => 403,
            Self::SigningBackendError { code, .. } => *code,
            Self::InvalidRequest { .. } => 400,
        }
    }
}

/// A textual IPv4 range could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IpBlockError {
    /// A component is not a dotted-quad IPv4 address.
    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),

    /// The CIDR prefix length is not in `0..=32`.
    #[error("Invalid prefix length in {0}")]
    InvalidPrefixLength(String),

    /// The range end is below its start.
    #[error("Range end precedes start: {0}")]
    InvertedRange(String),
}
