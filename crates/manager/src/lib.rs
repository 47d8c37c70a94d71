//! # Instance Certificate Issuance Core
//!
//! Issues X.509 and SSH credentials to workload instances and keeps track of
//! what was issued.
//!
//! This crate provides:
//! - **Manager facade**: [`InstanceCertManager`] with launch authorization,
//!   source IP policy, issuance and record bookkeeping
//! - **Pluggable backends**: X.509 and SSH signers plus a record store,
//!   resolved by identifier through a [`BackendRegistry`]
//! - **Signer certificate cache**: CA chains fetched once and shared
//! - **Expired record cleanup**: a cancellable background task
//!
//! ## Startup
//!
//! Construction is fail-fast. An unknown backend identifier, a backend that
//! fails to initialize, or a configured file that cannot be loaded returns a
//! [`ManagerError`]. An unconfigured SSH signer or record store is not an
//! error; the manager runs without it.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use certissue_manager::{
//!     BackendRegistry, CertManagerConfig, InstanceCertManager, Principal,
//!     testutil::{MockX509Signer, StaticAuthorizer, StaticKeyStore},
//! };
//!
//! # async fn example() -> certissue_manager::Result<()> {
//! let mut registry = BackendRegistry::with_builtin_stores();
//! registry.register_x509_signer("local", |_| Ok(Arc::new(MockX509Signer::new())));
//!
//! let config = CertManagerConfig::from_file("/etc/certissue/manager.json")?;
//! let manager = InstanceCertManager::new(
//!     config,
//!     &registry,
//!     Arc::new(StaticKeyStore::default()),
//!     Arc::new(StaticAuthorizer::allow_all()),
//! )
//! .await?;
//!
//! let provider = Principal::new("sys.auth", "aws");
//! let mut reason = String::new();
//! if manager.authorize_launch(&provider, "media", "api", &mut reason)
//!     && manager.verify_instance_cert_ip_address("sys.auth.aws", "10.1.2.3")
//! {
//!     let identity = manager.generate_identity("csr", "media.api", None, 0).await;
//!     println!("issued: {}", identity.is_some());
//! }
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// CA trust bundles and static signer certificates.
pub mod bundle;
/// Expired record cleanup task.
pub mod cleaner;
/// Manager configuration.
pub mod config;
/// Error types.
pub mod error;
/// Issued credential set.
pub mod identity;
/// IPv4 allow-lists.
pub mod ipblock;
/// The manager facade.
pub mod manager;
/// Caller identity and collaborator interfaces.
pub mod principal;
/// Backend registry.
pub mod registry;
/// Signer traits and request types.
pub mod signer;
/// Signer certificate cache.
pub mod signer_cache;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// X.509 parsing helpers.
pub mod x509;

pub use bundle::{CertificateAuthorityBundle, CertificateAuthorityBundles};
pub use cleaner::{CleanerHandle, ExpiredRecordCleaner, MIN_CLEANUP_INTERVAL};
pub use config::{CertManagerConfig, DEFAULT_CLEANUP_INTERVAL};
pub use error::{FactoryError, IpBlockError, ManagerError, Result, SignerError, SshSignerError};
pub use identity::InstanceIdentity;
pub use ipblock::{IpAllowList, IpBlock, ProviderIpPolicy};
pub use manager::InstanceCertManager;
pub use principal::{Authorizer, Principal, PrivateKeyStore};
pub use registry::{BackendKind, BackendRegistry, FILE_STORE, MEMORY_STORE};
pub use signer::{
    KeyUsage, SshCertRequest, SshCertType, SshCertificate, SshCertificates, SshSigner,
    X509CertSigner,
};
pub use signer_cache::SignerCertificateCache;
