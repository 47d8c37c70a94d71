//! Backend resolution by identifier.
//!
//! Deployments register factories for their signing and storage backends
//! under short identifiers, and the configuration names which identifier to
//! use. Resolution happens once, at manager construction.
//!
//! ```
//! use std::sync::Arc;
//! use certissue_manager::{BackendRegistry, CertManagerConfig};
//! use certissue_store::MemoryCertRecordStore;
//!
//! let shared = MemoryCertRecordStore::new();
//! let mut registry = BackendRegistry::with_builtin_stores();
//! registry.register_record_store("shared", move |_config, _keys| Ok(Arc::new(shared.clone())));
//! assert!(registry.has_record_store("memory"));
//! assert!(registry.has_record_store("shared"));
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use certissue_store::{CertRecordStore, FileCertRecordStore, MemoryCertRecordStore};

use crate::{
    config::CertManagerConfig,
    error::{FactoryError, ManagerError, Result},
    principal::{Authorizer, PrivateKeyStore},
    signer::{SshSigner, X509CertSigner},
};

/// Identifier of the built-in in-memory record store.
pub const MEMORY_STORE: &str = "memory";

/// Identifier of the built-in directory record store.
pub const FILE_STORE: &str = "file";

/// Backend slot being resolved, used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The X.509 signer.
    X509Signer,
    /// The SSH signer.
    SshSigner,
    /// The record store.
    RecordStore,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X509Signer => "x509 signer",
            Self::SshSigner => "ssh signer",
            Self::RecordStore => "record store",
        })
    }
}

type X509SignerFactory = Arc<
    dyn Fn(&CertManagerConfig) -> std::result::Result<Arc<dyn X509CertSigner>, FactoryError>
        + Send
        + Sync,
>;

type SshSignerFactory = Arc<
    dyn Fn(
            &CertManagerConfig,
            Arc<dyn Authorizer>,
        ) -> std::result::Result<Arc<dyn SshSigner>, FactoryError>
        + Send
        + Sync,
>;

type RecordStoreFactory = Arc<
    dyn Fn(
            &CertManagerConfig,
            Arc<dyn PrivateKeyStore>,
        ) -> std::result::Result<Arc<dyn CertRecordStore>, FactoryError>
        + Send
        + Sync,
>;

/// Maps backend identifiers to factory closures.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    x509_signers: HashMap<String, X509SignerFactory>,
    ssh_signers: HashMap<String, SshSignerFactory>,
    record_stores: HashMap<String, RecordStoreFactory>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut x509: Vec<_> = self.x509_signers.keys().collect();
        let mut ssh: Vec<_> = self.ssh_signers.keys().collect();
        let mut stores: Vec<_> = self.record_stores.keys().collect();
        x509.sort();
        ssh.sort();
        stores.sort();
        f.debug_struct("BackendRegistry")
            .field("x509_signers", &x509)
            .field("ssh_signers", &ssh)
            .field("record_stores", &stores)
            .finish()
    }
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the `memory` and `file` record stores.
    ///
    /// The `file` store requires `record_store_dir`.
    #[must_use]
    pub fn with_builtin_stores() -> Self {
        let mut registry = Self::new();
        registry.register_record_store(MEMORY_STORE, |_, _| {
            Ok(Arc::new(MemoryCertRecordStore::new()))
        });
        registry.register_record_store(FILE_STORE, |config, _| {
            let dir = config
                .record_store_dir
                .as_ref()
                .ok_or("record_store_dir is required by the file record store")?;
            Ok(Arc::new(FileCertRecordStore::open(dir)?))
        });
        registry
    }

    /// Registers an X.509 signer factory, replacing any previous one under `id`.
    pub fn register_x509_signer<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&CertManagerConfig) -> std::result::Result<Arc<dyn X509CertSigner>, FactoryError>
            + Send
            + Sync
            + 'static,
    {
        self.x509_signers.insert(id.into(), Arc::new(factory));
        self
    }

    /// Registers an SSH signer factory, replacing any previous one under `id`.
    pub fn register_ssh_signer<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(
                &CertManagerConfig,
                Arc<dyn Authorizer>,
            ) -> std::result::Result<Arc<dyn SshSigner>, FactoryError>
            + Send
            + Sync
            + 'static,
    {
        self.ssh_signers.insert(id.into(), Arc::new(factory));
        self
    }

    /// Registers a record store factory, replacing any previous one under `id`.
    pub fn register_record_store<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(
                &CertManagerConfig,
                Arc<dyn PrivateKeyStore>,
            ) -> std::result::Result<Arc<dyn CertRecordStore>, FactoryError>
            + Send
            + Sync
            + 'static,
    {
        self.record_stores.insert(id.into(), Arc::new(factory));
        self
    }

    /// Returns `true` if a record store is registered under `id`.
    #[must_use]
    pub fn has_record_store(&self, id: &str) -> bool {
        self.record_stores.contains_key(id)
    }

    pub(crate) fn create_x509_signer(
        &self,
        config: &CertManagerConfig,
    ) -> Result<Arc<dyn X509CertSigner>> {
        let id = config.x509_signer.as_str();
        let factory = self.x509_signers.get(id).ok_or_else(|| ManagerError::UnknownBackend {
            kind: BackendKind::X509Signer,
            id: id.to_owned(),
        })?;
        factory(config).map_err(|source| ManagerError::BackendInit {
            kind: BackendKind::X509Signer,
            id: id.to_owned(),
            source,
        })
    }

    pub(crate) fn create_ssh_signer(
        &self,
        config: &CertManagerConfig,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Option<Arc<dyn SshSigner>>> {
        let Some(id) = config.ssh_signer_id() else {
            tracing::warn!("no ssh signer configured, ssh certificates will not be issued");
            return Ok(None);
        };
        let factory = self.ssh_signers.get(id).ok_or_else(|| ManagerError::UnknownBackend {
            kind: BackendKind::SshSigner,
            id: id.to_owned(),
        })?;
        factory(config, authorizer).map(Some).map_err(|source| ManagerError::BackendInit {
            kind: BackendKind::SshSigner,
            id: id.to_owned(),
            source,
        })
    }

    pub(crate) fn create_record_store(
        &self,
        config: &CertManagerConfig,
        key_store: Arc<dyn PrivateKeyStore>,
    ) -> Result<Option<Arc<dyn CertRecordStore>>> {
        let Some(id) = config.record_store_id() else {
            tracing::warn!("no record store configured, certificate records will not be kept");
            return Ok(None);
        };
        let factory = self.record_stores.get(id).ok_or_else(|| ManagerError::UnknownBackend {
            kind: BackendKind::RecordStore,
            id: id.to_owned(),
        })?;
        factory(config, key_store).map(Some).map_err(|source| ManagerError::BackendInit {
            kind: BackendKind::RecordStore,
            id: id.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil::{MockX509Signer, StaticKeyStore};

    fn key_store() -> Arc<dyn PrivateKeyStore> {
        Arc::new(StaticKeyStore::default())
    }

    #[test]
    fn test_unknown_x509_signer_is_fatal() {
        let registry = BackendRegistry::new();
        let config = CertManagerConfig::builder().x509_signer("hsm").build();

        let err = registry.create_x509_signer(&config).err().expect("unknown id");
        assert!(matches!(
            err,
            ManagerError::UnknownBackend { kind: BackendKind::X509Signer, ref id } if id == "hsm"
        ));
    }

    #[test]
    fn test_x509_factory_failure_is_fatal() {
        let mut registry = BackendRegistry::new();
        registry.register_x509_signer("broken", |_| Err("ca key missing".into()));
        let config = CertManagerConfig::builder().x509_signer("broken").build();

        let err = registry.create_x509_signer(&config).err().expect("factory failure");
        assert!(matches!(err, ManagerError::BackendInit { kind: BackendKind::X509Signer, .. }));
    }

    #[test]
    fn test_registered_x509_signer_resolves() {
        let mut registry = BackendRegistry::new();
        registry.register_x509_signer("mock", |_| Ok(Arc::new(MockX509Signer::new())));
        let config = CertManagerConfig::builder().x509_signer("mock").build();

        let signer = registry.create_x509_signer(&config).expect("signer");
        assert_eq!(signer.max_cert_expiry_time_mins(), MockX509Signer::DEFAULT_MAX_EXPIRY_MINS);
    }

    #[test]
    fn test_unset_store_is_absent() {
        let registry = BackendRegistry::with_builtin_stores();
        let config = CertManagerConfig::builder().x509_signer("mock").build();

        assert!(registry.create_record_store(&config, key_store()).expect("no error").is_none());
    }

    #[test]
    fn test_unknown_store_is_fatal() {
        let registry = BackendRegistry::with_builtin_stores();
        let config = CertManagerConfig::builder().x509_signer("mock").record_store("mysql").build();

        let err = registry.create_record_store(&config, key_store()).err().expect("unknown id");
        assert!(matches!(err, ManagerError::UnknownBackend { kind: BackendKind::RecordStore, .. }));
    }

    #[test]
    fn test_file_store_requires_directory() {
        let registry = BackendRegistry::with_builtin_stores();
        let config = CertManagerConfig::builder().x509_signer("mock").record_store("file").build();

        let err = registry.create_record_store(&config, key_store()).err().expect("missing dir");
        assert!(matches!(err, ManagerError::BackendInit { kind: BackendKind::RecordStore, .. }));
    }

    #[test]
    fn test_file_store_resolves_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BackendRegistry::with_builtin_stores();
        let config = CertManagerConfig::builder()
            .x509_signer("mock")
            .record_store("file")
            .record_store_dir(dir.path().join("records"))
            .build();

        let store = registry.create_record_store(&config, key_store()).expect("store");
        assert!(store.is_some());
        assert!(dir.path().join("records").is_dir());
    }

    #[test]
    fn test_store_factory_receives_key_store() {
        let mut registry = BackendRegistry::new();
        registry.register_record_store("secret", |_, keys| {
            keys.get_application_secret("certissue", "db_password").ok_or("no password")?;
            Ok(Arc::new(MemoryCertRecordStore::new()))
        });
        let config = CertManagerConfig::builder().x509_signer("mock").record_store("secret").build();

        assert!(registry.create_record_store(&config, key_store()).is_err());

        let keys: Arc<dyn PrivateKeyStore> =
            Arc::new(StaticKeyStore::default().with_secret("certissue", "db_password", "hunter2"));
        assert!(registry.create_record_store(&config, keys).expect("store").is_some());
    }

    #[test]
    fn test_debug_lists_identifiers() {
        let registry = BackendRegistry::with_builtin_stores();
        let debug = format!("{registry:?}");
        assert!(debug.contains("memory"));
        assert!(debug.contains("file"));
    }
}
