//! Manager configuration.
//!
//! [`CertManagerConfig`] is the single, explicit configuration snapshot the
//! manager is built from. Nothing below the manager reads configuration on
//! its own.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, Result};

/// Default interval between expired-record cleanup runs (24 hours).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for [`InstanceCertManager`](crate::InstanceCertManager).
///
/// Backend identifiers are resolved through the
/// [`BackendRegistry`](crate::BackendRegistry). Every `*_file` field is
/// optional; a configured file that cannot be loaded is a startup error.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use certissue_manager::CertManagerConfig;
///
/// let config = CertManagerConfig::builder()
///     .x509_signer("local")
///     .record_store("memory")
///     .cleanup_interval(Duration::from_secs(3600))
///     .build();
///
/// assert!(config.validate().is_ok());
/// assert!(config.response_send_x509_signer_certs);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct CertManagerConfig {
    /// Identifier of the X.509 signer factory.
    #[builder(into)]
    pub x509_signer: String,

    /// Identifier of the SSH signer factory. Unset disables SSH issuance.
    #[builder(into)]
    #[serde(default)]
    pub ssh_signer: Option<String>,

    /// Identifier of the record store factory. Unset runs without records.
    #[builder(into)]
    #[serde(default)]
    pub record_store: Option<String>,

    /// Directory used by the `file` record store.
    #[builder(into)]
    #[serde(default)]
    pub record_store_dir: Option<PathBuf>,

    /// CA bundle descriptor file.
    #[builder(into)]
    #[serde(default)]
    pub ca_bundles_file: Option<PathBuf>,

    /// Allowed source ranges for certificate refresh.
    #[builder(into)]
    #[serde(default)]
    pub cert_refresh_ip_file: Option<PathBuf>,

    /// Provider to allowed source range map for instance registration.
    #[builder(into)]
    #[serde(default)]
    pub instance_cert_ip_file: Option<PathBuf>,

    /// Static X.509 CA chain returned instead of querying the signer.
    #[builder(into)]
    #[serde(default)]
    pub x509_ca_cert_file: Option<PathBuf>,

    /// Static SSH user CA key returned instead of querying the signer.
    #[builder(into)]
    #[serde(default)]
    pub ssh_user_ca_cert_file: Option<PathBuf>,

    /// Static SSH host CA key returned instead of querying the signer.
    #[builder(into)]
    #[serde(default)]
    pub ssh_host_ca_cert_file: Option<PathBuf>,

    /// Include the X.509 signer chain in issuance responses.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub response_send_x509_signer_certs: bool,

    /// Include the SSH CA key in issuance responses.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub response_send_ssh_signer_certs: bool,

    /// Read-only deployments never modify the store, so the cleaner is not started.
    #[builder(default)]
    #[serde(default)]
    pub read_only: bool,

    /// Interval between expired-record cleanup runs.
    #[builder(default = DEFAULT_CLEANUP_INTERVAL)]
    #[serde(with = "humantime_serde", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    DEFAULT_CLEANUP_INTERVAL
}

impl CertManagerConfig {
    /// Reads a JSON configuration file and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::FileRead`], [`ManagerError::Parse`] or
    /// [`ManagerError::InvalidConfig`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| ManagerError::file_read(path, e))?;
        let config: Self = serde_json::from_slice(&data).map_err(|e| ManagerError::parse(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidConfig`] if the X.509 signer id is
    /// empty or the cleanup interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.x509_signer.trim().is_empty() {
            return Err(ManagerError::InvalidConfig("x509_signer cannot be empty".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ManagerError::InvalidConfig("cleanup_interval must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn ssh_signer_id(&self) -> Option<&str> {
        self.ssh_signer.as_deref().filter(|id| !id.is_empty())
    }

    pub(crate) fn record_store_id(&self) -> Option<&str> {
        self.record_store.as_deref().filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = CertManagerConfig::builder().x509_signer("local").build();

        assert!(config.ssh_signer.is_none());
        assert!(config.record_store.is_none());
        assert!(config.response_send_x509_signer_certs);
        assert!(config.response_send_ssh_signer_certs);
        assert!(!config.read_only);
        assert_eq!(config.cleanup_interval, DEFAULT_CLEANUP_INTERVAL);
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let json = r#"{ "x509_signer": "local", "cleanup_interval": "12h" }"#;
        let config: CertManagerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.cleanup_interval, Duration::from_secs(12 * 60 * 60));
        assert!(config.response_send_ssh_signer_certs);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{ "x509_signer": "local", "x509_signer_class": "com.example" }"#;
        assert!(serde_json::from_str::<CertManagerConfig>(json).is_err());
    }

    #[test]
    fn test_validate_empty_signer() {
        let config = CertManagerConfig::builder().x509_signer("  ").build();
        assert!(matches!(config.validate(), Err(ManagerError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_zero_interval() {
        let config =
            CertManagerConfig::builder().x509_signer("local").cleanup_interval(Duration::ZERO).build();
        assert!(matches!(config.validate(), Err(ManagerError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "x509_signer": "local", "record_store": "memory", "read_only": true }}"#
        )
        .unwrap();

        let config = CertManagerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.record_store_id(), Some("memory"));
        assert!(config.read_only);
    }

    #[test]
    fn test_from_file_missing() {
        let result = CertManagerConfig::from_file("/nonexistent/certissue.json");
        assert!(matches!(result, Err(ManagerError::FileRead { .. })));
    }

    #[test]
    fn test_empty_identifiers_count_as_unset() {
        let config =
            CertManagerConfig::builder().x509_signer("local").ssh_signer("").record_store("").build();
        assert!(config.ssh_signer_id().is_none());
        assert!(config.record_store_id().is_none());
    }
}
