//! Issued credential set returned to an instance.

use serde::{Deserialize, Serialize};

/// Credentials handed to a workload on registration or refresh.
///
/// Signer fields are filled only when the corresponding response flag is on
/// and the signer chain could be obtained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    /// Service identity (`domain.service`) the credentials were issued for.
    pub name: String,
    /// Provider-assigned instance identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Provider service that launched the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Issued X.509 certificate PEM.
    pub x509_certificate: String,
    /// Issuing CA chain PEM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x509_certificate_signer: Option<String>,
    /// Issued SSH certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_certificate: Option<String>,
    /// SSH CA public key that signed `ssh_certificate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_certificate_signer: Option<String>,
}

impl InstanceIdentity {
    /// Creates an identity carrying only the X.509 certificate.
    #[must_use]
    pub fn new(name: impl Into<String>, x509_certificate: impl Into<String>) -> Self {
        Self { name: name.into(), x509_certificate: x509_certificate.into(), ..Self::default() }
    }
}
