//! Signing backend traits and their request/response types.
//!
//! The manager never signs anything itself. It resolves one
//! [`X509CertSigner`] and at most one [`SshSigner`] through the
//! [`BackendRegistry`](crate::BackendRegistry) at startup and delegates to
//! them.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{SignerError, SshSignerError},
    principal::Principal,
};

/// Requested key usage of an X.509 certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUsage {
    /// TLS client authentication only.
    Client,
    /// TLS server authentication (and client).
    Server,
}

/// SSH certificate flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SshCertType {
    /// Host certificate, presented by servers.
    Host,
    /// User certificate, presented by clients.
    User,
}

impl SshCertType {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::User => "user",
        }
    }
}

impl fmt::Display for SshCertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SshCertType {
    type Err = SshSignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "user" => Ok(Self::User),
            other => Err(SshSignerError::invalid_request(format!("unknown certificate type: {other}"))),
        }
    }
}

/// SSH certificate signing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct SshCertRequest {
    /// Encoded signing request (public key plus requested attributes).
    #[builder(into)]
    pub csr: String,
    /// Principals the certificate should be valid for.
    #[builder(default)]
    #[serde(default)]
    pub principals: Vec<String>,
}

/// One signed SSH certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCertificate {
    /// OpenSSH-encoded certificate.
    pub certificate: String,
    /// Key id embedded in the certificate.
    #[serde(default)]
    pub key_id: Option<String>,
}

/// Result of an SSH signing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCertificates {
    /// Issued certificates, first one is primary.
    pub certificates: Vec<SshCertificate>,
}

impl SshCertificates {
    /// Returns the primary certificate, if any.
    #[must_use]
    pub fn first(&self) -> Option<&SshCertificate> {
        self.certificates.first()
    }
}

/// X.509 signing backend.
#[async_trait]
pub trait X509CertSigner: Send + Sync {
    /// Signs `csr` and returns the certificate PEM.
    ///
    /// `expiry_mins` of zero selects the backend default.
    async fn generate_x509_certificate(
        &self,
        csr: &str,
        key_usage: Option<KeyUsage>,
        expiry_mins: u32,
    ) -> Result<String, SignerError>;

    /// Returns the PEM chain of the issuing CA.
    async fn get_ca_certificate(&self) -> Result<String, SignerError>;

    /// Longest validity, in minutes, of any certificate this backend issues.
    fn max_cert_expiry_time_mins(&self) -> u32;
}

/// SSH signing backend.
///
/// Implementations receive the [`Authorizer`](crate::Authorizer) at
/// construction and make their own authorization decisions.
#[async_trait]
pub trait SshSigner: Send + Sync {
    /// Signs an SSH request for `principal`.
    async fn generate_certificate(
        &self,
        principal: &Principal,
        request: &SshCertRequest,
        cert_type: Option<SshCertType>,
    ) -> Result<SshCertificates, SshSignerError>;

    /// Returns the CA public key used for `cert_type` certificates.
    async fn get_signer_certificate(&self, cert_type: SshCertType)
    -> Result<String, SshSignerError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("host", SshCertType::Host)]
    #[case("USER", SshCertType::User)]
    #[case("User", SshCertType::User)]
    fn test_cert_type_parse(#[case] input: &str, #[case] expected: SshCertType) {
        assert_eq!(input.parse::<SshCertType>().expect("parse"), expected);
    }

    #[test]
    fn test_cert_type_parse_rejects_unknown() {
        let err = "bastion".parse::<SshCertType>().expect_err("unknown type");
        assert!(matches!(err, SshSignerError::InvalidRequest { .. }));
    }

    #[test]
    fn test_cert_type_display_round_trips() {
        for cert_type in [SshCertType::Host, SshCertType::User] {
            assert_eq!(cert_type.to_string().parse::<SshCertType>().expect("parse"), cert_type);
        }
    }

    #[test]
    fn test_request_builder_defaults() {
        let request = SshCertRequest::builder().csr("ssh-csr").build();
        assert!(request.principals.is_empty());
    }
}
