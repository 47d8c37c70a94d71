//! Shared test utilities for the issuance core.
//!
//! Mock signing backends with call counters and switchable failures, a
//! table-driven authorizer, an in-memory key store and `rcgen` helpers that
//! mint real certificates. Feature-gated behind `testutil`:
//!
//! ```toml
//! [dev-dependencies]
//! certissue-manager = { path = "../manager", features = ["testutil"] }
//! ```

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SanType};
use zeroize::Zeroizing;

use crate::{
    error::{SignerError, SshSignerError},
    principal::{Authorizer, Principal, PrivateKeyStore},
    signer::{
        KeyUsage, SshCertRequest, SshCertType, SshCertificate, SshCertificates, SshSigner,
        X509CertSigner,
    },
};

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

/// Mints a self-signed CA certificate and returns its PEM.
///
/// # Panics
///
/// Panics if key generation or signing fails.
#[must_use]
pub fn mint_ca_certificate(common_name: &str) -> String {
    let mut params = CertificateParams::new(Vec::default()).expect("CA params");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, common_name);
    let key_pair = KeyPair::generate().expect("key pair");
    params.self_signed(&key_pair).expect("self-signed CA").pem()
}

/// Mints a self-signed leaf certificate with the given SAN entries.
///
/// # Panics
///
/// Panics if a SAN value is not valid IA5 text or signing fails.
#[must_use]
pub fn mint_instance_certificate(common_name: &str, dns_names: &[&str], uris: &[&str]) -> String {
    let mut params = CertificateParams::new(Vec::default()).expect("leaf params");
    params.distinguished_name.push(DnType::CommonName, common_name);
    for dns in dns_names {
        params.subject_alt_names.push(SanType::DnsName((*dns).try_into().expect("dns name")));
    }
    for uri in uris {
        params.subject_alt_names.push(SanType::URI((*uri).try_into().expect("uri")));
    }
    let key_pair = KeyPair::generate().expect("key pair");
    params.self_signed(&key_pair).expect("self-signed leaf").pem()
}

// ---------------------------------------------------------------------------
// X.509 signer
// ---------------------------------------------------------------------------

/// Scriptable [`X509CertSigner`].
///
/// Issues a fixed certificate, returns a fixed CA chain and counts calls.
/// Failures and an artificial CA fetch delay can be toggled while the
/// signer is shared.
#[derive(Debug)]
pub struct MockX509Signer {
    certificate: Mutex<String>,
    ca_chain: String,
    max_expiry_mins: u32,
    ca_delay: Option<Duration>,
    fail_issue: AtomicBool,
    fail_ca: AtomicBool,
    issue_calls: AtomicUsize,
    ca_calls: AtomicUsize,
    last_request: Mutex<Option<(Option<KeyUsage>, u32)>>,
}

impl Default for MockX509Signer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockX509Signer {
    /// Default value of [`X509CertSigner::max_cert_expiry_time_mins`] (30 days).
    pub const DEFAULT_MAX_EXPIRY_MINS: u32 = 30 * 24 * 60;

    /// Certificate PEM issued by default.
    pub const CERTIFICATE: &'static str =
        "-----BEGIN CERTIFICATE-----\nbW9jayBjZXJ0\n-----END CERTIFICATE-----\n";

    /// CA chain returned by default.
    pub const CA_CHAIN: &'static str =
        "-----BEGIN CERTIFICATE-----\nbW9jayBjYQ==\n-----END CERTIFICATE-----\n";

    /// Creates a signer that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            certificate: Mutex::new(Self::CERTIFICATE.to_owned()),
            ca_chain: Self::CA_CHAIN.to_owned(),
            max_expiry_mins: Self::DEFAULT_MAX_EXPIRY_MINS,
            ca_delay: None,
            fail_issue: AtomicBool::new(false),
            fail_ca: AtomicBool::new(false),
            issue_calls: AtomicUsize::new(0),
            ca_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Sets the CA chain returned by `get_ca_certificate`.
    #[must_use]
    pub fn with_ca_chain(mut self, chain: impl Into<String>) -> Self {
        self.ca_chain = chain.into();
        self
    }

    /// Sets the maximum certificate lifetime.
    #[must_use]
    pub fn with_max_expiry_mins(mut self, mins: u32) -> Self {
        self.max_expiry_mins = mins;
        self
    }

    /// Delays every CA fetch, widening race windows in concurrency tests.
    #[must_use]
    pub fn with_ca_delay(mut self, delay: Duration) -> Self {
        self.ca_delay = Some(delay);
        self
    }

    /// Replaces the certificate returned by issuance.
    pub fn set_certificate(&self, pem: impl Into<String>) {
        *self.certificate.lock() = pem.into();
    }

    /// Makes issuance fail or succeed.
    pub fn set_fail_issue(&self, fail: bool) {
        self.fail_issue.store(fail, Ordering::Release);
    }

    /// Makes CA fetches fail or succeed.
    pub fn set_fail_ca(&self, fail: bool) {
        self.fail_ca.store(fail, Ordering::Release);
    }

    /// Number of issuance calls.
    #[must_use]
    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::Acquire)
    }

    /// Number of CA fetches.
    #[must_use]
    pub fn ca_calls(&self) -> usize {
        self.ca_calls.load(Ordering::Acquire)
    }

    /// Key usage and expiry of the most recent issuance call.
    #[must_use]
    pub fn last_request(&self) -> Option<(Option<KeyUsage>, u32)> {
        *self.last_request.lock()
    }
}

#[async_trait]
impl X509CertSigner for MockX509Signer {
    async fn generate_x509_certificate(
        &self,
        _csr: &str,
        key_usage: Option<KeyUsage>,
        expiry_mins: u32,
    ) -> Result<String, SignerError> {
        self.issue_calls.fetch_add(1, Ordering::AcqRel);
        *self.last_request.lock() = Some((key_usage, expiry_mins));
        if self.fail_issue.load(Ordering::Acquire) {
            return Err(SignerError::unavailable("mock signer offline"));
        }
        Ok(self.certificate.lock().clone())
    }

    async fn get_ca_certificate(&self) -> Result<String, SignerError> {
        self.ca_calls.fetch_add(1, Ordering::AcqRel);
        if let Some(delay) = self.ca_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_ca.load(Ordering::Acquire) {
            return Err(SignerError::unavailable("mock CA offline"));
        }
        Ok(self.ca_chain.clone())
    }

    fn max_cert_expiry_time_mins(&self) -> u32 {
        self.max_expiry_mins
    }
}

// ---------------------------------------------------------------------------
// SSH signer
// ---------------------------------------------------------------------------

/// Scriptable [`SshSigner`].
#[derive(Debug)]
pub struct MockSshSigner {
    certificates: Mutex<Vec<SshCertificate>>,
    error: Mutex<Option<SshSignerError>>,
    fail_signer_certs: AtomicBool,
    sign_calls: AtomicUsize,
    host_ca_calls: AtomicUsize,
    user_ca_calls: AtomicUsize,
    last_cert_type: Mutex<Option<SshCertType>>,
}

impl Default for MockSshSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSshSigner {
    /// SSH certificate issued by default.
    pub const CERTIFICATE: &'static str = "ssh-ed25519-cert-v01@openssh.com AAAAmock";

    /// Host CA key returned by default.
    pub const HOST_CA: &'static str = "ssh-ed25519 AAAAhostca";

    /// User CA key returned by default.
    pub const USER_CA: &'static str = "ssh-ed25519 AAAAuserca";

    /// Creates a signer that issues one certificate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            certificates: Mutex::new(vec![SshCertificate {
                certificate: Self::CERTIFICATE.to_owned(),
                key_id: Some("mock".to_owned()),
            }]),
            error: Mutex::new(None),
            fail_signer_certs: AtomicBool::new(false),
            sign_calls: AtomicUsize::new(0),
            host_ca_calls: AtomicUsize::new(0),
            user_ca_calls: AtomicUsize::new(0),
            last_cert_type: Mutex::new(None),
        }
    }

    /// Replaces the issued certificates; an empty list yields an empty response.
    pub fn set_certificates(&self, certificates: Vec<SshCertificate>) {
        *self.certificates.lock() = certificates;
    }

    /// Makes signing fail with `error`, or succeed again with `None`.
    pub fn set_error(&self, error: Option<SshSignerError>) {
        *self.error.lock() = error;
    }

    /// Makes CA key fetches fail or succeed.
    pub fn set_fail_signer_certs(&self, fail: bool) {
        self.fail_signer_certs.store(fail, Ordering::Release);
    }

    /// Number of signing calls.
    #[must_use]
    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::Acquire)
    }

    /// Number of CA key fetches for `cert_type`.
    #[must_use]
    pub fn signer_cert_calls(&self, cert_type: SshCertType) -> usize {
        match cert_type {
            SshCertType::Host => self.host_ca_calls.load(Ordering::Acquire),
            SshCertType::User => self.user_ca_calls.load(Ordering::Acquire),
        }
    }

    /// Certificate type passed to the most recent signing call.
    #[must_use]
    pub fn last_cert_type(&self) -> Option<SshCertType> {
        *self.last_cert_type.lock()
    }
}

#[async_trait]
impl SshSigner for MockSshSigner {
    async fn generate_certificate(
        &self,
        _principal: &Principal,
        _request: &SshCertRequest,
        cert_type: Option<SshCertType>,
    ) -> Result<SshCertificates, SshSignerError> {
        self.sign_calls.fetch_add(1, Ordering::AcqRel);
        *self.last_cert_type.lock() = cert_type;
        if let Some(err) = self.error.lock().clone() {
            return Err(err);
        }
        Ok(SshCertificates { certificates: self.certificates.lock().clone() })
    }

    async fn get_signer_certificate(
        &self,
        cert_type: SshCertType,
    ) -> Result<String, SshSignerError> {
        let (counter, key) = match cert_type {
            SshCertType::Host => (&self.host_ca_calls, Self::HOST_CA),
            SshCertType::User => (&self.user_ca_calls, Self::USER_CA),
        };
        counter.fetch_add(1, Ordering::AcqRel);
        if self.fail_signer_certs.load(Ordering::Acquire) {
            return Err(SshSignerError::signing_backend(503, "mock CA offline"));
        }
        Ok(key.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Authorizer and key store
// ---------------------------------------------------------------------------

/// [`Authorizer`] backed by a table of allowed `(action, resource)` pairs.
///
/// Every check is recorded as `"action resource"` so tests can assert the
/// order and short-circuiting of authorization checks.
#[derive(Debug, Default)]
pub struct StaticAuthorizer {
    allow_all: bool,
    allowed: HashSet<(String, String)>,
    checks: Mutex<Vec<String>>,
}

impl StaticAuthorizer {
    /// Authorizer that allows everything.
    #[must_use]
    pub fn allow_all() -> Self {
        Self { allow_all: true, ..Self::default() }
    }

    /// Authorizer that denies everything not added with [`allow`](Self::allow).
    #[must_use]
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Allows `action` on `resource` for every principal.
    #[must_use]
    pub fn allow(mut self, action: &str, resource: &str) -> Self {
        self.allowed.insert((action.to_owned(), resource.to_owned()));
        self
    }

    /// Checks performed so far, as `"action resource"`.
    #[must_use]
    pub fn checks(&self) -> Vec<String> {
        self.checks.lock().clone()
    }
}

impl Authorizer for StaticAuthorizer {
    fn access(
        &self,
        action: &str,
        resource: &str,
        _principal: &Principal,
        _trust_domain: Option<&str>,
    ) -> bool {
        self.checks.lock().push(format!("{action} {resource}"));
        self.allow_all || self.allowed.contains(&(action.to_owned(), resource.to_owned()))
    }
}

/// In-memory [`PrivateKeyStore`].
#[derive(Debug, Default, Clone)]
pub struct StaticKeyStore {
    secrets: HashMap<(String, String), String>,
}

impl StaticKeyStore {
    /// Adds a secret.
    #[must_use]
    pub fn with_secret(mut self, app_name: &str, key_name: &str, value: &str) -> Self {
        self.secrets.insert((app_name.to_owned(), key_name.to_owned()), value.to_owned());
        self
    }
}

impl PrivateKeyStore for StaticKeyStore {
    fn get_application_secret(&self, app_name: &str, key_name: &str) -> Option<Zeroizing<String>> {
        self.secrets
            .get(&(app_name.to_owned(), key_name.to_owned()))
            .map(|value| Zeroizing::new(value.clone()))
    }
}

/// Shared handles to the mocks a test wants to inspect after handing them
/// to a [`BackendRegistry`](crate::BackendRegistry).
#[derive(Clone)]
pub struct MockBackends {
    /// X.509 signer registered as `mock`.
    pub x509: Arc<MockX509Signer>,
    /// SSH signer registered as `mock`.
    pub ssh: Arc<MockSshSigner>,
    /// Memory store registered as `mock`.
    pub store: certissue_store::MemoryCertRecordStore,
}

impl MockBackends {
    /// Identifier every mock is registered under.
    pub const ID: &'static str = "mock";

    /// Creates fresh mocks.
    #[must_use]
    pub fn new() -> Self {
        Self::with_x509(MockX509Signer::new())
    }

    /// Creates mocks around a preconfigured X.509 signer.
    #[must_use]
    pub fn with_x509(x509: MockX509Signer) -> Self {
        Self {
            x509: Arc::new(x509),
            ssh: Arc::new(MockSshSigner::new()),
            store: certissue_store::MemoryCertRecordStore::new(),
        }
    }

    /// Builds a registry with the built-in stores plus every mock under [`Self::ID`].
    #[must_use]
    pub fn registry(&self) -> crate::BackendRegistry {
        let mut registry = crate::BackendRegistry::with_builtin_stores();
        let x509 = Arc::clone(&self.x509);
        let ssh = Arc::clone(&self.ssh);
        let store = self.store.clone();
        registry
            .register_x509_signer(Self::ID, move |_| Ok(x509.clone()))
            .register_ssh_signer(Self::ID, move |_, _| Ok(ssh.clone()))
            .register_record_store(Self::ID, move |_, _| Ok(Arc::new(store.clone())));
        registry
    }
}

impl Default for MockBackends {
    fn default() -> Self {
        Self::new()
    }
}
