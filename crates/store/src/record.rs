//! Issued X.509 certificate record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a record in the store.
///
/// A store holds at most one record per `(provider, instance_id, service)`
/// triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CertRecordKey {
    /// Provider service that launched the instance (e.g. `sys.auth.aws`).
    pub provider: String,
    /// Provider-assigned instance identifier.
    pub instance_id: String,
    /// Service identity the certificate was issued for.
    pub service: String,
}

impl CertRecordKey {
    /// Creates a key from its three components.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        instance_id: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self { provider: provider.into(), instance_id: instance_id.into(), service: service.into() }
    }
}

impl fmt::Display for CertRecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.instance_id, self.service)
    }
}

/// Record of the most recent certificate issued to one instance.
///
/// The record is created on first issuance and updated on every refresh.
/// Keeping the previous serial next to the current one lets the issuance
/// path detect a refresh request that presents an already-superseded
/// certificate, which indicates the credential was copied to another host.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use certissue_store::X509CertRecord;
///
/// let mut record = X509CertRecord::builder()
///     .provider("sys.auth.aws")
///     .instance_id("i-0abc")
///     .service("media.api")
///     .current_serial("1001")
///     .current_ip("10.1.2.3")
///     .expiry_time(Utc::now() + Duration::days(30))
///     .build();
///
/// record.refresh("1002", Some("10.1.2.4".to_owned()), Utc::now() + Duration::days(30));
/// assert_eq!(record.prev_serial.as_deref(), Some("1001"));
/// assert_eq!(record.current_serial, "1002");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct X509CertRecord {
    /// Provider service that launched the instance.
    #[builder(into)]
    pub provider: String,

    /// Provider-assigned instance identifier.
    #[builder(into)]
    pub instance_id: String,

    /// Service identity (`domain.service`) the certificate was issued for.
    #[builder(into)]
    pub service: String,

    /// Serial number of the most recently issued certificate.
    #[builder(into)]
    pub current_serial: String,

    /// When the current certificate was issued.
    #[builder(default = Utc::now())]
    pub current_time: DateTime<Utc>,

    /// Source address of the request that obtained the current certificate.
    #[builder(into)]
    pub current_ip: Option<String>,

    /// Serial number of the certificate the current one replaced.
    #[builder(into)]
    pub prev_serial: Option<String>,

    /// When the previous certificate was issued.
    pub prev_time: Option<DateTime<Utc>>,

    /// Source address of the request that obtained the previous certificate.
    #[builder(into)]
    pub prev_ip: Option<String>,

    /// Whether the certificate was issued with client-only key usage.
    #[builder(default)]
    #[serde(default)]
    pub client_cert: bool,

    /// Expiration of the current certificate.
    pub expiry_time: DateTime<Utc>,

    /// Hostname the instance registered with, if any.
    #[builder(into)]
    #[serde(default)]
    pub hostname: Option<String>,
}

impl X509CertRecord {
    /// Returns the store key of this record.
    #[must_use]
    pub fn key(&self) -> CertRecordKey {
        CertRecordKey::new(&self.provider, &self.instance_id, &self.service)
    }

    /// Rotates the record for a refreshed certificate.
    ///
    /// The current serial, time and address move into the `prev_*` fields.
    pub fn refresh(
        &mut self,
        serial: impl Into<String>,
        ip: Option<String>,
        expiry_time: DateTime<Utc>,
    ) {
        self.prev_serial = Some(std::mem::replace(&mut self.current_serial, serial.into()));
        self.prev_time = Some(std::mem::replace(&mut self.current_time, Utc::now()));
        self.prev_ip = std::mem::replace(&mut self.current_ip, ip);
        self.expiry_time = expiry_time;
    }

    /// Returns `true` if the certificate expired before `cutoff`.
    #[must_use]
    pub fn expired_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.expiry_time < cutoff
    }
}
