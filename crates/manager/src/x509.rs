//! X.509 helpers: PEM bundle normalization and certificate inspection.

use chrono::{DateTime, Utc};
use pem::{EncodeConfig, LineEnding, Pem};
use thiserror::Error;
use x509_parser::{certificate::X509Certificate, extensions::GeneralName};

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const INSTANCE_ID_URI_SCHEME: &str = "instanceid://";
const INSTANCE_ID_URI_AUTHORITY: &str = "://instanceid/";
const INSTANCE_ID_DNS_LABEL: &str = ".instanceid.";

/// A PEM document could not be turned into certificates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CertificateError {
    /// The PEM framing is malformed.
    #[error("Malformed PEM: {0}")]
    Pem(#[from] pem::PemError),

    /// The document contains no PEM blocks.
    #[error("No certificates found")]
    Empty,

    /// A block carries something other than a certificate.
    #[error("Unexpected PEM block: {0}")]
    UnexpectedTag(String),

    /// A certificate block holds invalid DER.
    #[error("Invalid certificate: {0}")]
    Der(String),
}

fn decode(block: &Pem) -> Result<X509Certificate<'_>, CertificateError> {
    if block.tag() != CERTIFICATE_TAG {
        return Err(CertificateError::UnexpectedTag(block.tag().to_owned()));
    }
    x509_parser::parse_x509_certificate(block.contents())
        .map(|(_, cert)| cert)
        .map_err(|e| CertificateError::Der(e.to_string()))
}

/// Validates every certificate in `data` and re-encodes the set.
///
/// Text outside PEM blocks is dropped and lines end with `\n`.
///
/// # Errors
///
/// Fails if `data` holds no blocks, a block is not a certificate, or a
/// certificate does not parse.
pub fn normalize_pem_bundle(data: &[u8]) -> Result<String, CertificateError> {
    let blocks = pem::parse_many(data)?;
    if blocks.is_empty() {
        return Err(CertificateError::Empty);
    }
    for block in &blocks {
        decode(block)?;
    }
    Ok(pem::encode_many_config(&blocks, EncodeConfig::new().set_line_ending(LineEnding::LF)))
}

/// Fields of a leaf certificate the issuance path cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Decimal serial number.
    pub serial: String,
    /// RFC 4514 subject.
    pub subject: String,
    /// First subject common name.
    pub common_name: Option<String>,
    /// SAN DNS names.
    pub dns_names: Vec<String>,
    /// SAN URIs.
    pub uris: Vec<String>,
    /// End of validity.
    pub not_after: Option<DateTime<Utc>>,
}

impl CertificateInfo {
    /// Parses the first certificate of a PEM document.
    ///
    /// # Errors
    ///
    /// See [`CertificateError`].
    pub fn from_pem(cert_pem: &str) -> Result<Self, CertificateError> {
        let block = pem::parse(cert_pem)?;
        let cert = decode(&block)?;

        let mut dns_names = Vec::new();
        let mut uris = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push((*dns).to_owned()),
                    GeneralName::URI(uri) => uris.push((*uri).to_owned()),
                    _ => {},
                }
            }
        }

        Ok(Self {
            serial: cert.tbs_certificate.serial.to_string(),
            subject: cert.subject().to_string(),
            common_name: cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_owned),
            dns_names,
            uris,
            not_after: DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0),
        })
    }

    /// Instance id encoded in the SAN entries.
    ///
    /// Recognized layouts, in order of precedence:
    /// - URI `instanceid://<provider>/<id>`, this crate's own form
    /// - URI `<scheme>://instanceid/<provider>/<id>`, as issued by other
    ///   deployments that keep their scheme and put `instanceid` in the
    ///   authority
    /// - DNS name `<id>.instanceid.<suffix>`
    ///
    /// The id is the last path segment of the URI forms.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        let from_uri = self.uris.iter().find_map(|uri| {
            let path = uri.strip_prefix(INSTANCE_ID_URI_SCHEME).or_else(|| {
                let (scheme, rest) = uri.split_once(INSTANCE_ID_URI_AUTHORITY)?;
                Some(rest).filter(|_| !scheme.is_empty() && !scheme.contains('/'))
            })?;
            path.rsplit('/').next().filter(|id| !id.is_empty() && path.contains('/'))
        });
        from_uri.or_else(|| {
            self.dns_names.iter().find_map(|dns| {
                let (id, _) = dns.split_once(INSTANCE_ID_DNS_LABEL)?;
                Some(id).filter(|id| !id.is_empty() && !id.contains('.'))
            })
        })
    }
}
