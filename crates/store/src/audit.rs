//! Certificate issuance audit events.
//!
//! The issuance path hands every successfully issued certificate to the
//! record store's [`log`](crate::CertRecordStore::log) hook. Backends that
//! keep a durable audit trail override the hook; the default emits a
//! structured `tracing` event through [`emit_tracing_event`].
//!
//! Field mapping of the tracing event:
//! - `audit.timestamp` : ISO 8601 timestamp
//! - `audit.actor` : full name of the requesting principal, or `-`
//! - `audit.action` : always `issue_x509_cert`
//! - `audit.resource` : `provider/instance_id`
//! - `audit.ip` : source address of the request
//! - `audit.serial` / `audit.subject` : certificate details when known

use chrono::{DateTime, Utc};

/// Action label used for issuance audit events.
pub const ISSUE_ACTION: &str = "issue_x509_cert";

/// A single issuance audit record.
#[derive(Debug, Clone, bon::Builder)]
pub struct CertLogEvent {
    /// When the certificate was issued (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Full name of the requesting principal, when authenticated.
    #[builder(into)]
    pub principal: Option<String>,
    /// Source address of the request.
    #[builder(into)]
    pub ip: String,
    /// Provider that launched the instance.
    #[builder(into)]
    pub provider: String,
    /// Provider-assigned instance identifier.
    #[builder(into)]
    pub instance_id: String,
    /// Serial number of the issued certificate, if it could be read.
    #[builder(into)]
    pub serial: Option<String>,
    /// Subject of the issued certificate, if it could be read.
    #[builder(into)]
    pub subject: Option<String>,
}

impl CertLogEvent {
    /// Resource identifier for the event (`provider/instance_id`).
    #[must_use]
    pub fn resource(&self) -> String {
        format!("{}/{}", self.provider, self.instance_id)
    }
}

/// Emits `event` as an INFO-level structured `tracing` event.
pub fn emit_tracing_event(event: &CertLogEvent) {
    tracing::info!(
        audit.timestamp = %event.timestamp.to_rfc3339(),
        audit.actor = event.principal.as_deref().unwrap_or("-"),
        audit.action = ISSUE_ACTION,
        audit.resource = %event.resource(),
        audit.ip = %event.ip,
        audit.serial = event.serial.as_deref().unwrap_or("-"),
        audit.subject = event.subject.as_deref().unwrap_or("-"),
        "audit_event"
    );
}
