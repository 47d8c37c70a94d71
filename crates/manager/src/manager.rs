//! The instance certificate manager facade.
//!
//! [`InstanceCertManager`] owns every component of the issuance core and is
//! the only type the resource layer talks to. Startup is fail-fast: any
//! configured component that cannot be built turns into a [`ManagerError`].
//! At runtime nothing is fatal; backend failures are logged and surface as
//! `None` or `false` for the caller to map onto a response.

use std::{fmt, sync::Arc};

use certissue_store::{CertLogEvent, CertRecordStore, StoreResult, X509CertRecord};

use crate::{
    bundle::{CertificateAuthorityBundle, CertificateAuthorityBundles, load_static_certificate},
    cleaner::{CleanerHandle, ExpiredRecordCleaner},
    config::CertManagerConfig,
    error::{Result, SshSignerError},
    identity::InstanceIdentity,
    ipblock::{IpAllowList, ProviderIpPolicy},
    principal::{Authorizer, Principal, PrivateKeyStore},
    registry::BackendRegistry,
    signer::{KeyUsage, SshCertRequest, SshCertType, SshCertificates, SshSigner, X509CertSigner},
    signer_cache::SignerCertificateCache,
    x509::CertificateInfo,
};

/// Action checked by [`InstanceCertManager::authorize_launch`].
pub const LAUNCH_ACTION: &str = "launch";

/// Resource every provider must be allowed to launch on.
pub const INSTANCE_LAUNCH_RESOURCE: &str = "sys.auth:instance";

/// Issues instance credentials and tracks what was issued.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use certissue_manager::{
///     CertManagerConfig, InstanceCertManager,
///     testutil::{MockBackends, StaticAuthorizer, StaticKeyStore},
/// };
///
/// # async fn example() -> certissue_manager::Result<()> {
/// let backends = MockBackends::new();
/// let config = CertManagerConfig::builder()
///     .x509_signer(MockBackends::ID)
///     .record_store("memory")
///     .build();
///
/// let manager = InstanceCertManager::new(
///     config,
///     &backends.registry(),
///     Arc::new(StaticKeyStore::default()),
///     Arc::new(StaticAuthorizer::allow_all()),
/// )
/// .await?;
///
/// let identity = manager.generate_identity("csr", "media.api", None, 0).await;
/// assert!(identity.is_some());
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct InstanceCertManager {
    x509_signer: Arc<dyn X509CertSigner>,
    ssh_signer: Option<Arc<dyn SshSigner>>,
    store: Option<Arc<dyn CertRecordStore>>,
    authorizer: Arc<dyn Authorizer>,
    bundles: CertificateAuthorityBundles,
    signer_certs: SignerCertificateCache,
    cert_refresh_ips: IpAllowList,
    instance_cert_ips: ProviderIpPolicy,
    send_x509_signer_certs: bool,
    send_ssh_signer_certs: bool,
    cleaner: Option<CleanerHandle>,
}

impl fmt::Debug for InstanceCertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCertManager")
            .field("ssh_signer", &self.ssh_signer.is_some())
            .field("record_store", &self.store.is_some())
            .field("bundles", &self.bundles.len())
            .field("cert_refresh_ips", &self.cert_refresh_ips.len())
            .field("send_x509_signer_certs", &self.send_x509_signer_certs)
            .field("send_ssh_signer_certs", &self.send_ssh_signer_certs)
            .field("cleaner", &self.cleaner.is_some())
            .finish_non_exhaustive()
    }
}

impl InstanceCertManager {
    /// Builds the manager from `config`.
    ///
    /// Backends are resolved through `registry`. The SSH signer factory
    /// receives `authorizer`, the record store factory receives `key_store`.
    /// When a record store is available and the deployment is not read-only,
    /// the expired-record cleaner is started: one run now, then one every
    /// `cleanup_interval`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ManagerError`](crate::ManagerError) hit while
    /// validating the configuration, resolving a configured backend, or
    /// loading a configured file.
    #[tracing::instrument(skip_all, fields(x509_signer = %config.x509_signer))]
    pub async fn new(
        config: CertManagerConfig,
        registry: &BackendRegistry,
        key_store: Arc<dyn PrivateKeyStore>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Self> {
        config.validate()?;

        let x509_signer = registry.create_x509_signer(&config)?;
        let ssh_signer = registry.create_ssh_signer(&config, Arc::clone(&authorizer))?;
        let store = registry.create_record_store(&config, key_store)?;

        let signer_certs = load_signer_certificates(&config)?;
        let bundles = CertificateAuthorityBundles::load(config.ca_bundles_file.as_deref())?;
        let cert_refresh_ips = IpAllowList::load(config.cert_refresh_ip_file.as_deref())?;
        let instance_cert_ips = ProviderIpPolicy::load(config.instance_cert_ip_file.as_deref())?;

        let cleaner = match &store {
            Some(store) if !config.read_only => {
                let expiry_time_mins = x509_signer.max_cert_expiry_time_mins();
                tracing::info!(
                    interval = ?config.cleanup_interval,
                    expiry_time_mins,
                    "starting expired cert record cleaner"
                );
                Some(
                    ExpiredRecordCleaner::new(Arc::clone(store), expiry_time_mins)
                        .spawn(config.cleanup_interval),
                )
            },
            Some(_) => {
                tracing::info!("read-only mode, expired cert record cleaner disabled");
                None
            },
            None => None,
        };

        Ok(Self {
            x509_signer,
            ssh_signer,
            store,
            authorizer,
            bundles,
            signer_certs,
            cert_refresh_ips,
            instance_cert_ips,
            send_x509_signer_certs: config.response_send_x509_signer_certs,
            send_ssh_signer_certs: config.response_send_ssh_signer_certs,
            cleaner,
        })
    }

    /// Returns `true` if an SSH signer is configured.
    #[must_use]
    pub fn has_ssh_signer(&self) -> bool {
        self.ssh_signer.is_some()
    }

    /// Returns `true` if a record store is configured.
    #[must_use]
    pub fn has_record_store(&self) -> bool {
        self.store.is_some()
    }

    /// Returns `true` while the expired-record cleaner is scheduled.
    #[must_use]
    pub fn is_cleaner_running(&self) -> bool {
        self.cleaner.as_ref().is_some_and(|cleaner| !cleaner.is_cancelled())
    }

    // -----------------------------------------------------------------------
    // X.509 issuance
    // -----------------------------------------------------------------------

    /// Signs `csr` with the X.509 signer.
    ///
    /// Returns `None` if the signer fails or returns an empty certificate.
    #[tracing::instrument(skip(self, csr))]
    pub async fn generate_x509_certificate(
        &self,
        csr: &str,
        key_usage: Option<KeyUsage>,
        expiry_mins: u32,
    ) -> Option<String> {
        match self.x509_signer.generate_x509_certificate(csr, key_usage, expiry_mins).await {
            Ok(pem) if !pem.is_empty() => Some(pem),
            Ok(_) => {
                tracing::error!("x509 signer returned an empty certificate");
                None
            },
            Err(err) => {
                tracing::error!(error = %err, "x509 signer was unable to generate certificate");
                None
            },
        }
    }

    /// Returns the X.509 signer's CA certificate chain.
    #[tracing::instrument(skip(self))]
    pub async fn get_ca_certificate(&self) -> Option<String> {
        match self.x509_signer.get_ca_certificate().await {
            Ok(pem) if !pem.is_empty() => Some(pem),
            Ok(_) => None,
            Err(err) => {
                tracing::error!(error = %err, "unable to fetch x509 CA certificate");
                None
            },
        }
    }

    /// Signs `csr` and wraps the result in an [`InstanceIdentity`] named `cn`.
    ///
    /// The X.509 signer chain is attached when responses carry it.
    #[tracing::instrument(skip(self, csr))]
    pub async fn generate_identity(
        &self,
        csr: &str,
        cn: &str,
        key_usage: Option<KeyUsage>,
        expiry_mins: u32,
    ) -> Option<InstanceIdentity> {
        let pem = self.generate_x509_certificate(csr, key_usage, expiry_mins).await?;
        let mut identity = InstanceIdentity::new(cn, pem);
        if self.send_x509_signer_certs {
            identity.x509_certificate_signer = self.get_x509_certificate_signer().await;
        }
        Some(identity)
    }

    // -----------------------------------------------------------------------
    // SSH issuance
    // -----------------------------------------------------------------------

    /// Signs an SSH request for `principal`.
    ///
    /// Returns `Ok(None)` when no SSH signer is configured.
    ///
    /// # Errors
    ///
    /// Signer errors are returned unchanged for the resource layer to map.
    #[tracing::instrument(skip(self, request), fields(principal = %principal))]
    pub async fn generate_ssh_certificates(
        &self,
        principal: &Principal,
        request: &SshCertRequest,
    ) -> std::result::Result<Option<SshCertificates>, SshSignerError> {
        let Some(signer) = &self.ssh_signer else {
            tracing::error!("ssh signer not available, unable to generate ssh certificates");
            return Ok(None);
        };
        signer.generate_certificate(principal, request, None).await.map(Some)
    }

    /// Adds an SSH certificate for `ssh_csr` to `identity`.
    ///
    /// Nothing to do (no SSH signer, or no CSR) counts as success. A signer
    /// failure or an empty certificate set returns `false`; `identity` is
    /// left unchanged in that case.
    #[tracing::instrument(
        skip(self, identity, ssh_csr),
        fields(principal = %principal, name = %identity.name, instance_id = ?identity.instance_id)
    )]
    pub async fn generate_ssh_identity(
        &self,
        principal: &Principal,
        identity: &mut InstanceIdentity,
        ssh_csr: Option<&str>,
        cert_type: SshCertType,
    ) -> bool {
        let (Some(signer), Some(csr)) = (&self.ssh_signer, ssh_csr.filter(|csr| !csr.is_empty()))
        else {
            return true;
        };

        let request = SshCertRequest::builder().csr(csr).build();
        let instance_id = identity.instance_id.as_deref().unwrap_or_default();
        let certs = match signer.generate_certificate(principal, &request, Some(cert_type)).await {
            Ok(certs) => certs,
            Err(SshSignerError::SigningBackendError { code, message }) => {
                tracing::error!(
                    instance_id,
                    name = %identity.name,
                    code,
                    message = %message,
                    "ssh signer was unable to generate ssh certificate"
                );
                return false;
            },
            Err(err) => {
                tracing::error!(
                    instance_id,
                    name = %identity.name,
                    error = %err,
                    "ssh signer was unable to generate ssh certificate"
                );
                return false;
            },
        };

        let Some(first) = certs.first() else {
            tracing::error!(
                instance_id,
                name = %identity.name,
                "ssh signer returned an empty certificate set"
            );
            return false;
        };

        identity.ssh_certificate = Some(first.certificate.clone());
        identity.ssh_certificate_signer = self.get_ssh_certificate_signer(cert_type).await;
        true
    }

    // -----------------------------------------------------------------------
    // Signer chains
    // -----------------------------------------------------------------------

    /// Returns the X.509 CA chain sent with issued certificates.
    ///
    /// `None` when responses do not carry it or the signer cannot provide it.
    pub async fn get_x509_certificate_signer(&self) -> Option<String> {
        if !self.send_x509_signer_certs {
            return None;
        }
        let signer = &self.x509_signer;
        self.signer_certs
            .x509()
            .get_or_fetch(|| async move {
                match signer.get_ca_certificate().await {
                    Ok(pem) if !pem.is_empty() => Some(pem),
                    Ok(_) => {
                        tracing::error!("x509 signer returned an empty CA certificate");
                        None
                    },
                    Err(err) => {
                        tracing::error!(error = %err, "unable to fetch x509 signer certificate");
                        None
                    },
                }
            })
            .await
    }

    /// Returns the SSH CA key sent with `cert_type` certificates.
    ///
    /// `None` when responses do not carry it, no SSH signer is configured or
    /// the signer cannot provide it.
    pub async fn get_ssh_certificate_signer(&self, cert_type: SshCertType) -> Option<String> {
        if !self.send_ssh_signer_certs {
            return None;
        }
        let signer = self.ssh_signer.as_ref()?;
        self.signer_certs
            .ssh(cert_type)
            .get_or_fetch(|| async move {
                match signer.get_signer_certificate(cert_type).await {
                    Ok(key) if !key.is_empty() => Some(key),
                    Ok(_) => None,
                    Err(err) => {
                        tracing::error!(
                            %cert_type,
                            error = %err,
                            "unable to fetch ssh signer certificate"
                        );
                        None
                    },
                }
            })
            .await
    }

    /// Drops the cached X.509 CA chain; the next read queries the signer.
    pub fn reset_x509_certificate_signer(&self) {
        self.signer_certs.x509().reset();
    }

    /// Drops both cached SSH CA keys.
    pub fn reset_ssh_certificate_signers(&self) {
        self.signer_certs.reset_ssh();
    }

    /// Looks up a CA bundle by name.
    #[must_use]
    pub fn get_certificate_authority_bundle(
        &self,
        name: &str,
    ) -> Option<&CertificateAuthorityBundle> {
        self.bundles.get(name)
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Fetches the record for `(provider, instance_id, service)`.
    #[tracing::instrument(skip(self))]
    pub async fn get_x509_cert_record(
        &self,
        provider: &str,
        instance_id: &str,
        service: &str,
    ) -> Option<X509CertRecord> {
        let store = self.store.as_ref()?;
        let result: StoreResult<Option<X509CertRecord>> = async {
            let conn = store.get_connection().await?;
            conn.get_x509_cert_record(provider, instance_id, service).await
        }
        .await;
        result.unwrap_or_else(|err| {
            tracing::error!(error = %err, "unable to get cert record");
            None
        })
    }

    /// Fetches the record for the instance `cert_pem` was issued to.
    ///
    /// The instance id comes from the certificate's SAN entries and the
    /// service from its subject common name.
    #[tracing::instrument(skip(self, cert_pem))]
    pub async fn get_x509_cert_record_for_cert(
        &self,
        provider: &str,
        cert_pem: &str,
    ) -> Option<X509CertRecord> {
        let info = match CertificateInfo::from_pem(cert_pem) {
            Ok(info) => info,
            Err(err) => {
                tracing::error!(error = %err, "unable to parse certificate");
                return None;
            },
        };
        let Some(instance_id) = info.instance_id() else {
            tracing::error!(subject = %info.subject, "certificate carries no instance id");
            return None;
        };
        let Some(service) = info.common_name.as_deref() else {
            tracing::error!(subject = %info.subject, "certificate carries no common name");
            return None;
        };
        self.get_x509_cert_record(provider, instance_id, service).await
    }

    /// Stores a new record. `false` if it exists or the store fails.
    #[tracing::instrument(
        skip(self, record),
        fields(
            provider = %record.provider,
            instance_id = %record.instance_id,
            service = %record.service
        )
    )]
    pub async fn insert_x509_cert_record(&self, record: &X509CertRecord) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let result: StoreResult<bool> = async {
            let conn = store.get_connection().await?;
            conn.insert_x509_cert_record(record).await
        }
        .await;
        result.unwrap_or_else(|err| {
            tracing::error!(error = %err, "unable to insert cert record");
            false
        })
    }

    /// Replaces an existing record. `false` if it is missing or the store fails.
    #[tracing::instrument(
        skip(self, record),
        fields(
            provider = %record.provider,
            instance_id = %record.instance_id,
            service = %record.service
        )
    )]
    pub async fn update_x509_cert_record(&self, record: &X509CertRecord) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let result: StoreResult<bool> = async {
            let conn = store.get_connection().await?;
            conn.update_x509_cert_record(record).await
        }
        .await;
        result.unwrap_or_else(|err| {
            tracing::error!(error = %err, "unable to update cert record");
            false
        })
    }

    /// Deletes a record. `false` if it is missing or the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn delete_x509_cert_record(
        &self,
        provider: &str,
        instance_id: &str,
        service: &str,
    ) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let result: StoreResult<bool> = async {
            let conn = store.get_connection().await?;
            conn.delete_x509_cert_record(provider, instance_id, service).await
        }
        .await;
        result.unwrap_or_else(|err| {
            tracing::error!(error = %err, "unable to delete cert record");
            false
        })
    }

    // -----------------------------------------------------------------------
    // Policy
    // -----------------------------------------------------------------------

    /// Checks that `provider` may launch instances of `domain.service`.
    ///
    /// The provider needs `launch` on `sys.auth:instance` and on
    /// `<domain>:service.<service>`. On denial the reason is appended to
    /// `error_message`.
    #[tracing::instrument(skip(self, error_message), fields(provider = %provider))]
    pub fn authorize_launch(
        &self,
        provider: &Principal,
        domain: &str,
        service: &str,
        error_message: &mut String,
    ) -> bool {
        if !self.authorizer.access(LAUNCH_ACTION, INSTANCE_LAUNCH_RESOURCE, provider, None) {
            error_message.push_str(&format!(
                "provider '{}' not authorized to launch instances",
                provider.full_name()
            ));
            return false;
        }

        let resource = format!("{domain}:service.{service}");
        if !self.authorizer.access(LAUNCH_ACTION, &resource, provider, None) {
            error_message.push_str(&format!(
                "provider '{}' not authorized to launch {domain}.{service} instances",
                provider.full_name()
            ));
            return false;
        }
        true
    }

    /// Checks `ip` against the certificate refresh allow-list.
    #[must_use]
    pub fn verify_cert_refresh_ip_address(&self, ip: &str) -> bool {
        self.cert_refresh_ips.allows(ip)
    }

    /// Checks `ip` against the instance registration policy for `provider`.
    #[must_use]
    pub fn verify_instance_cert_ip_address(&self, provider: &str, ip: &str) -> bool {
        self.instance_cert_ips.allows(provider, ip)
    }

    // -----------------------------------------------------------------------
    // Audit and lifecycle
    // -----------------------------------------------------------------------

    /// Records an issuance audit event in the store.
    ///
    /// Best effort: a missing store, an unparsable certificate or a store
    /// failure never reaches the caller.
    #[tracing::instrument(skip(self, principal, cert_pem))]
    pub async fn log(
        &self,
        principal: Option<&Principal>,
        ip: &str,
        provider: &str,
        instance_id: &str,
        cert_pem: &str,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        let info = CertificateInfo::from_pem(cert_pem).ok();
        let event = CertLogEvent::builder()
            .maybe_principal(principal.map(Principal::full_name))
            .ip(ip)
            .provider(provider)
            .instance_id(instance_id)
            .maybe_serial(info.as_ref().map(|info| info.serial.clone()))
            .maybe_subject(info.map(|info| info.subject))
            .build();
        if let Err(err) = store.log(&event).await {
            tracing::debug!(error = %err, "unable to record audit event");
        }
    }

    /// Stops the expired-record cleaner. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if let Some(cleaner) = &self.cleaner {
            cleaner.shutdown().await;
        }
    }
}

fn load_signer_certificates(config: &CertManagerConfig) -> Result<SignerCertificateCache> {
    let x509 = if config.response_send_x509_signer_certs {
        load_static_certificate(config.x509_ca_cert_file.as_deref())?
    } else {
        None
    };
    let (ssh_host, ssh_user) = if config.response_send_ssh_signer_certs {
        (
            load_static_certificate(config.ssh_host_ca_cert_file.as_deref())?,
            load_static_certificate(config.ssh_user_ca_cert_file.as_deref())?,
        )
    } else {
        (None, None)
    };
    Ok(SignerCertificateCache::new(x509, ssh_host, ssh_user))
}
