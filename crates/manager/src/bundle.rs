//! CA trust bundles and static signer certificate files.
//!
//! The bundle descriptor names each bundle and the file holding it:
//!
//! ```json
//! { "certBundles": [
//!     { "name": "corp", "type": "x509", "filename": "/etc/certissue/corp-ca.pem" },
//!     { "name": "ssh", "type": "ssh", "filename": "/etc/certissue/ssh-ca.pub" }
//! ] }
//! ```
//!
//! `x509` bundles are validated certificate by certificate and re-encoded
//! without comments; any other type is served as the raw file contents.
//! Loading is all-or-nothing: one bad bundle fails the whole set.

use std::{
    collections::HashMap,
    collections::hash_map::Entry,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ManagerError, Result},
    x509::normalize_pem_bundle,
};

const X509_BUNDLE_TYPE: &str = "x509";

/// A named set of trusted CA certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthorityBundle {
    /// Bundle name clients ask for.
    pub name: String,
    /// Bundle contents (normalized PEM for `x509` bundles).
    pub certs: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleDescriptor {
    #[serde(default)]
    cert_bundles: Option<Vec<BundleEntry>>,
}

#[derive(Deserialize)]
struct BundleEntry {
    name: String,
    #[serde(rename = "type", default)]
    bundle_type: Option<String>,
    #[serde(default)]
    filename: Option<PathBuf>,
}

/// Bundles loaded from the descriptor, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct CertificateAuthorityBundles {
    bundles: HashMap<String, CertificateAuthorityBundle>,
}

impl CertificateAuthorityBundles {
    /// Loads `path` if configured, otherwise returns an empty set.
    ///
    /// # Errors
    ///
    /// See [`from_file`](Self::from_file).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Loads every bundle listed in the descriptor at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the descriptor or any bundle file cannot be read, the
    /// descriptor lists no bundles, an entry has no file, two entries share
    /// a name, or an `x509` bundle contains an invalid certificate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| ManagerError::file_read(path, e))?;
        let descriptor: BundleDescriptor =
            serde_json::from_slice(&data).map_err(|e| ManagerError::parse(path, e))?;

        let entries = descriptor.cert_bundles.unwrap_or_default();
        if entries.is_empty() {
            tracing::error!(path = %path.display(), "no CA bundles available");
            return Err(ManagerError::NoEntries { path: path.to_owned() });
        }

        let mut bundles = HashMap::with_capacity(entries.len());
        for entry in entries {
            let bundle = load_bundle(&entry)?;
            match bundles.entry(bundle.name.clone()) {
                Entry::Occupied(_) => {
                    return Err(ManagerError::DuplicateBundle { name: bundle.name });
                },
                Entry::Vacant(slot) => {
                    slot.insert(bundle);
                },
            }
        }
        tracing::info!(path = %path.display(), count = bundles.len(), "loaded CA bundles");
        Ok(Self { bundles })
    }

    /// Looks up a bundle by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CertificateAuthorityBundle> {
        self.bundles.get(name)
    }

    /// Number of loaded bundles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Returns `true` if no bundle is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

fn load_bundle(entry: &BundleEntry) -> Result<CertificateAuthorityBundle> {
    let filename = entry.filename.as_ref().filter(|f| !f.as_os_str().is_empty()).ok_or_else(|| {
        ManagerError::invalid_bundle(&entry.name, "no file configured")
    })?;
    let data = std::fs::read(filename).map_err(|e| {
        tracing::error!(bundle = %entry.name, filename = %filename.display(), error = %e, "unable to read CA bundle");
        ManagerError::file_read(filename, e)
    })?;

    let is_x509 =
        entry.bundle_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(X509_BUNDLE_TYPE));
    let certs = if is_x509 {
        normalize_pem_bundle(&data)
            .map_err(|e| ManagerError::invalid_bundle(&entry.name, e.to_string()))?
    } else {
        String::from_utf8_lossy(&data).into_owned()
    };
    Ok(CertificateAuthorityBundle { name: entry.name.clone(), certs })
}

/// Reads a static signer certificate file, if one is configured.
///
/// # Errors
///
/// Returns [`ManagerError::FileRead`] if the file is configured but unreadable,
/// and [`ManagerError::NoEntries`] if it is empty.
pub fn load_static_certificate(path: Option<&Path>) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let data = std::fs::read(path).map_err(|e| ManagerError::file_read(path, e))?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(ManagerError::NoEntries { path: path.to_owned() });
    }
    Ok(Some(String::from_utf8_lossy(&data).into_owned()))
}
