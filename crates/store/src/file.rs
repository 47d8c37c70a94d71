//! Directory-backed record store.
//!
//! [`FileCertRecordStore`] writes one JSON document per record into a
//! directory. File names are the URL-safe base64 encodings of the three key
//! components joined by `.`, so any provider, instance id or service string
//! maps to a distinct, path-safe name.
//!
//! Writes go to a uniquely named staging file that is then renamed over the
//! record, so readers see either the old or the new document. Mutations of
//! one record are serialized through a striped set of async locks shared by
//! every connection of the store.

use std::{
    ffi::OsString,
    hash::{DefaultHasher, Hash, Hasher},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use tokio::{
    fs,
    sync::{Mutex, MutexGuard},
};

use crate::{
    error::{StoreError, StoreResult},
    record::X509CertRecord,
    store::{CertRecordStore, CertRecordStoreConnection},
};

const RECORD_EXTENSION: &str = "json";
const STAGING_EXTENSION: &str = "tmp";
const LOCK_STRIPES: usize = 64;

/// Per-store write coordination.
#[derive(Debug)]
struct WriteLocks {
    stripes: Box<[Mutex<()>]>,
    staging_seq: AtomicU64,
}

impl WriteLocks {
    fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            staging_seq: AtomicU64::new(0),
        }
    }

    /// Locks the stripe that owns `path`.
    async fn lock(&self, path: &Path) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[index].lock().await
    }

    /// A staging path beside `path` that no other writer uses.
    fn staging_path(&self, path: &Path) -> PathBuf {
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let mut name = OsString::from(path.as_os_str());
        name.push(format!(".{}.{seq}.{STAGING_EXTENSION}", std::process::id()));
        PathBuf::from(name)
    }
}

/// File-per-record implementation of [`CertRecordStore`].
///
/// Suitable for single-node deployments. Writers within one process are
/// serialized per record; separate processes sharing a directory are not
/// coordinated beyond the atomic rename.
#[derive(Debug, Clone)]
pub struct FileCertRecordStore {
    root: Arc<PathBuf>,
    locks: Arc<WriteLocks>,
}

impl FileCertRecordStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the directory cannot be created
    /// or `root` exists and is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StoreError::connection_with_source(
                format!("unable to create record directory {}", root.display()),
                e,
            )
        })?;
        if !root.is_dir() {
            return Err(StoreError::connection(format!("{} is not a directory", root.display())));
        }
        Ok(Self { root: Arc::new(root), locks: Arc::new(WriteLocks::new()) })
    }

    /// Directory the records live in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CertRecordStore for FileCertRecordStore {
    async fn get_connection(&self) -> StoreResult<Box<dyn CertRecordStoreConnection>> {
        if fs::metadata(self.root.as_path()).await.is_err() {
            return Err(StoreError::connection(format!(
                "record directory {} is not accessible",
                self.root.display()
            )));
        }
        Ok(Box::new(FileConnection {
            root: Arc::clone(&self.root),
            locks: Arc::clone(&self.locks),
        }))
    }
}

struct FileConnection {
    root: Arc<PathBuf>,
    locks: Arc<WriteLocks>,
}

impl FileConnection {
    fn record_path(&self, provider: &str, instance_id: &str, service: &str) -> StoreResult<PathBuf> {
        for (name, value) in [("provider", provider), ("instance id", instance_id), ("service", service)]
        {
            if value.is_empty() {
                return Err(StoreError::invalid_key(format!("{name} must not be empty")));
            }
        }
        let file_name = format!(
            "{}.{}.{}.{RECORD_EXTENSION}",
            URL_SAFE_NO_PAD.encode(provider),
            URL_SAFE_NO_PAD.encode(instance_id),
            URL_SAFE_NO_PAD.encode(service),
        );
        Ok(self.root.join(file_name))
    }

    async fn read_record(path: &Path) -> StoreResult<Option<X509CertRecord>> {
        match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data).map(Some).map_err(|e| {
                StoreError::serialization_with_source(
                    format!("corrupt record file {}", path.display()),
                    e,
                )
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::internal_with_source(
                format!("unable to read {}", path.display()),
                e,
            )),
        }
    }

    async fn exists(path: &Path) -> StoreResult<bool> {
        fs::try_exists(path).await.map_err(|e| {
            StoreError::internal_with_source(format!("unable to stat {}", path.display()), e)
        })
    }

    fn encode(record: &X509CertRecord) -> StoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(record).map_err(|e| {
            StoreError::serialization_with_source(format!("unable to encode {}", record.key()), e)
        })
    }

    /// Writes `data` to a fresh staging file and renames it over `path`.
    ///
    /// Callers hold the stripe lock for `path`.
    async fn replace(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        let staging = self.locks.staging_path(path);
        if let Err(e) = fs::write(&staging, data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StoreError::internal_with_source(
                format!("unable to write {}", staging.display()),
                e,
            ));
        }
        if let Err(e) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StoreError::internal_with_source(
                format!("unable to replace {}", path.display()),
                e,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CertRecordStoreConnection for FileConnection {
    #[tracing::instrument(skip(self))]
    async fn get_x509_cert_record(
        &self,
        provider: &str,
        instance_id: &str,
        service: &str,
    ) -> StoreResult<Option<X509CertRecord>> {
        let path = self.record_path(provider, instance_id, service)?;
        Self::read_record(&path).await
    }

    #[tracing::instrument(skip(self, record), fields(key = %record.key()))]
    async fn insert_x509_cert_record(&self, record: &X509CertRecord) -> StoreResult<bool> {
        let path = self.record_path(&record.provider, &record.instance_id, &record.service)?;
        let data = Self::encode(record)?;

        let _guard = self.locks.lock(&path).await;
        if Self::exists(&path).await? {
            return Ok(false);
        }
        self.replace(&path, &data).await?;
        Ok(true)
    }

    #[tracing::instrument(skip(self, record), fields(key = %record.key()))]
    async fn update_x509_cert_record(&self, record: &X509CertRecord) -> StoreResult<bool> {
        let path = self.record_path(&record.provider, &record.instance_id, &record.service)?;
        let data = Self::encode(record)?;

        let _guard = self.locks.lock(&path).await;
        if !Self::exists(&path).await? {
            return Ok(false);
        }
        self.replace(&path, &data).await?;
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_x509_cert_record(
        &self,
        provider: &str,
        instance_id: &str,
        service: &str,
    ) -> StoreResult<bool> {
        let path = self.record_path(provider, instance_id, service)?;
        let _guard = self.locks.lock(&path).await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::internal_with_source(
                format!("unable to delete {}", path.display()),
                e,
            )),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn delete_expired_x509_cert_records(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut entries = fs::read_dir(self.root.as_path()).await.map_err(|e| {
            StoreError::connection_with_source(
                format!("unable to list {}", self.root.display()),
                e,
            )
        })?;

        let mut deleted = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            StoreError::interrupted_with_source(
                deleted,
                format!("unable to list {}", self.root.display()),
                e,
            )
        })? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            // Decide under the lock so a concurrent refresh is not discarded.
            let _guard = self.locks.lock(&path).await;
            let record = match Self::read_record(&path).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable record");
                    continue;
                },
            };
            if !record.expired_before(cutoff) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {},
                Err(e) => {
                    return Err(StoreError::interrupted_with_source(
                        deleted,
                        format!("unable to delete {}", path.display()),
                        e,
                    ));
                },
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testutil::make_record;

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCertRecordStore::open(dir.path()).expect("open");
        let record = make_record("sys.auth.aws", "i-1", "media.api");

        let conn = store.get_connection().await.expect("connection");
        assert!(conn.insert_x509_cert_record(&record).await.expect("insert"));

        let reopened = FileCertRecordStore::open(dir.path()).expect("reopen");
        let conn = reopened.get_connection().await.expect("connection");
        let stored = conn
            .get_x509_cert_record("sys.auth.aws", "i-1", "media.api")
            .await
            .expect("get")
            .expect("record exists");
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_separator_characters_do_not_collide() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCertRecordStore::open(dir.path()).expect("open");
        let conn = store.get_connection().await.expect("connection");

        let first = make_record("a-b", "c", "d");
        let second = make_record("a", "b-c", "d");
        assert!(conn.insert_x509_cert_record(&first).await.expect("insert"));
        assert!(conn.insert_x509_cert_record(&second).await.expect("insert"));
    }

    #[tokio::test]
    async fn test_path_traversal_components_stay_inside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCertRecordStore::open(dir.path()).expect("open");
        let conn = store.get_connection().await.expect("connection");

        let record = make_record("../../etc", "passwd", "x/y");
        assert!(conn.insert_x509_cert_record(&record).await.expect("insert"));

        let count = std::fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_empty_component_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCertRecordStore::open(dir.path()).expect("open");
        let conn = store.get_connection().await.expect("connection");

        let result = conn.get_x509_cert_record("", "i-1", "svc").await;
        assert!(matches!(result, Err(StoreError::InvalidKey { .. })));
    }

    #[tokio::test]
    async fn test_delete_expired_skips_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("README"), "not a record").expect("write");
        let store = FileCertRecordStore::open(dir.path()).expect("open");
        let conn = store.get_connection().await.expect("connection");

        let mut old = make_record("p", "old", "svc");
        old.expiry_time = Utc::now() - Duration::days(2);
        conn.insert_x509_cert_record(&old).await.expect("insert");
        conn.insert_x509_cert_record(&make_record("p", "new", "svc")).await.expect("insert");

        let deleted = conn
            .delete_expired_x509_cert_records(Utc::now() - Duration::days(1))
            .await
            .expect("delete");
        assert_eq!(deleted, 1);
        assert!(dir.path().join("README").exists());
    }
}
