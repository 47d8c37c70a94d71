//! Conformance checks for [`CertRecordStore`] implementations.
//!
//! Every backend runs the same functions so the manager can treat them
//! interchangeably. Each check expects a fresh, empty store.
//!
//! ```no_run
//! use certissue_store::{MemoryCertRecordStore, conformance};
//!
//! #[tokio::test]
//! async fn insert_rejects_duplicate() {
//!     conformance::insert_rejects_duplicate(&MemoryCertRecordStore::new()).await;
//! }
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::{
    CertRecordStore,
    testutil::{make_record, make_record_expiring},
};

// ============================================================================
// CRUD
// ============================================================================

/// `get` on a missing record returns `Ok(None)`.
pub async fn get_missing_returns_none<S: CertRecordStore>(store: &S) {
    let conn = store.get_connection().await.expect("connection");
    let result = conn.get_x509_cert_record("sys.auth.aws", "missing", "svc").await;
    assert!(matches!(result, Ok(None)), "expected Ok(None), got: {result:?}");
}

/// `insert` then `get` returns an equal record.
pub async fn insert_then_get_round_trips<S: CertRecordStore>(store: &S) {
    let record = make_record("sys.auth.aws", "i-100", "media.api");
    let conn = store.get_connection().await.expect("connection");
    assert!(conn.insert_x509_cert_record(&record).await.expect("insert"));

    let stored = conn
        .get_x509_cert_record("sys.auth.aws", "i-100", "media.api")
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(stored, record);
}

/// A second `insert` with the same key returns `false` and keeps the original.
pub async fn insert_rejects_duplicate<S: CertRecordStore>(store: &S) {
    let record = make_record("sys.auth.aws", "i-101", "media.api");
    let conn = store.get_connection().await.expect("connection");
    assert!(conn.insert_x509_cert_record(&record).await.expect("insert"));

    let mut duplicate = record.clone();
    duplicate.current_serial = "duplicate".to_owned();
    assert!(!conn.insert_x509_cert_record(&duplicate).await.expect("insert"));

    let stored = conn
        .get_x509_cert_record("sys.auth.aws", "i-101", "media.api")
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(stored.current_serial, record.current_serial);
}

/// `update` of a missing record returns `false` and creates nothing.
pub async fn update_missing_returns_false<S: CertRecordStore>(store: &S) {
    let record = make_record("sys.auth.aws", "i-102", "media.api");
    let conn = store.get_connection().await.expect("connection");
    assert!(!conn.update_x509_cert_record(&record).await.expect("update"));
    assert!(
        conn.get_x509_cert_record("sys.auth.aws", "i-102", "media.api")
            .await
            .expect("get")
            .is_none()
    );
}

/// `update` replaces the stored record.
pub async fn update_replaces_record<S: CertRecordStore>(store: &S) {
    let mut record = make_record("sys.auth.aws", "i-103", "media.api");
    let conn = store.get_connection().await.expect("connection");
    conn.insert_x509_cert_record(&record).await.expect("insert");

    record.refresh("next", Some("10.0.0.9".to_owned()), Utc::now() + Duration::days(30));
    assert!(conn.update_x509_cert_record(&record).await.expect("update"));

    let stored = conn
        .get_x509_cert_record("sys.auth.aws", "i-103", "media.api")
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(stored.current_serial, "next");
    assert_eq!(stored.prev_serial.as_deref(), Some("serial-i-103"));
}

/// `delete` returns whether a record was removed.
pub async fn delete_reports_presence<S: CertRecordStore>(store: &S) {
    let record = make_record("sys.auth.aws", "i-104", "media.api");
    let conn = store.get_connection().await.expect("connection");
    assert!(!conn.delete_x509_cert_record("sys.auth.aws", "i-104", "media.api").await.expect("delete"));

    conn.insert_x509_cert_record(&record).await.expect("insert");
    assert!(conn.delete_x509_cert_record("sys.auth.aws", "i-104", "media.api").await.expect("delete"));
    assert!(
        conn.get_x509_cert_record("sys.auth.aws", "i-104", "media.api")
            .await
            .expect("get")
            .is_none()
    );
}

/// Records that differ in a single key component are independent.
pub async fn key_components_are_distinct<S: CertRecordStore>(store: &S) {
    let conn = store.get_connection().await.expect("connection");
    for (provider, instance_id, service) in [
        ("sys.auth.aws", "i-105", "media.api"),
        ("sys.auth.gcp", "i-105", "media.api"),
        ("sys.auth.aws", "i-106", "media.api"),
        ("sys.auth.aws", "i-105", "media.web"),
    ] {
        let record = make_record(provider, instance_id, service);
        assert!(
            conn.insert_x509_cert_record(&record).await.expect("insert"),
            "{provider}/{instance_id}/{service} collided with an earlier key"
        );
    }
}

// ============================================================================
// Expiry
// ============================================================================

/// Only records whose expiry is strictly before the cutoff are deleted.
pub async fn delete_expired_is_strict<S: CertRecordStore>(store: &S) {
    let cutoff = Utc::now() - Duration::days(1);
    let conn = store.get_connection().await.expect("connection");
    for (instance_id, expiry) in [
        ("expired", cutoff - Duration::minutes(1)),
        ("boundary", cutoff),
        ("live", cutoff + Duration::minutes(1)),
    ] {
        let record = make_record_expiring("sys.auth.aws", instance_id, "svc", expiry);
        conn.insert_x509_cert_record(&record).await.expect("insert");
    }

    let deleted = conn.delete_expired_x509_cert_records(cutoff).await.expect("delete expired");
    assert_eq!(deleted, 1);
    assert!(conn.get_x509_cert_record("sys.auth.aws", "expired", "svc").await.expect("get").is_none());
    assert!(conn.get_x509_cert_record("sys.auth.aws", "boundary", "svc").await.expect("get").is_some());
    assert!(conn.get_x509_cert_record("sys.auth.aws", "live", "svc").await.expect("get").is_some());
}

/// Deleting expired records from an empty store returns zero.
pub async fn delete_expired_on_empty_store<S: CertRecordStore>(store: &S) {
    let conn = store.get_connection().await.expect("connection");
    let deleted = conn.delete_expired_x509_cert_records(Utc::now()).await.expect("delete expired");
    assert_eq!(deleted, 0);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Concurrent inserts of distinct keys all succeed on separate connections.
pub async fn concurrent_inserts_on_separate_connections<S: CertRecordStore + 'static>(
    store: Arc<S>,
) {
    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let conn = store.get_connection().await.expect("connection");
            let record = make_record("sys.auth.aws", &format!("c-{i}"), "svc");
            conn.insert_x509_cert_record(&record).await.expect("insert")
        }));
    }
    for handle in handles {
        assert!(handle.await.expect("task"));
    }

    let conn = store.get_connection().await.expect("connection");
    for i in 0..16 {
        assert!(
            conn.get_x509_cert_record("sys.auth.aws", &format!("c-{i}"), "svc")
                .await
                .expect("get")
                .is_some()
        );
    }
}

/// Concurrent updates of one record never leave it unreadable.
pub async fn concurrent_updates_of_one_record<S: CertRecordStore + 'static>(store: Arc<S>) {
    let record = make_record("sys.auth.aws", "i-hot", "svc");
    {
        let conn = store.get_connection().await.expect("connection");
        assert!(conn.insert_x509_cert_record(&record).await.expect("insert"));
    }

    let mut handles = Vec::new();
    for writer in 0..8 {
        let store = Arc::clone(&store);
        let mut record = record.clone();
        handles.push(tokio::spawn(async move {
            let conn = store.get_connection().await.expect("connection");
            for round in 0..25 {
                record.current_serial = format!("w{writer}-r{round}");
                assert!(conn.update_x509_cert_record(&record).await.expect("update"));
                let stored = conn
                    .get_x509_cert_record("sys.auth.aws", "i-hot", "svc")
                    .await
                    .expect("readable during updates");
                assert!(stored.is_some(), "record vanished during updates");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    let conn = store.get_connection().await.expect("connection");
    let stored = conn
        .get_x509_cert_record("sys.auth.aws", "i-hot", "svc")
        .await
        .expect("get")
        .expect("record exists");
    assert!(stored.current_serial.ends_with("-r24"), "last write of some writer wins");
}

/// An update racing a delete never brings the deleted record back.
pub async fn update_racing_delete_stays_deleted<S: CertRecordStore + 'static>(store: Arc<S>) {
    for round in 0..20 {
        let instance_id = format!("race-{round}");
        let record = make_record("sys.auth.aws", &instance_id, "svc");
        {
            let conn = store.get_connection().await.expect("connection");
            assert!(conn.insert_x509_cert_record(&record).await.expect("insert"));
        }

        let updater = {
            let store = Arc::clone(&store);
            let mut record = record.clone();
            record.current_serial = "refreshed".to_owned();
            tokio::spawn(async move {
                let conn = store.get_connection().await.expect("connection");
                conn.update_x509_cert_record(&record).await.expect("update")
            })
        };
        let deleter = {
            let store = Arc::clone(&store);
            let instance_id = instance_id.clone();
            tokio::spawn(async move {
                let conn = store.get_connection().await.expect("connection");
                conn.delete_x509_cert_record("sys.auth.aws", &instance_id, "svc")
                    .await
                    .expect("delete")
            })
        };
        updater.await.expect("task");
        assert!(deleter.await.expect("task"));

        let conn = store.get_connection().await.expect("connection");
        assert!(
            conn.get_x509_cert_record("sys.auth.aws", &instance_id, "svc")
                .await
                .expect("get")
                .is_none(),
            "round {round}: deleted record reappeared"
        );
    }
}

/// A refresh that lands while expired records are being reclaimed is kept.
pub async fn refresh_racing_cleanup_is_kept<S: CertRecordStore + 'static>(store: Arc<S>) {
    let now = Utc::now();
    for round in 0..20 {
        let instance_id = format!("renew-{round}");
        let stale = make_record_expiring("sys.auth.aws", &instance_id, "svc", now - Duration::days(3));
        {
            let conn = store.get_connection().await.expect("connection");
            assert!(conn.insert_x509_cert_record(&stale).await.expect("insert"));
        }

        let refresher = {
            let store = Arc::clone(&store);
            let mut renewed = stale.clone();
            renewed.expiry_time = now + Duration::days(30);
            tokio::spawn(async move {
                let conn = store.get_connection().await.expect("connection");
                conn.update_x509_cert_record(&renewed).await.expect("update")
            })
        };
        let cleaner = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let conn = store.get_connection().await.expect("connection");
                conn.delete_expired_x509_cert_records(now - Duration::days(1))
                    .await
                    .expect("delete expired")
            })
        };
        let refreshed = refresher.await.expect("task");
        cleaner.await.expect("task");

        let conn = store.get_connection().await.expect("connection");
        let present = conn
            .get_x509_cert_record("sys.auth.aws", &instance_id, "svc")
            .await
            .expect("get")
            .is_some();
        assert_eq!(present, refreshed, "round {round}: refresh and cleanup disagree");
    }
}

/// Runs every check against fresh stores produced by `make_store`.
pub async fn run_all<S, F>(make_store: F)
where
    S: CertRecordStore + 'static,
    F: Fn() -> S,
{
    get_missing_returns_none(&make_store()).await;
    insert_then_get_round_trips(&make_store()).await;
    insert_rejects_duplicate(&make_store()).await;
    update_missing_returns_false(&make_store()).await;
    update_replaces_record(&make_store()).await;
    delete_reports_presence(&make_store()).await;
    key_components_are_distinct(&make_store()).await;
    delete_expired_is_strict(&make_store()).await;
    delete_expired_on_empty_store(&make_store()).await;
    concurrent_inserts_on_separate_connections(Arc::new(make_store())).await;
    concurrent_updates_of_one_record(Arc::new(make_store())).await;
    update_racing_delete_stays_deleted(Arc::new(make_store())).await;
    refresh_racing_cleanup_is_kept(Arc::new(make_store())).await;
}
