//! Conformance suite for the bundled record stores.
//!
//! The memory store runs each check individually for fine-grained failure
//! reporting; the file store runs the whole suite against fresh temporary
//! directories.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use certissue_store::{FileCertRecordStore, MemoryCertRecordStore, conformance};

// ============================================================================
// Memory
// ============================================================================

#[tokio::test]
async fn memory_get_missing_returns_none() {
    conformance::get_missing_returns_none(&MemoryCertRecordStore::new()).await;
}

#[tokio::test]
async fn memory_insert_then_get_round_trips() {
    conformance::insert_then_get_round_trips(&MemoryCertRecordStore::new()).await;
}

#[tokio::test]
async fn memory_insert_rejects_duplicate() {
    conformance::insert_rejects_duplicate(&MemoryCertRecordStore::new()).await;
}

#[tokio::test]
async fn memory_update_missing_returns_false() {
    conformance::update_missing_returns_false(&MemoryCertRecordStore::new()).await;
}

#[tokio::test]
async fn memory_update_replaces_record() {
    conformance::update_replaces_record(&MemoryCertRecordStore::new()).await;
}

#[tokio::test]
async fn memory_delete_reports_presence() {
    conformance::delete_reports_presence(&MemoryCertRecordStore::new()).await;
}

#[tokio::test]
async fn memory_key_components_are_distinct() {
    conformance::key_components_are_distinct(&MemoryCertRecordStore::new()).await;
}

#[tokio::test]
async fn memory_delete_expired_is_strict() {
    conformance::delete_expired_is_strict(&MemoryCertRecordStore::new()).await;
}

#[tokio::test]
async fn memory_delete_expired_on_empty_store() {
    conformance::delete_expired_on_empty_store(&MemoryCertRecordStore::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_concurrent_inserts() {
    let store = Arc::new(MemoryCertRecordStore::new());
    conformance::concurrent_inserts_on_separate_connections(Arc::clone(&store)).await;
    assert_eq!(store.len(), 16);
    assert_eq!(store.open_connections(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_concurrent_updates() {
    conformance::concurrent_updates_of_one_record(Arc::new(MemoryCertRecordStore::new())).await;
}

#[tokio::test]
async fn memory_run_all() {
    conformance::run_all(MemoryCertRecordStore::new).await;
}

// ============================================================================
// File
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_run_all() {
    let root = tempfile::tempdir().expect("tempdir");
    let counter = std::sync::atomic::AtomicUsize::new(0);
    conformance::run_all(|| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        FileCertRecordStore::open(root.path().join(format!("store-{n}"))).expect("open store")
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_concurrent_updates_leave_no_staging_files() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileCertRecordStore::open(root.path()).expect("open store"));
    conformance::concurrent_updates_of_one_record(Arc::clone(&store)).await;

    let names: Vec<_> = std::fs::read_dir(root.path())
        .expect("read_dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(names.len(), 1, "only the record remains: {names:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_update_racing_delete() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = FileCertRecordStore::open(root.path()).expect("open store");
    conformance::update_racing_delete_stays_deleted(Arc::new(store)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_refresh_racing_cleanup() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = FileCertRecordStore::open(root.path()).expect("open store");
    conformance::refresh_racing_cleanup_is_kept(Arc::new(store)).await;
}
