#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Concurrency tests for the signer certificate cache: concurrent first
//! readers share one backend fetch, and a reset costs exactly one more.

use std::{sync::Arc, time::Duration};

use certissue_manager::{
    CertManagerConfig, InstanceCertManager,
    testutil::{MockBackends, MockX509Signer, StaticAuthorizer, StaticKeyStore},
};

const READERS: usize = 32;

async fn manager_with_slow_ca() -> (Arc<InstanceCertManager>, MockBackends) {
    let backends =
        MockBackends::with_x509(MockX509Signer::new().with_ca_delay(Duration::from_millis(50)));
    let config = CertManagerConfig::builder().x509_signer(MockBackends::ID).build();
    let manager = InstanceCertManager::new(
        config,
        &backends.registry(),
        Arc::new(StaticKeyStore::default()),
        Arc::new(StaticAuthorizer::allow_all()),
    )
    .await
    .unwrap();
    (Arc::new(manager), backends)
}

async fn read_concurrently(manager: &Arc<InstanceCertManager>) -> Vec<Option<String>> {
    let mut handles = Vec::with_capacity(READERS);
    for _ in 0..READERS {
        let manager = Arc::clone(manager);
        handles.push(tokio::spawn(async move { manager.get_x509_certificate_signer().await }));
    }
    let mut results = Vec::with_capacity(READERS);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_fetches_once() {
    let (manager, backends) = manager_with_slow_ca().await;

    let results = read_concurrently(&manager).await;

    assert_eq!(backends.x509.ca_calls(), 1);
    assert!(results.iter().all(|chain| chain.as_deref() == Some(MockX509Signer::CA_CHAIN)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reset_triggers_exactly_one_refetch() {
    let (manager, backends) = manager_with_slow_ca().await;

    read_concurrently(&manager).await;
    assert_eq!(backends.x509.ca_calls(), 1);

    manager.reset_x509_certificate_signer();
    let results = read_concurrently(&manager).await;
    assert_eq!(backends.x509.ca_calls(), 2);
    assert!(results.iter().all(Option::is_some));

    read_concurrently(&manager).await;
    assert_eq!(backends.x509.ca_calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identities_issued_concurrently_share_chain() {
    let (manager, backends) = manager_with_slow_ca().await;

    let mut handles = Vec::with_capacity(READERS);
    for i in 0..READERS {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager.generate_identity("csr", &format!("media.api{i}"), None, 0).await
        }));
    }
    for handle in handles {
        let identity = handle.await.unwrap().expect("identity");
        assert_eq!(identity.x509_certificate_signer.as_deref(), Some(MockX509Signer::CA_CHAIN));
    }

    assert_eq!(backends.x509.issue_calls(), READERS);
    assert_eq!(backends.x509.ca_calls(), 1);
}
