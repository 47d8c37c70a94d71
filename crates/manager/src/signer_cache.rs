//! Lazily populated signer certificate cache.
//!
//! Issuance responses carry the CA chain that signed the returned
//! certificate. Fetching it from the backend on every request is wasteful,
//! so each of the three chains (X.509, SSH host, SSH user) lives in its own
//! slot, populated on first use and kept for the life of the process.
//!
//! Each slot is an `ArcSwap<OnceCell<String>>`:
//!
//! - Reads load the current cell without locking.
//! - Concurrent first readers share a single backend fetch through
//!   [`OnceCell::get_or_try_init`].
//! - A failed fetch leaves the cell empty, so the next read retries.
//! - A reset swaps in a fresh cell. Readers that already hold the old cell
//!   finish with it; the next read performs exactly one new fetch.

use std::{future::Future, sync::Arc};

use arc_swap::ArcSwap;
use tokio::sync::OnceCell;

use crate::signer::SshCertType;

/// One independently populated cache slot.
#[derive(Debug)]
pub struct SignerSlot {
    cell: ArcSwap<OnceCell<String>>,
}

impl Default for SignerSlot {
    fn default() -> Self {
        Self::empty()
    }
}

impl SignerSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn empty() -> Self {
        Self { cell: ArcSwap::from_pointee(OnceCell::new()) }
    }

    /// Creates a slot holding `value` if present, empty otherwise.
    #[must_use]
    pub fn seeded(value: Option<String>) -> Self {
        Self { cell: ArcSwap::from_pointee(OnceCell::new_with(value)) }
    }

    /// Returns the cached value, fetching it with `fetch` on first use.
    ///
    /// A `None` from `fetch` is not cached.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Option<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        let cell = self.cell.load_full();
        cell.get_or_try_init(move || async move { fetch().await.ok_or(()) }).await.ok().cloned()
    }

    /// Returns the cached value without fetching.
    #[must_use]
    pub fn peek(&self) -> Option<String> {
        self.cell.load().get().cloned()
    }

    /// Drops the cached value; the next read fetches again.
    pub fn reset(&self) {
        self.cell.store(Arc::new(OnceCell::new()));
    }
}

/// Cached signer chains handed out with issued credentials.
#[derive(Debug, Default)]
pub struct SignerCertificateCache {
    x509: SignerSlot,
    ssh_host: SignerSlot,
    ssh_user: SignerSlot,
}

impl SignerCertificateCache {
    /// Creates a cache with each slot optionally pre-seeded.
    #[must_use]
    pub fn new(x509: Option<String>, ssh_host: Option<String>, ssh_user: Option<String>) -> Self {
        Self {
            x509: SignerSlot::seeded(x509),
            ssh_host: SignerSlot::seeded(ssh_host),
            ssh_user: SignerSlot::seeded(ssh_user),
        }
    }

    /// The X.509 CA chain slot.
    #[must_use]
    pub fn x509(&self) -> &SignerSlot {
        &self.x509
    }

    /// The SSH CA slot for `cert_type`.
    #[must_use]
    pub fn ssh(&self, cert_type: SshCertType) -> &SignerSlot {
        match cert_type {
            SshCertType::Host => &self.ssh_host,
            SshCertType::User => &self.ssh_user,
        }
    }

    /// Resets both SSH slots.
    pub fn reset_ssh(&self) {
        self.ssh_host.reset();
        self.ssh_user.reset();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_fetches_once() {
        let slot = SignerSlot::empty();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Some("chain".to_owned())
        };

        assert_eq!(slot.get_or_fetch(fetch).await.as_deref(), Some("chain"));
        assert_eq!(slot.get_or_fetch(fetch).await.as_deref(), Some("chain"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let slot = SignerSlot::empty();

        assert!(slot.get_or_fetch(|| async { None }).await.is_none());
        assert!(slot.peek().is_none());
        assert_eq!(
            slot.get_or_fetch(|| async { Some("chain".to_owned()) }).await.as_deref(),
            Some("chain")
        );
    }

    #[tokio::test]
    async fn test_reset_forces_refetch() {
        let slot = SignerSlot::empty();
        slot.get_or_fetch(|| async { Some("old".to_owned()) }).await;

        slot.reset();
        assert!(slot.peek().is_none());
        assert_eq!(slot.get_or_fetch(|| async { Some("new".to_owned()) }).await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_seeded_slot_skips_fetch() {
        let slot = SignerSlot::seeded(Some("static".to_owned()));
        let fetched = slot.get_or_fetch(|| async { Some("backend".to_owned()) }).await;
        assert_eq!(fetched.as_deref(), Some("static"));
    }

    #[tokio::test]
    async fn test_ssh_slots_are_independent() {
        let cache = SignerCertificateCache::default();
        cache.ssh(SshCertType::Host).get_or_fetch(|| async { Some("host".to_owned()) }).await;

        assert_eq!(cache.ssh(SshCertType::Host).peek().as_deref(), Some("host"));
        assert!(cache.ssh(SshCertType::User).peek().is_none());

        cache.reset_ssh();
        assert!(cache.ssh(SshCertType::Host).peek().is_none());
    }
}
