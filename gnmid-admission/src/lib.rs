//! Admission Controller (§4.6). Bounds the number of concurrently running
//! sessions by connection key. All operations are O(1) under a single lock,
//! mirroring `node`'s component-state-under-mutex pattern rather than an
//! actor/channel design: there is no async work on this path, so a plain
//! mutex is the right tool.

use gnmid_store::{StoreClient, StoreError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("server connections at capacity")]
    AtCapacity,
}

struct Inner {
    active: HashSet<String>,
    threshold: usize,
}

/// Cheap to clone; all clones share the same underlying state.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Mutex<Inner>>,
    len_hint: Arc<AtomicUsize>,
}

impl AdmissionController {
    pub fn new(threshold: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                active: HashSet::new(),
                threshold,
            })),
            len_hint: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Builds the connection key and attempts to reserve a slot. Returns the
    /// key whether or not the add succeeded, since callers need it to
    /// eventually call [`Self::remove`] symmetrically in error paths too
    /// (idempotent no-op if never added).
    pub fn add(&self, remote_addr: &str, query_signature: &str) -> (String, Result<(), AdmissionError>) {
        let key = format!("{remote_addr}|{query_signature}");
        let mut inner = self.inner.lock();
        if inner.active.len() >= inner.threshold {
            return (key, Err(AdmissionError::AtCapacity));
        }
        inner.active.insert(key.clone());
        self.len_hint.store(inner.active.len(), Ordering::Relaxed);
        (key, Ok(()))
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.active.remove(key);
        self.len_hint.store(inner.active.len(), Ordering::Relaxed);
    }

    /// Replaces the bound. Does not retroactively evict existing sessions;
    /// only subsequent `add` calls are subject to the new bound.
    pub fn set_threshold(&self, n: usize) {
        self.inner.lock().threshold = n;
    }

    pub fn threshold(&self) -> usize {
        self.inner.lock().threshold
    }

    /// Best-effort count, useful for metrics/logging; not meant for
    /// correctness-sensitive decisions (use `add`/`remove` for those).
    pub fn len(&self) -> usize {
        self.len_hint.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publishes the persisted-liveness identifier (§4.6, §6) once at
    /// startup, not on the request path. The core never reads this key back.
    pub async fn publish_liveness(&self, store: &dyn StoreClient, key: &str, identifier: &str) -> Result<(), StoreError> {
        store.set(key, identifier).await
    }

    /// Removes the liveness key at shutdown (§6).
    pub async fn clear_liveness(&self, store: &dyn StoreClient, key: &str) -> Result<(), StoreError> {
        store.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_succeeds_until_threshold() {
        let admission = AdmissionController::new(2);
        let (k1, r1) = admission.add("10.0.0.1:1234", "sub-a");
        let (k2, r2) = admission.add("10.0.0.2:1234", "sub-b");
        let (_, r3) = admission.add("10.0.0.3:1234", "sub-c");
        assert!(r1.is_ok());
        assert!(r2.is_ok());
        assert_eq!(r3, Err(AdmissionError::AtCapacity));
        assert_ne!(k1, k2);
        assert_eq!(admission.len(), 2);
    }

    #[test]
    fn remove_frees_a_slot() {
        let admission = AdmissionController::new(1);
        let (key, _) = admission.add("10.0.0.1:1234", "sub-a");
        assert!(admission.add("10.0.0.2:1234", "sub-b").1.is_err());
        admission.remove(&key);
        assert!(admission.add("10.0.0.2:1234", "sub-b").1.is_ok());
    }

    #[test]
    fn remove_is_idempotent() {
        let admission = AdmissionController::new(1);
        admission.remove("nonexistent|nope");
        admission.remove("nonexistent|nope");
        assert_eq!(admission.len(), 0);
    }

    #[test]
    fn set_threshold_does_not_retroactively_evict() {
        let admission = AdmissionController::new(2);
        admission.add("a", "x");
        admission.add("b", "y");
        admission.set_threshold(1);
        assert_eq!(admission.len(), 2);
        assert!(admission.add("c", "z").1.is_err());
    }

    #[test]
    fn key_is_remote_addr_pipe_query_signature() {
        let admission = AdmissionController::new(1);
        let (key, _) = admission.add("192.0.2.1:50000", "ifname=Ethernet0");
        assert_eq!(key, "192.0.2.1:50000|ifname=Ethernet0");
    }

    #[tokio::test]
    async fn liveness_key_is_published_then_cleared() {
        let store = gnmid_store::MemoryStoreClient::new();
        let admission = AdmissionController::new(4);
        admission.publish_liveness(&store, "GNMID_LIVENESS", "gnmid:1").await.unwrap();
        assert_eq!(store.get_string("GNMID_LIVENESS"), Some("gnmid:1".to_string()));
        admission.clear_liveness(&store, "GNMID_LIVENESS").await.unwrap();
        assert_eq!(store.get_string("GNMID_LIVENESS"), None);
    }
}
