//! Ordered pool of backend API keys with one active key at a time.
//!
//! Keys are fixed at startup. The pool keeps a cursor over them and a model
//! handle bound to the key the cursor last activated. Rotation advances the
//! cursor by one and probes the new key before binding it; callers decide
//! whether to rotate again.

use std::sync::{PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::CompletionBackend;
use crate::error::{BackendError, PoolError};

/// One configured key and its position in the pool.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSlot {
    pub key: String,
    pub ordinal: usize,
}

impl std::fmt::Debug for CredentialSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSlot")
            .field("ordinal", &self.ordinal)
            .field("key", &"<REDACTED>")
            .finish()
    }
}

/// A model handle together with the slot it is bound to.
#[derive(Debug, Clone)]
pub struct ActiveModel<M> {
    pub ordinal: usize,
    pub model: M,
}

pub struct KeyPool<B: CompletionBackend> {
    backend: B,
    slots: Vec<CredentialSlot>,
    /// Serializes cursor moves and the probe that follows them.
    cursor: Mutex<Option<usize>>,
    active: RwLock<Option<ActiveModel<B::Model>>>,
}

impl<B: CompletionBackend> KeyPool<B> {
    /// Build a pool from keys in priority order. Blank keys are skipped.
    pub fn new(backend: B, keys: impl IntoIterator<Item = String>) -> Result<Self, PoolError> {
        let slots: Vec<CredentialSlot> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .enumerate()
            .map(|(ordinal, key)| CredentialSlot { key, ordinal })
            .collect();

        if slots.is_empty() {
            return Err(PoolError::Empty);
        }

        Ok(Self {
            backend,
            slots,
            cursor: Mutex::new(None),
            active: RwLock::new(None),
        })
    }

    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    /// Probe keys from the first onward and activate the first healthy one.
    ///
    /// Must succeed before the relay starts serving.
    pub async fn activate_first_healthy(&self) -> Result<usize, PoolError> {
        let mut cursor = self.cursor.lock().await;

        for slot in &self.slots {
            match self.backend.probe(&slot.key).await {
                Ok(()) => {
                    *cursor = Some(slot.ordinal);
                    self.bind(slot);
                    info!("API key #{} is valid and will be used", slot.ordinal + 1);
                    return Ok(slot.ordinal);
                }
                Err(e) => warn!("API key #{} is invalid: {}", slot.ordinal + 1, e),
            }
        }

        Err(PoolError::NoHealthyCredential(self.slots.len()))
    }

    /// Advance the cursor one step (wrapping) and probe the key there.
    ///
    /// On success the new key becomes active. On failure the cursor stays on
    /// the failed key, the previous model stays bound, and the error is
    /// returned so the caller can rotate again.
    pub async fn rotate_and_activate(&self) -> Result<usize, BackendError> {
        let mut cursor = self.cursor.lock().await;
        let next = cursor.map_or(0, |c| (c + 1) % self.slots.len());
        *cursor = Some(next);

        let slot = &self.slots[next];
        match self.backend.probe(&slot.key).await {
            Ok(()) => {
                self.bind(slot);
                info!("Switched to API key #{}", next + 1);
                Ok(next)
            }
            Err(e) => {
                warn!("API key #{} failed its probe: {}", next + 1, e);
                Err(e)
            }
        }
    }

    /// The model bound to the active key, if any key has been activated.
    pub fn current_model(&self) -> Option<ActiveModel<B::Model>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn active_ordinal(&self) -> Option<usize> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.ordinal)
    }

    fn bind(&self, slot: &CredentialSlot) {
        let model = self.backend.bind(&slot.key);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(ActiveModel {
            ordinal: slot.ordinal,
            model,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockBackend;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("key-{}", i)).collect()
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let err = KeyPool::new(MockBackend::new(), vec![" ".to_string(), String::new()]);
        assert!(matches!(err, Err(PoolError::Empty)));
    }

    #[test]
    fn test_blank_keys_are_skipped() {
        let pool = KeyPool::new(
            MockBackend::new(),
            vec!["a".to_string(), "  ".to_string(), " b ".to_string()],
        )
        .unwrap();
        assert_eq!(pool.key_count(), 2);
        assert_eq!(pool.slots[1].key, "b");
        assert_eq!(pool.slots[1].ordinal, 1);
    }

    #[tokio::test]
    async fn test_nothing_active_before_startup_probe() {
        let pool = KeyPool::new(MockBackend::new(), keys(2)).unwrap();
        assert!(pool.current_model().is_none());
        assert_eq!(pool.active_ordinal(), None);
    }

    #[tokio::test]
    async fn test_startup_activates_first_healthy_key() {
        let backend = MockBackend::new();
        backend.fail_probe("key-0", BackendError::InvalidCredential("bad".into()));
        let pool = KeyPool::new(backend.clone(), keys(3)).unwrap();

        assert_eq!(pool.activate_first_healthy().await.unwrap(), 1);
        let active = pool.current_model().unwrap();
        assert_eq!(active.ordinal, 1);
        assert_eq!(active.model.key(), "key-1");
        assert_eq!(backend.probed_keys(), vec!["key-0", "key-1"]);
    }

    #[tokio::test]
    async fn test_startup_fails_when_every_probe_fails() {
        let backend = MockBackend::new();
        for k in keys(3) {
            backend.fail_probe(&k, BackendError::ProbeFailed("down".into()));
        }
        let pool = KeyPool::new(backend, keys(3)).unwrap();

        assert!(matches!(
            pool.activate_first_healthy().await,
            Err(PoolError::NoHealthyCredential(3))
        ));
        assert!(pool.current_model().is_none());
    }

    #[tokio::test]
    async fn test_rotate_wraps_around() {
        let pool = KeyPool::new(MockBackend::new(), keys(2)).unwrap();
        pool.activate_first_healthy().await.unwrap();

        assert_eq!(pool.rotate_and_activate().await.unwrap(), 1);
        assert_eq!(pool.rotate_and_activate().await.unwrap(), 0);
        assert_eq!(pool.current_model().unwrap().model.key(), "key-0");
    }

    #[tokio::test]
    async fn test_failed_probe_keeps_previous_binding_and_moves_cursor() {
        let backend = MockBackend::new();
        backend.fail_probe("key-1", BackendError::QuotaExceeded("429".into()));
        let pool = KeyPool::new(backend, keys(3)).unwrap();
        pool.activate_first_healthy().await.unwrap();

        assert!(pool.rotate_and_activate().await.is_err());
        assert_eq!(pool.active_ordinal(), Some(0));

        // next call moves past the failed key
        assert_eq!(pool.rotate_and_activate().await.unwrap(), 2);
        assert_eq!(pool.active_ordinal(), Some(2));
    }

    #[test]
    fn test_slot_debug_redacts_key() {
        let slot = CredentialSlot {
            key: "AIza-secret".to_string(),
            ordinal: 0,
        };
        assert!(!format!("{:?}", slot).contains("AIza-secret"));
    }
}
