//! In-process storage.
//!
//! Slots live in a shared [`MemoryBackend`]; every [`MemoryStorage`] built
//! from the same backend with the same key sees the same bytes. Saving a slot
//! wakes every callback registered against that key.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::storage::{required, runtime_handle, NotifyFn, Params, Storage, StorageError};

/// Shared set of named in-memory slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<DashMap<String, Vec<u8>>>,
    changes: Arc<DashMap<String, broadcast::Sender<()>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage view over the slot `key`.
    pub fn storage(&self, key: impl Into<String>) -> MemoryStorage {
        MemoryStorage {
            key: key.into(),
            backend: self.clone(),
        }
    }

    /// Build from `{key}` parameters.
    pub fn storage_from_params(&self, params: &Params) -> Result<MemoryStorage, String> {
        Ok(self.storage(required(params, "key")?))
    }

    /// Write a slot directly, notifying watchers.
    pub fn put(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.data.insert(key.to_string(), data.into());
        if let Some(tx) = self.changes.get(key) {
            let _ = tx.send(());
        }
    }

    /// Current contents of a slot.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.get(key).map(|v| v.value().clone())
    }

    fn subscribe(&self, key: &str) -> broadcast::Receiver<()> {
        self.changes
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .subscribe()
    }
}

/// One slot of a [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    key: String,
    backend: MemoryBackend,
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self) -> Result<Vec<u8>, StorageError> {
        self.backend
            .get(&self.key)
            .ok_or_else(|| StorageError::NotFound(self.key.clone()))
    }

    async fn save(&self, data: &[u8]) -> Result<(), StorageError> {
        self.backend.put(&self.key, data);
        Ok(())
    }

    fn register_notify(
        &self,
        cancel: CancellationToken,
        callback: NotifyFn,
    ) -> Result<(), StorageError> {
        let handle = runtime_handle()?;
        let mut rx = self.backend.subscribe(&self.key);
        let name = self.key.clone();
        handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => callback(&name),
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_shared() {
        let backend = MemoryBackend::new();
        let a = backend.storage("main");
        let b = backend.storage("main");

        assert!(matches!(a.load().await, Err(StorageError::NotFound(_))));
        a.save(b"hello").await.unwrap();
        assert_eq!(b.load().await.unwrap(), b"hello");
        assert_eq!(b.name(), "main");
    }

    #[tokio::test]
    async fn test_notify_until_cancelled() {
        let backend = MemoryBackend::new();
        let storage = backend.storage("main");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let cancel = CancellationToken::new();
        storage
            .register_notify(
                cancel.clone(),
                Arc::new(move |_: &str| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        backend.put("main", "v1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.put("main", "v2");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_key_param() {
        let backend = MemoryBackend::new();
        assert!(backend.storage_from_params(&Params::new()).is_err());
    }
}
