//! Persistent key-value runtime store.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::codec::{Codec, CodecError, CodecRegistry, JsonCodec};
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::storage::{MemoryBackend, Params, Storage, StorageError, StorageRegistry};

/// A write-through key-value map persisted through a storage backend.
///
/// One mutex covers both the map and the encode/save sequence, so writes
/// reach storage in the order they were applied.
#[derive(Debug)]
pub struct RuntimeStore {
    value: Mutex<Map<String, Value>>,
    storage: Arc<dyn Storage>,
    codec: Arc<dyn Codec>,
}

impl RuntimeStore {
    /// Load the store from a single source.
    ///
    /// A missing source counts as an empty store; an empty payload is
    /// written back immediately so the next start finds it.
    pub async fn load(
        storages: &StorageRegistry,
        codecs: &CodecRegistry,
        storage_type: &str,
        encoding: &str,
        params: &Params,
    ) -> Result<Self> {
        let storage = storages.get(storage_type, params)?;
        let codec = codecs.get(encoding, params)?;
        let stage = format!("runtime {}:{}", storage_type, storage.name());

        let data = match storage.load().await {
            Ok(data) => data,
            Err(StorageError::NotFound(source)) => {
                storage.save(&[]).await.map_err(|source| Error::Persist {
                    stage: stage.clone(),
                    source,
                })?;
                tracing::info!(source = %source, "Runtime store initialized empty");
                Vec::new()
            }
            Err(source) => return Err(Error::Load { stage, source }),
        };

        let value = if data.is_empty() {
            Map::new()
        } else {
            match codec.decode(&data) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(Error::Decode {
                        stage,
                        source: CodecError::Schema("runtime payload is not a map".to_string()),
                    })
                }
                Err(source) => return Err(Error::Decode { stage, source }),
            }
        };

        tracing::debug!(source = %storage.name(), keys = value.len(), "Runtime store loaded");
        Ok(Self::from_parts(value, storage, codec))
    }

    /// A store kept only in process memory.
    pub fn ephemeral() -> Self {
        let storage = Arc::new(MemoryBackend::new().storage("runtime"));
        Self::from_parts(Map::new(), storage, Arc::new(JsonCodec::default()))
    }

    fn from_parts(value: Map<String, Value>, storage: Arc<dyn Storage>, codec: Arc<dyn Codec>) -> Self {
        Self {
            value: Mutex::new(value),
            storage,
            codec,
        }
    }

    /// Display name of the backing source.
    pub fn name(&self) -> &str {
        self.storage.name()
    }

    /// Current value of `key`, if set.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.value.lock().await.get(key).cloned()
    }

    /// Current value of `key` converted to `T`; `None` if unset or of
    /// another shape.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .await
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Set `key` and persist the whole map before returning.
    ///
    /// On error the in-memory map already holds the new value; only its
    /// durability is in doubt.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let mut map = self.value.lock().await;
        map.insert(key.clone(), value.into());

        let result = self.flush(&map).await;
        match &result {
            Ok(()) => metrics::record_runtime_write("ok"),
            Err(e) => {
                metrics::record_runtime_write("error");
                tracing::error!(key = %key, error = %e, "Runtime value applied but not persisted");
            }
        }
        result
    }

    /// Copy of the whole map.
    pub async fn snapshot(&self) -> Map<String, Value> {
        self.value.lock().await.clone()
    }

    async fn flush(&self, map: &Map<String, Value>) -> Result<()> {
        let stage = format!("runtime {}", self.storage.name());
        let data = self
            .codec
            .encode(&Value::Object(map.clone()))
            .map_err(|source| Error::Encode {
                stage: stage.clone(),
                source,
            })?;
        self.storage
            .save(&data)
            .await
            .map_err(|source| Error::Persist { stage, source })
    }
}
