//! Scoped views over the runtime store.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::runtime::RuntimeStore;

/// A named scope inside a [`RuntimeStore`].
///
/// Keys are stored as `scope.key`, so subsystems sharing one store cannot
/// collide: the DNS collaborator of namespace `default` writes under
/// `default.dns.*`.
#[derive(Clone)]
pub struct RuntimeContext {
    scope: String,
    store: Arc<RuntimeStore>,
}

impl RuntimeContext {
    /// The unscoped root of `store`.
    pub fn root(store: Arc<RuntimeStore>) -> Self {
        Self {
            scope: String::new(),
            store,
        }
    }

    /// A scope over a throwaway in-memory store.
    pub fn detached(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            store: Arc::new(RuntimeStore::ephemeral()),
        }
    }

    /// Derive a child scope.
    pub fn child(&self, name: &str) -> Self {
        Self {
            scope: self.key(name),
            store: self.store.clone(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn store(&self) -> &Arc<RuntimeStore> {
        &self.store
    }

    fn key(&self, key: &str) -> String {
        if self.scope.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.scope, key)
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.store.get(&self.key(key)).await
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.store.get_as(&self.key(key)).await
    }

    pub async fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.store.set(self.key(key), value).await
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("scope", &self.scope)
            .field("store", &self.store.name())
            .finish()
    }
}
