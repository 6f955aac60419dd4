//! Storage subsystem.
//!
//! # Data Flow
//! ```text
//! StorageRef { type, params }
//!     → StorageRegistry::get (factory lookup + param validation)
//!     → Arc<dyn Storage>
//!         load()            raw bytes (NotFound is distinguishable)
//!         save(bytes)       write back
//!         register_notify   change callback until the token is cancelled
//!         name()            display name of the source
//! ```
//!
//! # Design Decisions
//! - Registry is an explicit object, built once and shared read-only
//! - Backends never interpret bytes; decoding belongs to `codec`
//! - Notification tasks run on the ambient Tokio runtime

pub mod file;
pub mod http;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

pub use file::FileStorage;
pub use http::HttpStorage;
pub use memory::{MemoryBackend, MemoryStorage};

/// Free-form backend parameters (path, url, key, ...).
pub type Params = HashMap<String, String>;

/// Callback invoked with the display name of a source that changed.
pub type NotifyFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Builds a storage instance from its parameters.
pub type StorageFactory =
    Box<dyn Fn(&Params) -> Result<Arc<dyn Storage>, String> + Send + Sync>;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The source does not exist yet.
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The source did not answer in time.
    #[error("source {location} timed out after {after:?}")]
    Timeout { location: String, after: std::time::Duration },

    /// The backend cannot be written to.
    #[error("source is read-only: {0}")]
    ReadOnly(String),

    /// Change notification needs a running Tokio runtime.
    #[error("no async runtime available for change notification")]
    NoRuntime,
}

/// A source and sink for raw configuration bytes.
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Read the full payload.
    async fn load(&self) -> Result<Vec<u8>, StorageError>;

    /// Replace the full payload.
    async fn save(&self, data: &[u8]) -> Result<(), StorageError>;

    /// Invoke `callback` whenever the source changes, until `cancel` fires.
    fn register_notify(
        &self,
        cancel: CancellationToken,
        callback: NotifyFn,
    ) -> Result<(), StorageError>;

    /// Human-readable identity of the source.
    fn name(&self) -> &str;
}

/// Maps backend identifiers to storage factories.
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl StorageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `file`, `memory` and `http` backends.
    ///
    /// Every `memory` storage built by this registry shares `memory`.
    pub fn with_defaults(memory: MemoryBackend) -> Self {
        let mut registry = Self::new();
        registry.register("file", |params| {
            Ok(Arc::new(FileStorage::from_params(params)?) as Arc<dyn Storage>)
        });
        registry.register("memory", move |params| {
            Ok(Arc::new(memory.storage_from_params(params)?) as Arc<dyn Storage>)
        });
        registry.register("http", |params| {
            Ok(Arc::new(HttpStorage::from_params(params)?) as Arc<dyn Storage>)
        });
        registry
    }

    /// Register (or replace) a backend factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Params) -> Result<Arc<dyn Storage>, String> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Build a storage instance for `name` from `params`.
    pub fn get(&self, name: &str, params: &Params) -> Result<Arc<dyn Storage>, Error> {
        let factory = self.factories.get(name).ok_or_else(|| Error::UnknownBackend {
            registry: "storage",
            name: name.to_string(),
        })?;
        factory(params).map_err(|reason| Error::BackendConstruction {
            registry: "storage",
            name: name.to_string(),
            reason,
        })
    }

    /// Registered backend identifiers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::with_defaults(MemoryBackend::new())
    }
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

/// Fetch a required parameter.
pub(crate) fn required<'a>(params: &'a Params, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required parameter `{}`", key))
}

/// Handle of the current Tokio runtime, for spawning notification tasks.
pub(crate) fn runtime_handle() -> Result<tokio::runtime::Handle, StorageError> {
    tokio::runtime::Handle::try_current().map_err(|_| StorageError::NoRuntime)
}
