//! Policy configuration loading for a rule-based proxy.
//!
//! Loads a primary configuration and its includes from pluggable storage,
//! decodes it with a pluggable codec, applies it through the collaborator
//! hooks, and publishes the resulting profile into a namespace. A separate
//! write-through runtime store keeps state such as the namespace mode
//! across restarts.

// Sources and formats
pub mod codec;
pub mod storage;

// Core subsystems
pub mod apply;
pub mod config;
pub mod profile;
pub mod routing;
pub mod runtime;

// Cross-cutting concerns
pub mod error;
pub mod observability;

pub use apply::{BuiltinCollaborators, Collaborators, ConfigApplier};
pub use codec::{Codec, CodecRegistry};
pub use config::{Config, ConfigLoader, ConfigSource, ConfigWatcher, MergeStrategy};
pub use error::{Error, Result};
pub use profile::{Namespace, NamespaceRegistry, Profile, ProfileRegistry};
pub use routing::{Mode, Network, RequestInfo, Rule, Session};
pub use runtime::{RuntimeContext, RuntimeStore};
pub use storage::{MemoryBackend, Params, Storage, StorageRegistry};
