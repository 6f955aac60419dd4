//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! primary source + includes (any storage backend)
//!     → loader.rs (load bytes, merge in declaration order, decode)
//!     → validation.rs (semantic checks)
//!     → Config (info.name stamped with the primary source name)
//!     → apply::ConfigApplier
//!
//! On change notification:
//!     watcher.rs receives the source name
//!     → loader.rs loads new config
//!     → applier publishes a new profile
//!     → namespace swaps to it atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All sections have defaults so fragments stay small
//! - Merge strategy is an explicit loader option, not a codec side effect

pub mod loader;
pub mod merge;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::ConfigLoader;
pub use merge::MergeStrategy;
pub use schema::{Config, GroupConfig, Info, RuleConfig, ServerConfig, StorageRef};
pub use watcher::{ConfigSource, ConfigWatcher};
