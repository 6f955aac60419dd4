//! Runtime state subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     storage + codec (single source, no includes)
//!     → store.rs load (missing source → empty store, healed on disk)
//!     → RuntimeContext::root
//!     → child scopes per namespace and collaborator
//!
//! Write:
//!     set(key, value) → lock → update map → encode whole map → save → unlock
//! ```
//!
//! # Design Decisions
//! - Write-through: a successful set is durable before it returns
//! - A single exclusive lock; no reader/writer split, no transactions
//! - A failed write leaves the new value in memory and reports the error

pub mod context;
pub mod store;

pub use context::RuntimeContext;
pub use store::RuntimeStore;
