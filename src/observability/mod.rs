//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! loader / applier / runtime store / watcher produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters labelled by result)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or --log-level)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields over formatted messages
//! - Metrics are cheap; recording without an installed recorder is a no-op

pub mod logging;
pub mod metrics;
