//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection (network, domain, ip, port) + Session (mode)
//!     → mode.rs (direct/global short-circuit)
//!     → chain.rs (ordered rule links)
//!     → matcher.rs (evaluate one predicate)
//!     → Return: matched Rule or the fallback rule
//!
//! Chain Compilation (on apply):
//!     RuleConfig[]
//!     → Filter by transport (tcp/udp options)
//!     → Validate proxy names
//!     → Compile matchers
//!     → Freeze as immutable RuleChain
//! ```
//!
//! # Design Decisions
//! - Chains compiled on apply, immutable at runtime
//! - Deterministic: same input always matches same rule
//! - First match wins (configuration order)
//! - Mode is read from an explicit Session, never ambient state

pub mod chain;
pub mod matcher;
pub mod mode;
pub mod rule;

use thiserror::Error;

pub use chain::{apply_rules, RuleChain};
pub use mode::rule_mode_handle;
pub use rule::{Handle, Mode, Network, RequestInfo, Rule, RuleHandle, Session};

/// Errors raised while compiling a rule chain.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("unknown rule type `{0}`")]
    UnknownType(String),

    #[error("rule `{rule}` targets unknown proxy `{proxy}`")]
    UnknownProxy { rule: String, proxy: String },

    #[error("rule `{rule}` is invalid: {reason}")]
    InvalidValue { rule: String, reason: String },
}
