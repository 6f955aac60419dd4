//! Namespace mode override.
//!
//! Wraps a compiled chain so that `direct` and `global` modes short-circuit
//! rule evaluation. Every call builds a fresh [`Rule`]; nothing returned is
//! shared with other requests.

use std::sync::Arc;

use crate::routing::rule::{Handle, Mode, RequestInfo, Rule, RuleHandle, Session, DIRECT, GLOBAL};

/// Decorator consulting the session mode before the wrapped chain.
pub struct ModeOverride {
    profile: String,
    next: Handle,
}

impl RuleHandle for ModeOverride {
    fn handle(&self, session: &Session, info: &RequestInfo) -> Rule {
        match session.mode {
            Mode::Direct => Rule::new(DIRECT, "", DIRECT).with_profile(self.profile.as_str()),
            Mode::Global => Rule::new(GLOBAL, "", GLOBAL).with_profile(self.profile.as_str()),
            Mode::Rule => self.next.handle(session, info),
        }
    }
}

/// Wrap `next` with the mode override for `profile`.
pub fn rule_mode_handle(profile: impl Into<String>, next: Handle) -> Handle {
    Arc::new(ModeOverride {
        profile: profile.into(),
        next,
    })
}
