//! Routing decisions and the handle abstraction.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Built-in proxy that connects directly.
pub const DIRECT: &str = "DIRECT";
/// Built-in proxy that refuses the connection.
pub const REJECT: &str = "REJECT";
/// Proxy name returned while a namespace is in global mode.
pub const GLOBAL: &str = "GLOBAL";

/// Namespace-wide traffic mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Mode {
    /// Evaluate the rule chain.
    #[default]
    Rule = 0,
    /// Send everything direct.
    Direct = 1,
    /// Send everything through the global selection.
    Global = 2,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Rule => "rule",
            Mode::Direct => "direct",
            Mode::Global => "global",
        }
    }

    pub(crate) fn from_repr(v: u8) -> Self {
        match v {
            1 => Mode::Direct,
            2 => Mode::Global,
            _ => Mode::Rule,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rule" => Ok(Mode::Rule),
            "direct" => Ok(Mode::Direct),
            "global" => Ok(Mode::Global),
            other => Err(format!("unknown mode `{}`", other)),
        }
    }
}

/// A routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Rule category (DOMAIN, FINAL, DIRECT, GLOBAL, ...).
    pub typ: String,
    /// Match value the rule was written with; empty for catch-alls.
    pub value: String,
    /// Target server or group name.
    pub proxy: String,
    /// Profile the rule came from.
    pub profile: String,
}

impl Rule {
    pub fn new(typ: impl Into<String>, value: impl Into<String>, proxy: impl Into<String>) -> Self {
        Self {
            typ: typ.into(),
            value: value.into(),
            proxy: proxy.into(),
            profile: String::new(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// The terminal decision used when nothing matches.
    pub fn default_rule() -> Self {
        Self::new("FINAL", "", DIRECT)
    }
}

/// Transport class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Udp,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        }
    }
}

/// Metadata of an incoming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub network: Network,
    pub domain: Option<String>,
    pub ip: Option<IpAddr>,
    pub port: u16,
}

impl RequestInfo {
    pub fn tcp(domain: impl Into<String>, port: u16) -> Self {
        Self {
            network: Network::Tcp,
            domain: Some(domain.into()),
            ip: None,
            port,
        }
    }

    pub fn udp(domain: impl Into<String>, port: u16) -> Self {
        Self {
            network: Network::Udp,
            ..Self::tcp(domain, port)
        }
    }

    /// Request addressed by IP only.
    pub fn addr(network: Network, ip: IpAddr, port: u16) -> Self {
        Self {
            network,
            domain: None,
            ip: Some(ip),
            port,
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }
}

/// Request-scoped view of the namespace state the chain may consult.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub namespace: String,
    pub mode: Mode,
}

impl Session {
    pub fn new(namespace: impl Into<String>, mode: Mode) -> Self {
        Self {
            namespace: namespace.into(),
            mode,
        }
    }
}

/// A link in a rule-resolution chain: resolves a decision or delegates.
pub trait RuleHandle: Send + Sync {
    fn handle(&self, session: &Session, info: &RequestInfo) -> Rule;
}

impl<F> RuleHandle for F
where
    F: Fn(&Session, &RequestInfo) -> Rule + Send + Sync,
{
    fn handle(&self, session: &Session, info: &RequestInfo) -> Rule {
        self(session, info)
    }
}

/// Shared, type-erased rule handle.
pub type Handle = Arc<dyn RuleHandle>;

/// A handle that always returns `rule`.
pub fn fixed(rule: Rule) -> Handle {
    Arc::new(move |_: &Session, _: &RequestInfo| rule.clone())
}
