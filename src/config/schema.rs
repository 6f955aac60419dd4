//! Configuration schema definitions.
//!
//! This module defines the structure every codec decodes into. All sections
//! default to empty so a fragment may carry any subset of them; includes
//! typically contribute only `rule` or `server` entries.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::routing::rule::Mode;
use crate::storage::Params;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Metadata filled in by the loader, never decoded.
    #[serde(skip)]
    pub info: Info,

    /// Secondary sources merged after the primary, in order.
    pub include: Vec<StorageRef>,

    pub general: GeneralConfig,

    pub plugin: Vec<PluginConfig>,

    pub dns: DnsConfig,

    pub server: Vec<ServerConfig>,

    pub server_group: Vec<GroupConfig>,

    /// Ordered rule list, first match wins.
    pub rule: Vec<RuleConfig>,

    pub filter: FilterConfig,

    pub stream: StreamConfig,
}

/// Loader-populated metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    /// Display name of the primary source.
    pub name: String,
}

/// Identifies a storage backend and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageRef {
    #[serde(rename = "type")]
    pub typ: String,

    #[serde(default)]
    pub params: Params,
}

/// General settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Traffic mode used when the runtime store has none recorded.
    pub mode: Mode,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            mode: Mode::Rule,
        }
    }
}

/// Plugin entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginConfig {
    pub name: String,

    #[serde(default)]
    pub params: Params,
}

/// DNS settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Static host table (domain → addresses).
    pub hosts: BTreeMap<String, Vec<IpAddr>>,
}

/// Upstream server definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Unique server name, referenced by groups and rules.
    pub name: String,

    /// Protocol identifier (socks5, https, ...).
    pub protocol: String,

    pub host: String,

    pub port: u16,

    #[serde(default)]
    pub params: Params,
}

/// Server group definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupConfig {
    pub name: String,

    /// Selection strategy name; interpreted by the group implementation.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Member server or group names.
    pub servers: Vec<String>,
}

fn default_strategy() -> String {
    "select".to_string()
}

/// Packet filter settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Domain suffixes whose requests are rejected before routing.
    pub block: Vec<String>,
}

/// Stream interceptor settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

/// A routing rule as written in configuration.
///
/// Accepts either a line (`DOMAIN,example.com,PROXY1,no-resolve`) or a
/// table (`{ type = "DOMAIN", value = "example.com", proxy = "PROXY1" }`).
/// `FINAL` and `MATCH` may omit the value (`FINAL,DIRECT`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawRule", into = "String")]
pub struct RuleConfig {
    pub typ: String,
    pub value: String,
    pub proxy: String,
    pub options: Vec<String>,
}

impl RuleConfig {
    pub fn new(typ: impl Into<String>, value: impl Into<String>, proxy: impl Into<String>) -> Self {
        Self {
            typ: typ.into().to_ascii_uppercase(),
            value: value.into(),
            proxy: proxy.into(),
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o.eq_ignore_ascii_case(option))
    }

    fn is_catch_all(typ: &str) -> bool {
        typ == "FINAL" || typ == "MATCH"
    }
}

impl FromStr for RuleConfig {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let typ = parts[0].to_ascii_uppercase();
        if typ.is_empty() {
            return Err(format!("rule `{}` has no type", line));
        }
        let (value, proxy, rest) = match parts.len() {
            2 if Self::is_catch_all(&typ) => ("", parts[1], &parts[2..]),
            n if n >= 3 => (parts[1], parts[2], &parts[3..]),
            _ => return Err(format!("rule `{}` needs at least a type and a proxy", line)),
        };
        if proxy.is_empty() {
            return Err(format!("rule `{}` has no proxy", line));
        }
        Ok(Self {
            typ,
            value: value.to_string(),
            proxy: proxy.to_string(),
            options: rest.iter().filter(|o| !o.is_empty()).map(|o| o.to_string()).collect(),
        })
    }
}

impl fmt::Display for RuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.typ, self.value, self.proxy)?;
        for option in &self.options {
            write!(f, ",{}", option)?;
        }
        Ok(())
    }
}

impl From<RuleConfig> for String {
    fn from(rule: RuleConfig) -> Self {
        rule.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRule {
    Line(String),
    Table {
        #[serde(rename = "type")]
        typ: String,
        #[serde(default)]
        value: String,
        proxy: String,
        #[serde(default)]
        options: Vec<String>,
    },
}

impl TryFrom<RawRule> for RuleConfig {
    type Error = String;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        match raw {
            RawRule::Line(line) => line.parse(),
            RawRule::Table {
                typ,
                value,
                proxy,
                options,
            } => {
                if proxy.trim().is_empty() {
                    return Err(format!("rule `{}` has no proxy", typ));
                }
                let mut rule = RuleConfig::new(typ.trim(), value.trim(), proxy.trim());
                rule.options = options;
                Ok(rule)
            }
        }
    }
}
