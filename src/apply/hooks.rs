//! Collaborator interfaces consumed by the applier.
//!
//! DNS, servers, groups, filters, streams and plugins are implemented
//! elsewhere; the applier only sees the handles defined here.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::config::schema::Config;
use crate::error::BoxError;
use crate::routing::rule::{RequestInfo, DIRECT, REJECT};
use crate::runtime::RuntimeContext;

/// Name resolution used by IP rules and servers.
pub trait Resolver: Send + Sync + fmt::Debug {
    fn resolve(&self, domain: &str) -> Option<Vec<IpAddr>>;
}

pub type DnsHandle = Arc<dyn Resolver>;

/// Hook consulted before the regular resolver; `None` means no override.
pub type DnsOverride = Arc<dyn Fn(&str) -> Option<Vec<IpAddr>> + Send + Sync>;

/// The default override hook: never overrides.
pub fn no_override() -> DnsOverride {
    Arc::new(|_: &str| None)
}

/// A resolver that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolve;

impl Resolver for NoResolve {
    fn resolve(&self, _domain: &str) -> Option<Vec<IpAddr>> {
        None
    }
}

/// Resolved-address cache shared by a profile.
#[derive(Debug, Default)]
pub struct DnsCache {
    entries: DashMap<String, Vec<IpAddr>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, domain: &str) -> Option<Vec<IpAddr>> {
        self.entries.get(domain).map(|e| e.value().clone())
    }

    pub fn insert(&self, domain: impl Into<String>, ips: Vec<IpAddr>) {
        self.entries.insert(domain.into(), ips);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// A configured upstream server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub name: String,
    pub protocol: String,
    /// `host:port`; `None` for built-ins.
    pub address: Option<String>,
}

impl Server {
    pub fn direct() -> Self {
        Self {
            name: DIRECT.to_string(),
            protocol: "direct".to_string(),
            address: None,
        }
    }

    pub fn reject() -> Self {
        Self {
            name: REJECT.to_string(),
            protocol: "reject".to_string(),
            address: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A configured server group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub strategy: String,
    pub members: Vec<String>,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Connection-level filter evaluated before routing.
pub trait Filter: Send + Sync + fmt::Debug {
    fn allows(&self, info: &RequestInfo) -> bool;
}

pub type FilterHandle = Arc<dyn Filter>;

/// Processor applied to stream payloads before or after forwarding.
pub trait StreamProcessor: Send + Sync + fmt::Debug {
    /// Names of the configured stages, in order.
    fn stages(&self) -> &[String];

    fn process(&self, info: &RequestInfo, data: Vec<u8>) -> Vec<u8>;
}

pub type StreamHandle = Arc<dyn StreamProcessor>;

/// The downstream apply hooks, one per collaborator.
///
/// Each hook receives its own runtime scope. Any error aborts the apply.
pub trait Collaborators: Send + Sync {
    fn apply_plugins(&self, config: &Config, runtime: &RuntimeContext) -> Result<(), BoxError>;

    fn apply_dns(
        &self,
        config: &Config,
        runtime: &RuntimeContext,
        override_hook: DnsOverride,
    ) -> Result<(DnsHandle, Arc<DnsCache>), BoxError>;

    fn apply_servers(
        &self,
        config: &Config,
        runtime: &RuntimeContext,
        dns: &DnsHandle,
    ) -> Result<Vec<Arc<Server>>, BoxError>;

    fn apply_groups(
        &self,
        cancel: &CancellationToken,
        config: &Config,
        runtime: &RuntimeContext,
        servers: &[Arc<Server>],
        dns: &DnsHandle,
    ) -> Result<Vec<Arc<Group>>, BoxError>;

    fn apply_filters(
        &self,
        cancel: &CancellationToken,
        runtime: &RuntimeContext,
        config: &Config,
    ) -> Result<FilterHandle, BoxError>;

    fn apply_streams(
        &self,
        cancel: &CancellationToken,
        runtime: &RuntimeContext,
        config: &Config,
    ) -> Result<(StreamHandle, StreamHandle), BoxError>;
}
