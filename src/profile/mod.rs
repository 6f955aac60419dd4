//! Published routing profiles.
//!
//! # Data Flow
//! ```text
//! ConfigApplier (all stages succeeded)
//!     → Profile (dns, cache, tcp/udp chains, servers, groups, filter, streams)
//!     → ProfileRegistry::add (by configuration name)
//!     → NamespaceRegistry::add_namespace (swap or create)
//!
//! Request:
//!     Namespace::resolve(info)
//!     → Session snapshot (namespace, mode)
//!     → Profile::rule_handle(network)
//!     → Rule
//! ```
//!
//! # Design Decisions
//! - A profile is immutable once built; reloads publish a new one
//! - Registries are explicit objects, not process globals
//! - Namespaces hold their profile behind an atomic pointer swap

pub mod namespace;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::apply::hooks::{DnsCache, DnsHandle, FilterHandle, Group, Server, StreamHandle};
use crate::routing::rule::{Handle, Network};

pub use namespace::{Namespace, NamespaceRegistry};

/// Everything a request needs to be routed under one configuration.
pub struct Profile {
    pub name: String,
    pub dns: DnsHandle,
    pub dns_cache: Arc<DnsCache>,
    pub tcp_rules: Handle,
    pub udp_rules: Handle,
    pub groups: Vec<Arc<Group>>,
    pub servers: Vec<Arc<Server>>,
    pub filter: FilterHandle,
    pub stream_before: StreamHandle,
    pub stream_after: StreamHandle,
}

impl Profile {
    /// The rule chain for `network`.
    pub fn rule_handle(&self, network: Network) -> &Handle {
        match network {
            Network::Tcp => &self.tcp_rules,
            Network::Udp => &self.udp_rules,
        }
    }

    pub fn server(&self, name: &str) -> Option<&Arc<Server>> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&Arc<Group>> {
        self.groups.iter().find(|g| g.name == name)
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("dns", &self.dns)
            .field("servers", &self.servers.len())
            .field("groups", &self.groups.len())
            .field("stream_before", &self.stream_before.stages())
            .field("stream_after", &self.stream_after.stages())
            .finish_non_exhaustive()
    }
}

/// Profiles by configuration name.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    inner: Arc<DashMap<String, Arc<Profile>>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `profile` under `name`, replacing any previous one.
    pub fn add(&self, name: impl Into<String>, profile: Arc<Profile>) {
        let name = name.into();
        if self.inner.insert(name.clone(), profile).is_some() {
            tracing::info!(profile = %name, "Profile replaced");
        } else {
            tracing::info!(profile = %name, "Profile added");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Profile>> {
        self.inner.get(name).map(|p| p.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Profile>> {
        self.inner.remove(name).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::apply::builtin::{BlockListFilter, StreamPipeline};
    use crate::apply::hooks::NoResolve;
    use crate::routing::rule::{fixed, Rule};

    pub(crate) fn profile(name: &str, proxy: &str) -> Profile {
        let stream: StreamHandle = Arc::new(StreamPipeline::default());
        Profile {
            name: name.to_string(),
            dns: Arc::new(NoResolve),
            dns_cache: Arc::new(DnsCache::new()),
            tcp_rules: fixed(Rule::new("FINAL", "", proxy)),
            udp_rules: fixed(Rule::new("FINAL", "", "REJECT")),
            groups: vec![],
            servers: vec![Arc::new(Server::direct())],
            filter: Arc::new(BlockListFilter::default()),
            stream_before: stream.clone(),
            stream_after: stream,
        }
    }

    #[test]
    fn test_rule_handle_by_network() {
        use crate::routing::rule::{RequestInfo, Session};
        let p = profile("office", "DIRECT");
        let session = Session::default();
        let info = RequestInfo::tcp("a.com", 443);
        assert_eq!(p.rule_handle(Network::Tcp).handle(&session, &info).proxy, "DIRECT");
        assert_eq!(p.rule_handle(Network::Udp).handle(&session, &info).proxy, "REJECT");
        assert!(p.server("DIRECT").is_some());
        assert!(p.group("Auto").is_none());
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let registry = ProfileRegistry::new();
        registry.add("office", Arc::new(profile("office", "DIRECT")));
        registry.add("office", Arc::new(profile("office", "REJECT")));
        registry.add("home", Arc::new(profile("home", "DIRECT")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["home".to_string(), "office".to_string()]);
        let office = registry.get("office").unwrap();
        let rule = office
            .rule_handle(Network::Tcp)
            .handle(&Default::default(), &crate::routing::rule::RequestInfo::tcp("a.com", 80));
        assert_eq!(rule.proxy, "REJECT");
        assert!(registry.remove("home").is_some());
        assert!(registry.get("home").is_none());
    }
}
