//! Minimal in-tree collaborators.
//!
//! Enough to run the loader and applier end to end without the real DNS,
//! server, and filter engines: a static host table, servers and groups
//! taken straight from configuration, a domain block list, and named
//! pass-through stream stages.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::apply::hooks::{
    Collaborators, DnsCache, DnsHandle, DnsOverride, Filter, FilterHandle, Group, Resolver,
    Server, StreamHandle, StreamProcessor,
};
use crate::config::schema::Config;
use crate::error::BoxError;
use crate::routing::rule::RequestInfo;
use crate::runtime::RuntimeContext;

const STREAM_STAGES: &[&str] = &["passthrough", "trace"];

/// Collaborators backed only by configuration data.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCollaborators;

/// Resolves from the configured host table, then the cache.
pub struct StaticResolver {
    hosts: BTreeMap<String, Vec<IpAddr>>,
    cache: Arc<DnsCache>,
    override_hook: DnsOverride,
}

impl StaticResolver {
    pub fn new(
        hosts: BTreeMap<String, Vec<IpAddr>>,
        cache: Arc<DnsCache>,
        override_hook: DnsOverride,
    ) -> Self {
        let hosts = hosts
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            hosts,
            cache,
            override_hook,
        }
    }
}

impl std::fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticResolver")
            .field("hosts", &self.hosts.len())
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, domain: &str) -> Option<Vec<IpAddr>> {
        if let Ok(ip) = domain.parse::<IpAddr>() {
            return Some(vec![ip]);
        }
        if let Some(ips) = (self.override_hook)(domain) {
            return Some(ips);
        }
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        if let Some(ips) = self.cache.get(&domain) {
            return Some(ips);
        }
        let ips = self.hosts.get(&domain)?.clone();
        self.cache.insert(domain, ips.clone());
        Some(ips)
    }
}

/// Rejects requests whose domain falls under a blocked suffix.
#[derive(Debug, Clone, Default)]
pub struct BlockListFilter {
    suffixes: Vec<String>,
}

impl BlockListFilter {
    pub fn new(suffixes: &[String]) -> Self {
        Self {
            suffixes: suffixes
                .iter()
                .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

impl Filter for BlockListFilter {
    fn allows(&self, info: &RequestInfo) -> bool {
        let Some(domain) = info.domain.as_deref() else {
            return true;
        };
        let domain = domain.to_ascii_lowercase();
        !self
            .suffixes
            .iter()
            .any(|s| domain == *s || domain.ends_with(&format!(".{}", s)))
    }
}

/// Ordered named stages; `trace` logs payload sizes, `passthrough` does
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct StreamPipeline {
    stages: Vec<String>,
}

impl StreamPipeline {
    pub fn new(stages: &[String]) -> Result<Self, BoxError> {
        if let Some(unknown) = stages.iter().find(|s| !STREAM_STAGES.contains(&s.as_str())) {
            return Err(format!("unknown stream stage `{}`", unknown).into());
        }
        Ok(Self {
            stages: stages.to_vec(),
        })
    }
}

impl StreamProcessor for StreamPipeline {
    fn stages(&self) -> &[String] {
        &self.stages
    }

    fn process(&self, info: &RequestInfo, data: Vec<u8>) -> Vec<u8> {
        for stage in &self.stages {
            if stage == "trace" {
                tracing::trace!(domain = ?info.domain, port = info.port, bytes = data.len(), "Stream payload");
            }
        }
        data
    }
}

impl Collaborators for BuiltinCollaborators {
    fn apply_plugins(&self, config: &Config, runtime: &RuntimeContext) -> Result<(), BoxError> {
        let mut seen = HashSet::new();
        for plugin in &config.plugin {
            if !seen.insert(plugin.name.as_str()) {
                return Err(format!("plugin `{}` configured twice", plugin.name).into());
            }
            tracing::info!(scope = %runtime.scope(), plugin = %plugin.name, "Plugin enabled");
        }
        Ok(())
    }

    fn apply_dns(
        &self,
        config: &Config,
        runtime: &RuntimeContext,
        override_hook: DnsOverride,
    ) -> Result<(DnsHandle, Arc<DnsCache>), BoxError> {
        let cache = Arc::new(DnsCache::new());
        let resolver = StaticResolver::new(config.dns.hosts.clone(), cache.clone(), override_hook);
        tracing::debug!(scope = %runtime.scope(), hosts = config.dns.hosts.len(), "DNS configured");
        Ok((Arc::new(resolver), cache))
    }

    fn apply_servers(
        &self,
        config: &Config,
        runtime: &RuntimeContext,
        _dns: &DnsHandle,
    ) -> Result<Vec<Arc<Server>>, BoxError> {
        let mut servers = vec![Arc::new(Server::direct()), Arc::new(Server::reject())];
        for s in &config.server {
            if s.host.trim().is_empty() || s.port == 0 {
                return Err(format!("server `{}` has no usable address", s.name).into());
            }
            servers.push(Arc::new(Server {
                name: s.name.clone(),
                protocol: s.protocol.clone(),
                address: Some(format!("{}:{}", s.host, s.port)),
            }));
        }
        tracing::debug!(scope = %runtime.scope(), servers = servers.len(), "Servers configured");
        Ok(servers)
    }

    fn apply_groups(
        &self,
        _cancel: &CancellationToken,
        config: &Config,
        runtime: &RuntimeContext,
        servers: &[Arc<Server>],
        _dns: &DnsHandle,
    ) -> Result<Vec<Arc<Group>>, BoxError> {
        // Groups may reference servers and any group declared before them.
        let mut known: HashSet<&str> = servers.iter().map(|s| s.name()).collect();
        let mut groups = Vec::with_capacity(config.server_group.len());
        for g in &config.server_group {
            if let Some(missing) = g.servers.iter().find(|m| !known.contains(m.as_str())) {
                return Err(format!("group `{}` references unknown member `{}`", g.name, missing).into());
            }
            known.insert(g.name.as_str());
            groups.push(Arc::new(Group {
                name: g.name.clone(),
                strategy: g.strategy.clone(),
                members: g.servers.clone(),
            }));
        }
        tracing::debug!(scope = %runtime.scope(), groups = groups.len(), "Groups configured");
        Ok(groups)
    }

    fn apply_filters(
        &self,
        _cancel: &CancellationToken,
        _runtime: &RuntimeContext,
        config: &Config,
    ) -> Result<FilterHandle, BoxError> {
        Ok(Arc::new(BlockListFilter::new(&config.filter.block)))
    }

    fn apply_streams(
        &self,
        _cancel: &CancellationToken,
        _runtime: &RuntimeContext,
        config: &Config,
    ) -> Result<(StreamHandle, StreamHandle), BoxError> {
        let before = StreamPipeline::new(&config.stream.before)?;
        let after = StreamPipeline::new(&config.stream.after)?;
        Ok((Arc::new(before), Arc::new(after)))
    }
}
