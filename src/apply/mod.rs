//! Configuration application.
//!
//! # Data Flow
//! ```text
//! Config + namespace name
//!     → validate
//!     → plugins → dns → servers → groups
//!     → proxy names (servers ∪ groups)
//!     → tcp chain + udp chain (each wrapped by the mode override)
//!     → filters → streams
//!     → Profile
//!     → ProfileRegistry::add + NamespaceRegistry::add_namespace
//! ```
//!
//! # Design Decisions
//! - Stages run strictly in order; the first failure aborts with its stage
//! - Publication is the single last step: a failed apply publishes nothing
//! - Each collaborator gets its own child runtime scope

pub mod builtin;
pub mod hooks;

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::schema::Config;
use crate::config::validation::validate_config;
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::profile::namespace::MODE_KEY;
use crate::profile::{Namespace, NamespaceRegistry, Profile, ProfileRegistry};
use crate::routing::chain::apply_rules;
use crate::routing::mode::rule_mode_handle;
use crate::routing::rule::{fixed, Handle, Mode, Network, Rule};
use crate::runtime::RuntimeContext;

pub use builtin::BuiltinCollaborators;
pub use hooks::Collaborators;

use hooks::{no_override, DnsHandle};

/// Turns a loaded configuration into a published profile.
#[derive(Clone)]
pub struct ConfigApplier {
    collaborators: Arc<dyn Collaborators>,
    profiles: ProfileRegistry,
    namespaces: NamespaceRegistry,
}

impl ConfigApplier {
    pub fn new(
        collaborators: Arc<dyn Collaborators>,
        profiles: ProfileRegistry,
        namespaces: NamespaceRegistry,
    ) -> Self {
        Self {
            collaborators,
            profiles,
            namespaces,
        }
    }

    /// Applier backed by [`BuiltinCollaborators`] and fresh registries.
    pub fn builtin() -> Self {
        Self::new(
            Arc::new(BuiltinCollaborators),
            ProfileRegistry::new(),
            NamespaceRegistry::new(),
        )
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    /// Apply `config` and bind the result to namespace `name`.
    pub async fn apply(
        &self,
        cancel: &CancellationToken,
        config: &Config,
        runtime: &RuntimeContext,
        name: &str,
    ) -> Result<Arc<Namespace>> {
        let result = self.apply_inner(cancel, config, runtime, name).await;
        match &result {
            Ok(namespace) => {
                metrics::record_config_apply("ok");
                tracing::info!(
                    namespace = %name,
                    profile = %config.info.name,
                    mode = %namespace.mode(),
                    "Configuration applied"
                );
            }
            Err(e) => {
                metrics::record_config_apply("error");
                tracing::error!(namespace = %name, error = %e, "Configuration apply failed");
            }
        }
        result
    }

    async fn apply_inner(
        &self,
        cancel: &CancellationToken,
        config: &Config,
        runtime: &RuntimeContext,
        name: &str,
    ) -> Result<Arc<Namespace>> {
        validate_config(config).map_err(Error::Validation)?;

        let scoped = runtime.child(name);
        let hooks = self.collaborators.as_ref();

        hooks
            .apply_plugins(config, &scoped)
            .map_err(|e| Error::apply("plugin", e))?;

        let (dns, dns_cache) = hooks
            .apply_dns(config, &scoped.child("dns"), no_override())
            .map_err(|e| Error::apply("dns", e))?;

        let servers = hooks
            .apply_servers(config, &scoped.child("server"), &dns)
            .map_err(|e| Error::apply("server", e))?;

        let groups = hooks
            .apply_groups(cancel, config, &scoped.child("group"), &servers, &dns)
            .map_err(|e| Error::apply("group", e))?;

        let proxies: HashSet<String> = servers
            .iter()
            .map(|s| s.name.clone())
            .chain(groups.iter().map(|g| g.name.clone()))
            .collect();

        let rules = scoped.child("rule");
        let tcp_rules = build_chain(config, &rules, Network::Tcp, &proxies, &dns)?;
        let udp_rules = build_chain(config, &rules, Network::Udp, &proxies, &dns)?;

        let filter = hooks
            .apply_filters(cancel, &scoped.child("filter"), config)
            .map_err(|e| Error::apply("filter", e))?;

        let (stream_before, stream_after) = hooks
            .apply_streams(cancel, &scoped.child("stream"), config)
            .map_err(|e| Error::apply("stream", e))?;

        let profile = Arc::new(Profile {
            name: config.info.name.clone(),
            dns,
            dns_cache,
            tcp_rules,
            udp_rules,
            groups,
            servers,
            filter,
            stream_before,
            stream_after,
        });

        // A mode chosen at runtime outlives configuration reloads.
        let mode = scoped
            .get_as::<Mode>(MODE_KEY)
            .await
            .unwrap_or(config.general.mode);

        let previous = self.namespaces.get(name).map(|ns| ns.profile().name.clone());
        self.profiles.add(config.info.name.clone(), profile.clone());
        let namespace = self
            .namespaces
            .add_namespace(name, cancel.clone(), profile, scoped, mode);

        // Drop the profile a renamed primary source replaced.
        if let Some(previous) = previous.filter(|p| *p != config.info.name) {
            if !self.namespaces.profile_in_use(&previous) {
                self.profiles.remove(&previous);
                tracing::info!(profile = %previous, "Superseded profile removed");
            }
        }
        Ok(namespace)
    }
}

fn build_chain(
    config: &Config,
    runtime: &RuntimeContext,
    network: Network,
    proxies: &HashSet<String>,
    dns: &DnsHandle,
) -> Result<Handle> {
    let chain = apply_rules(
        config,
        runtime,
        network,
        proxies,
        fixed(Rule::default_rule().with_profile(config.info.name.clone())),
        dns.clone(),
    )
    .map_err(|e| Error::apply("rule", e))?;
    Ok(rule_mode_handle(config.info.name.clone(), Arc::new(chain)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::hooks::{DnsCache, DnsOverride, FilterHandle, Group, Server, StreamHandle};
    use crate::config::schema::{RuleConfig, ServerConfig};
    use crate::error::BoxError;
    use crate::routing::rule::RequestInfo;

    fn config() -> Config {
        let mut config = Config::default();
        config.info.name = "office".into();
        config.server.push(ServerConfig {
            name: "PROXY1".into(),
            protocol: "socks5".into(),
            host: "10.0.0.1".into(),
            port: 1080,
            params: Default::default(),
        });
        config.rule.push("DOMAIN,example.com,PROXY1".parse().unwrap());
        config.rule.push("DST-PORT,53,REJECT,udp".parse().unwrap());
        config.rule.push(RuleConfig::new("FINAL", "", "DIRECT"));
        config
    }

    #[tokio::test]
    async fn test_apply_publishes_profile() {
        let applier = ConfigApplier::builtin();
        let runtime = RuntimeContext::detached("");
        let ns = applier
            .apply(&CancellationToken::new(), &config(), &runtime, "default")
            .await
            .unwrap();

        assert!(applier.profiles().get("office").is_some());
        assert_eq!(ns.resolve(&RequestInfo::tcp("example.com", 443)).proxy, "PROXY1");
        assert_eq!(ns.resolve(&RequestInfo::tcp("other.com", 53)).proxy, "DIRECT");
        assert_eq!(ns.resolve(&RequestInfo::udp("other.com", 53)).proxy, "REJECT");
        assert_eq!(ns.resolve(&RequestInfo::tcp("example.com", 443)).profile, "office");
        assert_eq!(ns.runtime().scope(), "default");
    }

    #[tokio::test]
    async fn test_unknown_proxy_fails_rule_stage() {
        let applier = ConfigApplier::builtin();
        let mut config = config();
        config.rule.insert(0, "DOMAIN,a.com,NOPE".parse().unwrap());

        let err = applier
            .apply(&CancellationToken::new(), &config, &RuntimeContext::detached(""), "default")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Apply { stage: "rule", .. }));
        assert!(applier.profiles().is_empty());
        assert!(applier.namespaces().get("default").is_none());
    }

    #[tokio::test]
    async fn test_stored_mode_wins_over_config() {
        let applier = ConfigApplier::builtin();
        let runtime = RuntimeContext::detached("");
        runtime.child("default").set(MODE_KEY, "direct").await.unwrap();

        let ns = applier
            .apply(&CancellationToken::new(), &config(), &runtime, "default")
            .await
            .unwrap();
        assert_eq!(ns.mode(), Mode::Direct);
        let rule = ns.resolve(&RequestInfo::tcp("example.com", 443));
        assert_eq!((rule.typ.as_str(), rule.proxy.as_str()), ("DIRECT", "DIRECT"));
    }

    #[tokio::test]
    async fn test_renamed_source_drops_superseded_profile() {
        let applier = ConfigApplier::builtin();
        let runtime = RuntimeContext::detached("");
        let cancel = CancellationToken::new();
        applier.apply(&cancel, &config(), &runtime, "default").await.unwrap();
        applier.apply(&cancel, &config(), &runtime, "lab").await.unwrap();

        let mut renamed = config();
        renamed.info.name = "home".into();
        applier.apply(&cancel, &renamed, &runtime, "default").await.unwrap();
        assert_eq!(applier.profiles().names(), vec!["home", "office"]);

        applier.apply(&cancel, &renamed, &runtime, "lab").await.unwrap();
        assert_eq!(applier.profiles().names(), vec!["home"]);
        assert_eq!(applier.namespaces().get("lab").unwrap().profile().name, "home");
    }

    /// Delegates to the built-ins but fails the filter stage.
    struct BrokenFilters;

    impl Collaborators for BrokenFilters {
        fn apply_plugins(&self, config: &Config, runtime: &RuntimeContext) -> Result<(), BoxError> {
            BuiltinCollaborators.apply_plugins(config, runtime)
        }

        fn apply_dns(
            &self,
            config: &Config,
            runtime: &RuntimeContext,
            override_hook: DnsOverride,
        ) -> Result<(DnsHandle, Arc<DnsCache>), BoxError> {
            BuiltinCollaborators.apply_dns(config, runtime, override_hook)
        }

        fn apply_servers(
            &self,
            config: &Config,
            runtime: &RuntimeContext,
            dns: &DnsHandle,
        ) -> Result<Vec<Arc<Server>>, BoxError> {
            BuiltinCollaborators.apply_servers(config, runtime, dns)
        }

        fn apply_groups(
            &self,
            cancel: &CancellationToken,
            config: &Config,
            runtime: &RuntimeContext,
            servers: &[Arc<Server>],
            dns: &DnsHandle,
        ) -> Result<Vec<Arc<Group>>, BoxError> {
            BuiltinCollaborators.apply_groups(cancel, config, runtime, servers, dns)
        }

        fn apply_filters(
            &self,
            _cancel: &CancellationToken,
            _runtime: &RuntimeContext,
            _config: &Config,
        ) -> Result<FilterHandle, BoxError> {
            Err("filter engine unavailable".into())
        }

        fn apply_streams(
            &self,
            cancel: &CancellationToken,
            runtime: &RuntimeContext,
            config: &Config,
        ) -> Result<(StreamHandle, StreamHandle), BoxError> {
            BuiltinCollaborators.apply_streams(cancel, runtime, config)
        }
    }

    #[tokio::test]
    async fn test_failed_stage_publishes_nothing() {
        let applier = ConfigApplier::new(
            Arc::new(BrokenFilters),
            ProfileRegistry::new(),
            NamespaceRegistry::new(),
        );
        let err = applier
            .apply(&CancellationToken::new(), &config(), &RuntimeContext::detached(""), "default")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Apply { stage: "filter", .. }));
        assert!(err.to_string().contains("filter engine unavailable"));
        assert!(applier.profiles().is_empty());
        assert!(applier.namespaces().names().is_empty());
    }
}
