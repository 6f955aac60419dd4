//! Rule chain compilation and lookup.
//!
//! # Responsibilities
//! - Compile the configured rule list into an ordered chain of links
//! - Validate every rule's proxy against the known proxy names
//! - Resolve a request: first matching link wins, else the fallback
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Links are a flat list walked in order; the fallback is the tail
//! - Rules restricted to one transport are only compiled into that chain

use std::collections::HashSet;
use std::fmt;

use crate::apply::hooks::DnsHandle;
use crate::config::schema::Config;
use crate::routing::matcher::{compile, Matcher};
use crate::routing::rule::{Handle, Network, RequestInfo, Rule, RuleHandle, Session, DIRECT, REJECT};
use crate::routing::RuleError;
use crate::runtime::RuntimeContext;

/// One match-or-delegate step.
#[derive(Debug)]
struct Link {
    matcher: Box<dyn Matcher>,
    rule: Rule,
}

/// A compiled chain of rules terminated by a fallback handle.
pub struct RuleChain {
    links: Vec<Link>,
    fallback: Handle,
    dns: DnsHandle,
}

impl RuleChain {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl RuleHandle for RuleChain {
    fn handle(&self, session: &Session, info: &RequestInfo) -> Rule {
        for link in &self.links {
            if link.matcher.matches(info, self.dns.as_ref()) {
                return link.rule.clone();
            }
        }
        self.fallback.handle(session, info)
    }
}

impl fmt::Debug for RuleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleChain")
            .field("links", &self.links)
            .finish_non_exhaustive()
    }
}

fn applies_to(options: impl Fn(&str) -> bool, network: Network) -> bool {
    let tcp = options("tcp");
    let udp = options("udp");
    match network {
        Network::Tcp => tcp || !udp,
        Network::Udp => udp || !tcp,
    }
}

/// Build the rule chain for one transport class.
///
/// `proxies` is the set of server and group names; `DIRECT` and `REJECT`
/// are always accepted. `fallback` answers requests no rule matches.
pub fn apply_rules(
    config: &Config,
    runtime: &RuntimeContext,
    network: Network,
    proxies: &HashSet<String>,
    fallback: Handle,
    dns: DnsHandle,
) -> Result<RuleChain, RuleError> {
    let mut links = Vec::with_capacity(config.rule.len());
    let mut terminal: Option<usize> = None;

    for (index, rule) in config.rule.iter().enumerate() {
        if !applies_to(|o| rule.has_option(o), network) {
            continue;
        }
        if rule.proxy != DIRECT && rule.proxy != REJECT && !proxies.contains(&rule.proxy) {
            return Err(RuleError::UnknownProxy {
                rule: rule.to_string(),
                proxy: rule.proxy.clone(),
            });
        }
        let matcher = compile(rule)?;
        if let Some(at) = terminal {
            tracing::warn!(
                scope = %runtime.scope(),
                rule = %rule,
                final_index = at,
                "Rule is unreachable after a catch-all rule"
            );
        } else if rule.typ == "FINAL" || rule.typ == "MATCH" {
            terminal = Some(index);
        }
        links.push(Link {
            matcher,
            rule: Rule::new(rule.typ.clone(), rule.value.clone(), rule.proxy.clone())
                .with_profile(config.info.name.clone()),
        });
    }

    tracing::debug!(
        scope = %runtime.scope(),
        network = network.as_str(),
        rules = links.len(),
        "Rule chain compiled"
    );
    Ok(RuleChain {
        links,
        fallback,
        dns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::hooks::NoResolve;
    use crate::config::schema::RuleConfig;
    use crate::routing::rule::fixed;
    use std::sync::Arc;

    fn config(rules: &[&str]) -> Config {
        let mut config = Config::default();
        config.info.name = "test".into();
        config.rule = rules.iter().map(|r| r.parse().unwrap()).collect();
        config
    }

    fn proxies(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn build(config: &Config, network: Network, names: &[&str]) -> Result<RuleChain, RuleError> {
        apply_rules(
            config,
            &RuntimeContext::detached("rule"),
            network,
            &proxies(names),
            fixed(Rule::default_rule()),
            Arc::new(NoResolve),
        )
    }

    #[test]
    fn test_first_match_wins() {
        let config = config(&[
            "DOMAIN-SUFFIX,example.com,P1",
            "DOMAIN,www.example.com,P2",
            "DOMAIN-KEYWORD,example,P3",
        ]);
        let chain = build(&config, Network::Tcp, &["P1", "P2", "P3"]).unwrap();
        let session = Session::default();

        let rule = chain.handle(&session, &RequestInfo::tcp("www.example.com", 443));
        assert_eq!(rule.proxy, "P1");
        assert_eq!(rule.profile, "test");

        let rule = chain.handle(&session, &RequestInfo::tcp("example.org", 443));
        assert_eq!(rule.proxy, "P3");

        let rule = chain.handle(&session, &RequestInfo::tcp("other.net", 443));
        assert_eq!(rule, Rule::default_rule());
    }

    #[test]
    fn test_transport_options() {
        let mut config = config(&["DST-PORT,53,DNSPROXY"]);
        config.rule[0] = RuleConfig::new("DST-PORT", "53", "DNSPROXY").with_option("udp");
        let tcp = build(&config, Network::Tcp, &["DNSPROXY"]).unwrap();
        let udp = build(&config, Network::Udp, &["DNSPROXY"]).unwrap();
        assert!(tcp.is_empty());
        assert_eq!(udp.len(), 1);

        let info = RequestInfo::udp("resolver.lan", 53);
        assert_eq!(udp.handle(&Session::default(), &info).proxy, "DNSPROXY");
        assert_eq!(tcp.handle(&Session::default(), &info).proxy, DIRECT);
    }

    #[test]
    fn test_unknown_proxy_rejected() {
        let config = config(&["DOMAIN,example.com,Nowhere"]);
        let err = build(&config, Network::Tcp, &["P1"]).unwrap_err();
        assert!(matches!(err, RuleError::UnknownProxy { proxy, .. } if proxy == "Nowhere"));
    }

    #[test]
    fn test_builtin_proxies_accepted() {
        let config = config(&["DOMAIN,ads.example.com,REJECT", "FINAL,,DIRECT"]);
        let chain = build(&config, Network::Tcp, &[]).unwrap();
        let rule = chain.handle(&Session::default(), &RequestInfo::tcp("ads.example.com", 80));
        assert_eq!(rule.proxy, REJECT);
        let rule = chain.handle(&Session::default(), &RequestInfo::tcp("x.com", 80));
        assert_eq!(rule.typ, "FINAL");
    }
}
