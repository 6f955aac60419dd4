//! Rule matching logic.
//!
//! # Responsibilities
//! - Match request domain (exact, suffix, keyword; case-insensitive)
//! - Match destination IP against a CIDR, resolving domains when allowed
//! - Match destination port
//!
//! # Design Decisions
//! - Domains are normalized to lowercase at compile time
//! - A request without the field a matcher needs never matches
//! - No regex to keep evaluation O(n) in rule count

use std::fmt;
use std::net::IpAddr;

use crate::apply::hooks::Resolver;
use crate::config::schema::RuleConfig;
use crate::routing::rule::RequestInfo;
use crate::routing::RuleError;

/// Trait for matching requests against a rule predicate.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, info: &RequestInfo, dns: &dyn Resolver) -> bool;
}

fn request_domain(info: &RequestInfo) -> Option<String> {
    info.domain
        .as_deref()
        .map(|d| d.trim_end_matches('.').to_ascii_lowercase())
}

/// Matches the full domain.
#[derive(Debug, Clone)]
pub struct DomainMatcher {
    domain: String,
}

impl DomainMatcher {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into().to_ascii_lowercase(),
        }
    }
}

impl Matcher for DomainMatcher {
    fn matches(&self, info: &RequestInfo, _dns: &dyn Resolver) -> bool {
        request_domain(info).is_some_and(|d| d == self.domain)
    }
}

/// Matches a domain and all of its subdomains.
#[derive(Debug, Clone)]
pub struct DomainSuffixMatcher {
    suffix: String,
}

impl DomainSuffixMatcher {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into().trim_start_matches('.').to_ascii_lowercase(),
        }
    }
}

impl Matcher for DomainSuffixMatcher {
    fn matches(&self, info: &RequestInfo, _dns: &dyn Resolver) -> bool {
        request_domain(info).is_some_and(|d| {
            d == self.suffix
                || (d.ends_with(&self.suffix)
                    && d.as_bytes()[d.len() - self.suffix.len() - 1] == b'.')
        })
    }
}

/// Matches domains containing a keyword.
#[derive(Debug, Clone)]
pub struct DomainKeywordMatcher {
    keyword: String,
}

impl DomainKeywordMatcher {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into().to_ascii_lowercase(),
        }
    }
}

impl Matcher for DomainKeywordMatcher {
    fn matches(&self, info: &RequestInfo, _dns: &dyn Resolver) -> bool {
        request_domain(info).is_some_and(|d| d.contains(&self.keyword))
    }
}

/// Matches destination addresses inside a network.
#[derive(Debug, Clone)]
pub struct IpCidrMatcher {
    network: IpAddr,
    prefix: u8,
    resolve: bool,
}

impl IpCidrMatcher {
    /// Parse `addr/prefix`. A bare address is a host route.
    pub fn parse(cidr: &str, resolve: bool) -> Result<Self, String> {
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };
        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|e| format!("invalid address `{}`: {}", addr, e))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| format!("invalid prefix length `{}`", p))?,
            None => max,
        };
        Ok(Self {
            network,
            prefix,
            resolve,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl Matcher for IpCidrMatcher {
    fn matches(&self, info: &RequestInfo, dns: &dyn Resolver) -> bool {
        if let Some(ip) = info.ip {
            return self.contains(ip);
        }
        if !self.resolve {
            return false;
        }
        info.domain
            .as_deref()
            .and_then(|d| dns.resolve(d))
            .is_some_and(|ips| ips.into_iter().any(|ip| self.contains(ip)))
    }
}

/// Matches the destination port.
#[derive(Debug, Clone)]
pub struct PortMatcher {
    port: u16,
}

impl PortMatcher {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Matcher for PortMatcher {
    fn matches(&self, info: &RequestInfo, _dns: &dyn Resolver) -> bool {
        info.port == self.port
    }
}

/// Matches everything (`FINAL`, `MATCH`).
#[derive(Debug, Clone, Default)]
pub struct AnyMatcher;

impl Matcher for AnyMatcher {
    fn matches(&self, _info: &RequestInfo, _dns: &dyn Resolver) -> bool {
        true
    }
}

/// Build the matcher for a configured rule.
pub fn compile(rule: &RuleConfig) -> Result<Box<dyn Matcher>, RuleError> {
    let invalid = |reason: String| RuleError::InvalidValue {
        rule: rule.to_string(),
        reason,
    };
    let require_value = || {
        if rule.value.is_empty() {
            Err(invalid("missing match value".to_string()))
        } else {
            Ok(rule.value.as_str())
        }
    };

    let matcher: Box<dyn Matcher> = match rule.typ.as_str() {
        "DOMAIN" => Box::new(DomainMatcher::new(require_value()?)),
        "DOMAIN-SUFFIX" => Box::new(DomainSuffixMatcher::new(require_value()?)),
        "DOMAIN-KEYWORD" => Box::new(DomainKeywordMatcher::new(require_value()?)),
        "IP-CIDR" | "IP-CIDR6" => Box::new(
            IpCidrMatcher::parse(require_value()?, !rule.has_option("no-resolve"))
                .map_err(invalid)?,
        ),
        "DST-PORT" => Box::new(PortMatcher::new(
            require_value()?
                .parse()
                .map_err(|e| invalid(format!("invalid port: {}", e)))?,
        )),
        "FINAL" | "MATCH" => Box::new(AnyMatcher),
        other => return Err(RuleError::UnknownType(other.to_string())),
    };
    Ok(matcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::hooks::NoResolve;
    use crate::routing::rule::Network;

    #[test]
    fn test_domain_matchers() {
        let exact = DomainMatcher::new("Example.com");
        assert!(exact.matches(&RequestInfo::tcp("EXAMPLE.COM", 443), &NoResolve));
        assert!(!exact.matches(&RequestInfo::tcp("www.example.com", 443), &NoResolve));

        let suffix = DomainSuffixMatcher::new("example.com");
        assert!(suffix.matches(&RequestInfo::tcp("example.com", 443), &NoResolve));
        assert!(suffix.matches(&RequestInfo::tcp("a.b.example.com", 443), &NoResolve));
        assert!(!suffix.matches(&RequestInfo::tcp("badexample.com", 443), &NoResolve));

        let keyword = DomainKeywordMatcher::new("goog");
        assert!(keyword.matches(&RequestInfo::tcp("www.google.com", 443), &NoResolve));
        assert!(!keyword.matches(
            &RequestInfo::addr(Network::Tcp, "8.8.8.8".parse().unwrap(), 53),
            &NoResolve
        ));
    }

    #[test]
    fn test_cidr() {
        let lan = IpCidrMatcher::parse("192.168.0.0/16", true).unwrap();
        assert!(lan.contains("192.168.4.20".parse().unwrap()));
        assert!(!lan.contains("192.169.0.1".parse().unwrap()));
        assert!(!lan.contains("::1".parse().unwrap()));

        let all = IpCidrMatcher::parse("0.0.0.0/0", true).unwrap();
        assert!(all.contains("1.2.3.4".parse().unwrap()));

        let v6 = IpCidrMatcher::parse("fd00::/8", true).unwrap();
        assert!(v6.contains("fd12::1".parse().unwrap()));

        let host = IpCidrMatcher::parse("10.1.1.1", true).unwrap();
        assert!(host.contains("10.1.1.1".parse().unwrap()));
        assert!(!host.contains("10.1.1.2".parse().unwrap()));

        assert!(IpCidrMatcher::parse("10.0.0.0/33", true).is_err());
        assert!(IpCidrMatcher::parse("nope/8", true).is_err());
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            compile(&RuleConfig::new("GEOIP", "CN", "DIRECT")),
            Err(RuleError::UnknownType(t)) if t == "GEOIP"
        ));
        assert!(matches!(
            compile(&RuleConfig::new("DOMAIN", "", "DIRECT")),
            Err(RuleError::InvalidValue { .. })
        ));
        assert!(matches!(
            compile(&RuleConfig::new("DST-PORT", "http", "DIRECT")),
            Err(RuleError::InvalidValue { .. })
        ));
    }
}
