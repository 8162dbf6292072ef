//! NO_PROXY bypass rules.
//!
//! Decides whether a destination connects directly instead of through the
//! configured proxy.

use std::net::IpAddr;

/// Proxy bypass matcher.
///
/// Follows curl's NO_PROXY conventions:
/// - Entries are comma-separated
/// - IP addresses and CIDR ranges supported
/// - Domain matching with optional leading dot
/// - An entry may carry a port (`internal.corp:8080`) and then only that port matches
/// - Wildcard `*` matches all hosts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyMatcher {
    rules: Vec<Rule>,
    match_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Domain(String),
    Address(IpAddr),
    Cidr(IpAddr, u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    target: Target,
    port: Option<u16>,
}

impl ProxyMatcher {
    /// Read `NO_PROXY`, then `no_proxy`.
    pub fn from_env() -> Self {
        let raw = std::env::var("NO_PROXY")
            .or_else(|_| std::env::var("no_proxy"))
            .unwrap_or_default();
        Self::parse(&raw)
    }

    /// Parse a NO_PROXY list.
    pub fn parse(no_proxy: &str) -> Self {
        let mut matcher = ProxyMatcher::default();

        for entry in no_proxy.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if entry == "*" {
                matcher.match_all = true;
                continue;
            }
            if let Some(rule) = Rule::parse(entry) {
                matcher.rules.push(rule);
            }
        }
        matcher
    }

    pub fn is_empty(&self) -> bool {
        !self.match_all && self.rules.is_empty()
    }

    /// Whether `host:port` should skip the proxy.
    pub fn matches(&self, host: &str, port: u16) -> bool {
        if self.match_all {
            return true;
        }
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let ip = host.parse::<IpAddr>().ok();
        let host = host.to_ascii_lowercase();

        self.rules.iter().any(|rule| {
            if rule.port.is_some_and(|p| p != port) {
                return false;
            }
            match (&rule.target, ip) {
                (Target::Address(a), Some(ip)) => *a == ip,
                (Target::Cidr(net, prefix), Some(ip)) => cidr_contains(*net, *prefix, ip),
                (Target::Domain(d), None) => host == *d || host.ends_with(&format!(".{}", d)),
                _ => false,
            }
        })
    }
}

impl Rule {
    fn parse(entry: &str) -> Option<Self> {
        if let Some((ip, prefix)) = entry.split_once('/') {
            let ip = ip.parse::<IpAddr>().ok()?;
            let prefix = prefix.parse::<u8>().ok()?;
            return Some(Rule {
                target: Target::Cidr(ip, prefix),
                port: None,
            });
        }

        // Bare IPv6 addresses contain colons, so try the address first.
        let unbracketed = entry.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Some(Rule {
                target: Target::Address(ip),
                port: None,
            });
        }

        let (host, port) = match entry.rsplit_once(':') {
            Some((h, p)) => (h, Some(p.parse::<u16>().ok()?)),
            None => (entry, None),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let target = match host.parse::<IpAddr>() {
            Ok(ip) => Target::Address(ip),
            Err(_) => Target::Domain(host.trim_start_matches('.').to_ascii_lowercase()),
        };
        Some(Rule { target, port })
    }
}

fn cidr_contains(network: IpAddr, prefix: u8, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(net), IpAddr::V4(ip)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}
