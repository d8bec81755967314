//! Inbound IP allow-list with exact and CIDR rules.

use std::net::{IpAddr, SocketAddr};

use ipnetwork::IpNetwork;

use crate::error::{WebhookError, WebhookResult};

/// Addresses permitted to call inbound webhooks.
///
/// An empty list permits everyone.
#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    rules: Vec<IpNetwork>,
}

impl IpAllowList {
    /// Parses entries such as `"192.168.1.20"`, `"10.0.0.0/8"` or `"fd00::/8"`.
    pub fn from_entries<I, S>(entries: I) -> WebhookResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = entries
            .into_iter()
            .map(|entry| parse_rule(entry.as_ref()))
            .collect::<WebhookResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Checks an address against every rule.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        self.rules.iter().any(|rule| rule.contains(ip))
    }

    /// Checks a remote address as reported by the server (`ip`, `ip:port`
    /// or `[v6]:port`). Anything that is not an IP never matches.
    pub fn permits(&self, remote_addr: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        parse_remote_ip(remote_addr).is_some_and(|ip| self.contains(ip))
    }
}

fn parse_rule(entry: &str) -> WebhookResult<IpNetwork> {
    let entry = entry.trim();
    if let Ok(ip) = entry.parse::<IpAddr>() {
        return Ok(IpNetwork::from(canonical(ip)));
    }
    entry
        .parse::<IpNetwork>()
        .map_err(|e| WebhookError::ConfigError(format!("invalid allow-list entry '{entry}': {e}")))
}

/// IPv4-mapped IPv6 addresses match IPv4 rules.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Extracts the IP from a remote address, dropping any port.
pub fn parse_remote_ip(remote_addr: &str) -> Option<IpAddr> {
    let remote_addr = remote_addr.trim();
    if let Ok(addr) = remote_addr.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    remote_addr
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}

/// Host part of a remote address, used as the rate-limit identity.
pub fn remote_host(remote_addr: &str) -> String {
    if let Some(ip) = parse_remote_ip(remote_addr) {
        return ip.to_string();
    }
    match remote_addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host.to_string(),
        _ => remote_addr.to_string(),
    }
}
