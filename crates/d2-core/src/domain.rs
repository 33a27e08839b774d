//! Update targets: domains and their DNS servers
//!
//! These are the immutable, built form of the configuration. Transactions
//! hold `Arc`s to them and never mutate them.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::tsig::TsigKey;

/// Name of the domain that matches any FQDN
pub const WILDCARD_DOMAIN: &str = "*";

/// Default DNS port
pub const DNS_PORT: u16 = 53;

/// One server that accepts updates for a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsServerInfo {
    /// Host name, informational only
    pub hostname: Option<String>,
    /// Address updates are sent to
    pub ip_address: IpAddr,
    /// Port updates are sent to
    pub port: u16,
    /// Disabled servers are skipped by server selection
    pub enabled: bool,
    /// Key used to sign requests to this server
    pub tsig_key: Option<Arc<TsigKey>>,
}

impl DnsServerInfo {
    /// Create an enabled server without a key
    pub fn new(ip_address: IpAddr, port: u16) -> Self {
        Self {
            hostname: None,
            ip_address,
            port,
            enabled: true,
            tsig_key: None,
        }
    }

    /// Set the signing key
    pub fn with_tsig_key(mut self, key: Arc<TsigKey>) -> Self {
        self.tsig_key = Some(key);
        self
    }

    /// Enable or disable the server
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Socket address of the server
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.port)
    }
}

impl fmt::Display for DnsServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(hostname) => write!(f, "{} ({})", hostname, self.socket_addr()),
            None => write!(f, "{}", self.socket_addr()),
        }
    }
}

/// A zone and the ordered list of servers that accept updates for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdnsDomain {
    name: String,
    servers: Vec<Arc<DnsServerInfo>>,
}

impl DdnsDomain {
    /// Create a domain
    pub fn new(name: impl Into<String>, servers: Vec<DnsServerInfo>) -> Self {
        Self {
            name: name.into(),
            servers: servers.into_iter().map(Arc::new).collect(),
        }
    }

    /// Zone name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Servers in configured order
    pub fn servers(&self) -> &[Arc<DnsServerInfo>] {
        &self.servers
    }

    /// Whether this is the wildcard domain
    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD_DOMAIN
    }
}

/// The domains of one direction, matched by longest suffix
#[derive(Debug, Clone, Default)]
pub struct DdnsDomainList {
    domains: Vec<Arc<DdnsDomain>>,
}

impl DdnsDomainList {
    /// Create a list
    pub fn new(domains: Vec<DdnsDomain>) -> Self {
        Self {
            domains: domains.into_iter().map(Arc::new).collect(),
        }
    }

    /// All domains
    pub fn domains(&self) -> &[Arc<DdnsDomain>] {
        &self.domains
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Find the domain responsible for `fqdn`
    ///
    /// The domain whose name is the longest label-aligned suffix of `fqdn`
    /// wins; comparison ignores case and a trailing dot. The wildcard
    /// domain matches only when nothing else does.
    pub fn match_domain(&self, fqdn: &str) -> Option<Arc<DdnsDomain>> {
        let target = normalize_name(fqdn);
        let mut best: Option<(&Arc<DdnsDomain>, usize)> = None;
        let mut wildcard = None;

        for domain in &self.domains {
            if domain.is_wildcard() {
                wildcard = Some(domain);
                continue;
            }

            let name = normalize_name(domain.name());
            if !is_suffix_of(&name, &target) {
                continue;
            }

            if best.is_none_or(|(_, len)| name.len() > len) {
                best = Some((domain, name.len()));
            }
        }

        best.map(|(domain, _)| domain).or(wildcard).cloned()
    }
}

/// Lowercase `name` without its trailing dot
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn is_suffix_of(suffix: &str, name: &str) -> bool {
    if suffix.is_empty() {
        return true;
    }
    if name == suffix {
        return true;
    }
    name.len() > suffix.len()
        && name.ends_with(suffix)
        && name.as_bytes()[name.len() - suffix.len() - 1] == b'.'
}

/// The reverse-lookup name of `address`
///
/// IPv4 addresses map into `in-addr.arpa`, IPv6 addresses into `ip6.arpa`
/// one nibble per label. The result is absolute (ends with a dot).
pub fn reverse_name(address: &IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!(
                "{}.{}.{}.{}.in-addr.arpa.",
                octets[3], octets[2], octets[1], octets[0]
            )
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(73);
            for octet in v6.octets().iter().rev() {
                name.push_str(&format!("{:x}.{:x}.", octet & 0x0f, octet >> 4));
            }
            name.push_str("ip6.arpa.");
            name
        }
    }
}
