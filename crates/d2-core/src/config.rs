//! Configuration types for the update daemon
//!
//! [`D2Config`] is the serde form read from JSON. [`D2Config::build`]
//! validates it and resolves key references into an immutable
//! [`UpdateConfig`] that transactions share through `Arc`s.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{DdnsDomain, DdnsDomainList, DnsServerInfo, normalize_name};
use crate::error::{Error, Result};
use crate::tsig::{TsigAlgorithm, TsigKey};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct D2Config {
    /// Runtime parameters
    #[serde(default)]
    pub params: D2Params,

    /// TSIG keys referenced by domains and servers
    #[serde(default)]
    pub tsig_keys: Vec<TsigKeyConfig>,

    /// Domains receiving forward (name to address) updates
    #[serde(default)]
    pub forward_ddns: Vec<DomainConfig>,

    /// Domains receiving reverse (address to name) updates
    #[serde(default)]
    pub reverse_ddns: Vec<DomainConfig>,
}

impl D2Config {
    /// Create a configuration with defaults and no domains
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;

        let mut key_names = HashSet::new();
        for key in &self.tsig_keys {
            key.validate()?;
            if !key_names.insert(normalize_name(&key.name)) {
                return Err(Error::config(format!("Duplicate TSIG key {}", key.name)));
            }
        }

        validate_domains("forward", &self.forward_ddns, &key_names)?;
        validate_domains("reverse", &self.reverse_ddns, &key_names)?;

        Ok(())
    }

    /// Validate and resolve into the runtime configuration
    pub fn build(&self) -> Result<UpdateConfig> {
        self.validate()?;

        let mut keys = HashMap::new();
        for key in &self.tsig_keys {
            let built = TsigKey::from_base64(key.name.clone(), key.algorithm, &key.secret)?;
            keys.insert(normalize_name(&key.name), Arc::new(built));
        }

        Ok(UpdateConfig {
            params: self.params.clone(),
            forward_domains: Arc::new(build_domains(&self.forward_ddns, &keys)?),
            reverse_domains: Arc::new(build_domains(&self.reverse_ddns, &keys)?),
        })
    }
}

fn validate_domains(
    direction: &str,
    domains: &[DomainConfig],
    key_names: &HashSet<String>,
) -> Result<()> {
    let mut names = HashSet::new();
    for domain in domains {
        domain.validate(key_names)?;
        if !names.insert(normalize_name(&domain.name)) {
            return Err(Error::config(format!(
                "Duplicate {} domain {}",
                direction, domain.name
            )));
        }
    }
    Ok(())
}

fn build_domains(
    domains: &[DomainConfig],
    keys: &HashMap<String, Arc<TsigKey>>,
) -> Result<DdnsDomainList> {
    let lookup = |name: &Option<String>| -> Result<Option<Arc<TsigKey>>> {
        match name {
            Some(name) => keys
                .get(&normalize_name(name))
                .cloned()
                .map(Some)
                .ok_or_else(|| Error::config(format!("Unknown TSIG key {}", name))),
            None => Ok(None),
        }
    };

    let mut built = Vec::with_capacity(domains.len());
    for domain in domains {
        let domain_key = lookup(&domain.key_name)?;
        let mut servers = Vec::with_capacity(domain.dns_servers.len());
        for server in &domain.dns_servers {
            servers.push(DnsServerInfo {
                hostname: server.hostname.clone(),
                ip_address: server.ip_address,
                port: server.port,
                enabled: server.enabled,
                tsig_key: lookup(&server.key_name)?.or_else(|| domain_key.clone()),
            });
        }
        built.push(DdnsDomain::new(domain.name.clone(), servers));
    }

    Ok(DdnsDomainList::new(built))
}

/// Runtime parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct D2Params {
    /// How long to wait for a server to answer one update (in milliseconds)
    #[serde(default = "default_dns_server_timeout_ms")]
    pub dns_server_timeout_ms: u64,

    /// Maximum number of transactions running at once
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,

    /// Maximum number of requests waiting for a transaction slot
    ///
    /// Requests arriving while the queue is full are dropped with a warning.
    #[serde(default = "default_ncr_queue_max")]
    pub ncr_queue_max: usize,

    /// Capacity of the manager event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl D2Params {
    /// The per-exchange timeout
    pub fn dns_server_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_server_timeout_ms)
    }

    /// Validate the parameters
    pub fn validate(&self) -> Result<()> {
        if self.dns_server_timeout_ms == 0 {
            return Err(Error::config("dns_server_timeout_ms must be > 0"));
        }
        if self.max_transactions == 0 {
            return Err(Error::config("max_transactions must be > 0"));
        }
        if self.ncr_queue_max == 0 {
            return Err(Error::config("ncr_queue_max must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for D2Params {
    fn default() -> Self {
        Self {
            dns_server_timeout_ms: default_dns_server_timeout_ms(),
            max_transactions: default_max_transactions(),
            ncr_queue_max: default_ncr_queue_max(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_dns_server_timeout_ms() -> u64 {
    500
}

fn default_max_transactions() -> usize {
    32
}

fn default_ncr_queue_max() -> usize {
    1024
}

fn default_event_channel_capacity() -> usize {
    1000
}

/// A TSIG key
#[derive(Clone, Serialize, Deserialize)]
pub struct TsigKeyConfig {
    /// Key name
    pub name: String,

    /// HMAC algorithm
    pub algorithm: TsigAlgorithm,

    /// Base64 shared secret
    pub secret: String,
}

// The secret never appears in debug output
impl std::fmt::Debug for TsigKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsigKeyConfig")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl TsigKeyConfig {
    /// Create a key configuration
    pub fn new(
        name: impl Into<String>,
        algorithm: TsigAlgorithm,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            algorithm,
            secret: secret.into(),
        }
    }

    /// Validate the key configuration
    pub fn validate(&self) -> Result<()> {
        TsigKey::from_base64(self.name.clone(), self.algorithm, &self.secret)?;
        Ok(())
    }
}

/// A domain and its servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Zone name, or `*` to match anything
    pub name: String,

    /// Key used for servers that do not name their own
    #[serde(default)]
    pub key_name: Option<String>,

    /// Servers in failover order
    #[serde(default)]
    pub dns_servers: Vec<ServerConfig>,
}

impl DomainConfig {
    /// Create a domain without servers
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_name: None,
            dns_servers: Vec::new(),
        }
    }

    /// Set the domain key
    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = Some(key_name.into());
        self
    }

    /// Append a server
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.dns_servers.push(server);
        self
    }

    fn validate(&self, key_names: &HashSet<String>) -> Result<()> {
        if self.name.trim_end_matches('.').is_empty() {
            return Err(Error::config("Domain name cannot be empty"));
        }
        if self.dns_servers.is_empty() {
            return Err(Error::config(format!(
                "Domain {} has no DNS servers",
                self.name
            )));
        }

        check_key_reference(&self.key_name, key_names, &self.name)?;
        for server in &self.dns_servers {
            check_key_reference(&server.key_name, key_names, &self.name)?;
        }
        Ok(())
    }
}

fn check_key_reference(
    key_name: &Option<String>,
    key_names: &HashSet<String>,
    domain: &str,
) -> Result<()> {
    match key_name {
        Some(name) if !key_names.contains(&normalize_name(name)) => Err(Error::config(format!(
            "Domain {} references unknown TSIG key {}",
            domain, name
        ))),
        _ => Ok(()),
    }
}

/// A DNS server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server address
    pub ip_address: IpAddr,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host name, informational only
    #[serde(default)]
    pub hostname: Option<String>,

    /// Key overriding the domain key
    #[serde(default)]
    pub key_name: Option<String>,

    /// Whether this server is used
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ServerConfig {
    /// Create an enabled server on the default port
    pub fn new(ip_address: IpAddr) -> Self {
        Self {
            ip_address,
            port: default_port(),
            hostname: None,
            key_name: None,
            enabled: true,
        }
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the server key
    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = Some(key_name.into());
        self
    }

    /// Enable or disable the server
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

fn default_port() -> u16 {
    crate::domain::DNS_PORT
}

fn default_enabled() -> bool {
    true
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Runtime parameters
    pub params: D2Params,
    /// Forward domains
    pub forward_domains: Arc<DdnsDomainList>,
    /// Reverse domains
    pub reverse_domains: Arc<DdnsDomainList>,
}
