//! Test doubles and common utilities for contract tests
//!
//! This module provides a scripted DNS transport, request builders and
//! configuration builders shared by the contract tests.

#![allow(dead_code)]

use chrono::Utc;
use d2_core::UpdateConfig;
use d2_core::config::{D2Config, DomainConfig, ServerConfig, TsigKeyConfig};
use d2_core::domain::DnsServerInfo;
use d2_core::error::{Error, Result};
use d2_core::message::{Rcode, UpdateMessage, UpdateResponse};
use d2_core::ncr::{ChangeType, Dhcid, NameChangeRequest};
use d2_core::traits::DnsTransport;
use d2_core::tsig::{DEFAULT_FUDGE, TsigAlgorithm, TsigKey};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Base64 secret shared by test keys
pub const SECRET: &str = "c2VjcmV0LWtleS1ieXRlcw==";

/// Timeout used by test configurations (in milliseconds)
pub const TEST_TIMEOUT_MS: u64 = 20;

/// What the scripted transport does with one exchange
#[derive(Debug, Clone)]
pub enum Reply {
    /// Unsigned response with this code
    Rcode(Rcode),
    /// Response signed with the server's own key
    Signed(Rcode),
    /// Response signed with some other key
    SignedWith(Rcode, Arc<TsigKey>),
    /// Response answering a different message id
    WrongId,
    /// Never answer in time
    Silent,
    /// Transport failure
    Fail,
    /// Transport shut down
    Stopped,
    /// The exchange task panics
    Panic,
}

/// One exchange seen by the transport
#[derive(Debug, Clone)]
pub struct Exchange {
    pub server: IpAddr,
    pub request: UpdateMessage,
}

/// A DnsTransport that answers from a script
///
/// Replies are consumed in order; once the script is exhausted every
/// exchange gets the default reply.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    default_reply: Reply,
    exchanges: Mutex<Vec<Exchange>>,
    exchange_count: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
    /// A transport answering every exchange with `default_reply`
    pub fn new(default_reply: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply,
            exchanges: Mutex::new(Vec::new()),
            exchange_count: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Answer the first exchanges with `replies`
    pub fn with_script(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.script.lock().unwrap().extend(replies);
        self
    }

    /// Hold every exchange until a permit is added to `gate`
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Get the number of exchanges performed
    pub fn exchange_count(&self) -> usize {
        self.exchange_count.load(Ordering::SeqCst)
    }

    /// Get every exchange performed, in order
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DnsTransport for ScriptedTransport {
    async fn exchange(
        &self,
        server: &DnsServerInfo,
        request: &UpdateMessage,
    ) -> Result<UpdateResponse> {
        self.exchange_count.fetch_add(1, Ordering::SeqCst);
        self.exchanges.lock().unwrap().push(Exchange {
            server: server.ip_address,
            request: request.clone(),
        });

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        match reply {
            Reply::Rcode(rcode) => Ok(UpdateResponse::new(request.id, rcode)),
            Reply::Signed(rcode) => {
                let key = server.tsig_key.as_ref().expect("server has no key");
                signed(request, rcode, key)
            }
            Reply::SignedWith(rcode, key) => signed(request, rcode, &key),
            Reply::WrongId => Ok(UpdateResponse::new(request.id.wrapping_add(1), Rcode::NoError)),
            Reply::Silent => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(Error::transport("no answer"))
            }
            Reply::Fail => Err(Error::transport("connection refused")),
            Reply::Stopped => Err(Error::IoStopped),
            Reply::Panic => panic!("scripted transport panicked"),
        }
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

fn signed(request: &UpdateMessage, rcode: Rcode, key: &TsigKey) -> Result<UpdateResponse> {
    let mut response = UpdateResponse::new(request.id, rcode);
    response.sign(key, request, Utc::now(), DEFAULT_FUDGE)?;
    Ok(response)
}

/// A TSIG key made from the shared test secret
pub fn test_key(name: &str) -> Arc<TsigKey> {
    Arc::new(TsigKey::from_base64(name, TsigAlgorithm::HmacSha256, SECRET).unwrap())
}

/// A forward-and-reverse add request for `fqdn` at `ip`
pub fn add_request(fqdn: &str, ip: &str) -> NameChangeRequest {
    request(ChangeType::Add, fqdn, ip)
}

/// A forward-and-reverse remove request for `fqdn` at `ip`
pub fn remove_request(fqdn: &str, ip: &str) -> NameChangeRequest {
    request(ChangeType::Remove, fqdn, ip)
}

fn request(change_type: ChangeType, fqdn: &str, ip: &str) -> NameChangeRequest {
    let dhcid = Dhcid::from_identifier(
        d2_core::ncr::IdentifierType::ClientId,
        fqdn.as_bytes(),
        fqdn,
    )
    .unwrap();
    NameChangeRequest::new(change_type, fqdn, ip.parse().unwrap(), dhcid).with_lease_length(3600)
}

/// A domain served by `servers`, in order
pub fn domain(name: &str, servers: &[&str]) -> DomainConfig {
    servers.iter().fold(DomainConfig::new(name), |domain, ip| {
        domain.with_server(ServerConfig::new(ip.parse().unwrap()))
    })
}

/// A configuration for example.com and 192.0.2.0/24 with a short timeout
pub fn test_config(servers: &[&str]) -> D2Config {
    let mut config = D2Config::new();
    config.params.dns_server_timeout_ms = TEST_TIMEOUT_MS;
    config.forward_ddns = vec![domain("example.com.", servers)];
    config.reverse_ddns = vec![domain("2.0.192.in-addr.arpa.", servers)];
    config
}

/// [`test_config`] with every domain signing with `key_name`
pub fn signed_test_config(servers: &[&str], key_name: &str) -> D2Config {
    let mut config = test_config(servers);
    config.tsig_keys = vec![TsigKeyConfig::new(
        key_name,
        TsigAlgorithm::HmacSha256,
        SECRET,
    )];
    for domain in config
        .forward_ddns
        .iter_mut()
        .chain(config.reverse_ddns.iter_mut())
    {
        domain.key_name = Some(key_name.to_string());
    }
    config
}

/// Build `config` or fail the test
pub fn build(config: &D2Config) -> UpdateConfig {
    config.build().expect("test configuration builds")
}
