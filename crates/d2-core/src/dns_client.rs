//! DNS client: one update exchange with one server
//!
//! The client signs the request with its server's key, runs the transport
//! exchange under a timeout and reduces everything that can happen to a
//! [`DnsClientStatus`].
//!
//! Response acceptance is asymmetric. A request signed with a key must be
//! answered with a response signed by the same key; anything else is
//! [`DnsClientStatus::InvalidResponse`]. A request sent without a key
//! accepts a signed response without verifying it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::DnsServerInfo;
use crate::error::Error;
use crate::message::{UpdateMessage, UpdateResponse};
use crate::traits::DnsTransport;
use crate::tsig::DEFAULT_FUDGE;

/// Outcome of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsClientStatus {
    /// A response was received and accepted
    Success,
    /// No response within the timeout
    Timeout,
    /// The transport was stopped before the exchange finished
    IoStopped,
    /// The response was malformed, mismatched or failed TSIG checks
    InvalidResponse,
    /// Any other I/O failure
    Other,
}

impl fmt::Display for DnsClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DnsClientStatus::Success => "SUCCESS",
            DnsClientStatus::Timeout => "TIMEOUT",
            DnsClientStatus::IoStopped => "IO_STOPPED",
            DnsClientStatus::InvalidResponse => "INVALID_RESPONSE",
            DnsClientStatus::Other => "OTHER",
        };
        f.write_str(text)
    }
}

/// Status and, on success, the accepted response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// How the exchange ended
    pub status: DnsClientStatus,
    /// The response, present only with [`DnsClientStatus::Success`]
    pub response: Option<UpdateResponse>,
}

impl ExchangeOutcome {
    fn failed(status: DnsClientStatus) -> Self {
        Self {
            status,
            response: None,
        }
    }
}

/// Client bound to one server
#[derive(Debug, Clone)]
pub struct DnsClient {
    server: Arc<DnsServerInfo>,
    fudge: u16,
}

impl DnsClient {
    /// Create a client for `server`
    pub fn new(server: Arc<DnsServerInfo>) -> Self {
        Self {
            server,
            fudge: DEFAULT_FUDGE,
        }
    }

    /// The server this client talks to
    pub fn server(&self) -> &Arc<DnsServerInfo> {
        &self.server
    }

    /// Sign `request`, exchange it and classify the result
    pub async fn send_update(
        &self,
        transport: &dyn DnsTransport,
        mut request: UpdateMessage,
        timeout: Duration,
    ) -> ExchangeOutcome {
        if let Some(key) = &self.server.tsig_key {
            if let Err(e) = request.sign(key, Utc::now(), self.fudge) {
                warn!("Failed to sign update for {}: {}", self.server, e);
                return ExchangeOutcome::failed(DnsClientStatus::Other);
            }
        }

        debug!(
            "Exchanging update {} with {} via {}",
            request.id,
            self.server,
            transport.transport_name()
        );

        let exchange = transport.exchange(&self.server, &request);
        match tokio::time::timeout(timeout, exchange).await {
            Err(_) => {
                debug!("Update {} to {} timed out", request.id, self.server);
                ExchangeOutcome::failed(DnsClientStatus::Timeout)
            }
            Ok(Err(Error::IoStopped)) => ExchangeOutcome::failed(DnsClientStatus::IoStopped),
            Ok(Err(e)) => {
                warn!("Update {} to {} failed: {}", request.id, self.server, e);
                ExchangeOutcome::failed(DnsClientStatus::Other)
            }
            Ok(Ok(response)) => {
                match self.classify_response(&request, &response, Utc::now()) {
                    DnsClientStatus::Success => ExchangeOutcome {
                        status: DnsClientStatus::Success,
                        response: Some(response),
                    },
                    status => ExchangeOutcome::failed(status),
                }
            }
        }
    }

    /// Decide whether `response` is an acceptable answer to `request`
    pub fn classify_response(
        &self,
        request: &UpdateMessage,
        response: &UpdateResponse,
        now: DateTime<Utc>,
    ) -> DnsClientStatus {
        if response.id != request.id {
            warn!(
                "Response id {} from {} does not match request id {}",
                response.id, self.server, request.id
            );
            return DnsClientStatus::InvalidResponse;
        }

        let Some(key) = &self.server.tsig_key else {
            if response.tsig.is_some() {
                debug!("Accepting signed response from {} to unsigned request", self.server);
            }
            return DnsClientStatus::Success;
        };

        let Some(tsig) = &response.tsig else {
            warn!("Unsigned response from {} to signed request", self.server);
            return DnsClientStatus::InvalidResponse;
        };

        let data = match response.signing_data() {
            Ok(data) => data,
            Err(e) => {
                warn!("Cannot verify response from {}: {}", self.server, e);
                return DnsClientStatus::InvalidResponse;
            }
        };

        let request_mac = request.tsig.as_ref().map(|tsig| tsig.mac.as_slice());
        match key.verify(tsig, &data, request_mac, now) {
            Ok(()) => DnsClientStatus::Success,
            Err(e) => {
                warn!("Response from {} failed TSIG verification: {}", self.server, e);
                DnsClientStatus::InvalidResponse
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Rcode;
    use crate::tsig::{TsigAlgorithm, TsigKey};
    use async_trait::async_trait;

    fn key(name: &str) -> Arc<TsigKey> {
        Arc::new(TsigKey::new(name, TsigAlgorithm::HmacSha256, b"secret".to_vec()).unwrap())
    }

    fn client(key: Option<Arc<TsigKey>>) -> DnsClient {
        let mut server = DnsServerInfo::new("192.0.2.1".parse().unwrap(), 53);
        server.tsig_key = key;
        DnsClient::new(Arc::new(server))
    }

    fn signed_request(key: &TsigKey, now: DateTime<Utc>) -> UpdateMessage {
        let mut request = UpdateMessage::new("example.com.");
        request.sign(key, now, DEFAULT_FUDGE).unwrap();
        request
    }

    #[test]
    fn test_signed_request_requires_signed_response() {
        let now = Utc::now();
        let k = key("d2.key.");
        let request = signed_request(&k, now);
        let response = UpdateResponse::new(request.id, Rcode::NoError);

        let status = client(Some(k)).classify_response(&request, &response, now);
        assert_eq!(status, DnsClientStatus::InvalidResponse);
    }

    #[test]
    fn test_signed_request_rejects_other_key() {
        let now = Utc::now();
        let k = key("d2.key.");
        let request = signed_request(&k, now);
        let mut response = UpdateResponse::new(request.id, Rcode::NoError);
        response.sign(&key("other.key."), &request, now, DEFAULT_FUDGE).unwrap();

        let status = client(Some(k)).classify_response(&request, &response, now);
        assert_eq!(status, DnsClientStatus::InvalidResponse);
    }

    #[test]
    fn test_signed_request_accepts_matching_signature() {
        let now = Utc::now();
        let k = key("d2.key.");
        let request = signed_request(&k, now);
        let mut response = UpdateResponse::new(request.id, Rcode::NoError);
        response.sign(&k, &request, now, DEFAULT_FUDGE).unwrap();

        let status = client(Some(k)).classify_response(&request, &response, now);
        assert_eq!(status, DnsClientStatus::Success);
    }

    #[test]
    fn test_unsigned_request_accepts_signed_response() {
        let now = Utc::now();
        let request = UpdateMessage::new("example.com.");
        let mut response = UpdateResponse::new(request.id, Rcode::NoError);
        response.sign(&key("d2.key."), &request, now, DEFAULT_FUDGE).unwrap();

        let status = client(None).classify_response(&request, &response, now);
        assert_eq!(status, DnsClientStatus::Success);
    }

    #[test]
    fn test_id_mismatch_is_invalid() {
        let request = UpdateMessage::new("example.com.");
        let response = UpdateResponse::new(request.id.wrapping_add(1), Rcode::NoError);

        let status = client(None).classify_response(&request, &response, Utc::now());
        assert_eq!(status, DnsClientStatus::InvalidResponse);
    }

    struct Stalled;

    #[async_trait]
    impl DnsTransport for Stalled {
        async fn exchange(
            &self,
            _server: &DnsServerInfo,
            _request: &UpdateMessage,
        ) -> Result<UpdateResponse, Error> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(Error::transport("unreachable"))
        }

        fn transport_name(&self) -> &'static str {
            "stalled"
        }
    }

    struct Stopped;

    #[async_trait]
    impl DnsTransport for Stopped {
        async fn exchange(
            &self,
            _server: &DnsServerInfo,
            _request: &UpdateMessage,
        ) -> Result<UpdateResponse, Error> {
            Err(Error::IoStopped)
        }

        fn transport_name(&self) -> &'static str {
            "stopped"
        }
    }

    #[tokio::test]
    async fn test_exchange_timeout() {
        let outcome = client(None)
            .send_update(&Stalled, UpdateMessage::new("example.com."), Duration::from_millis(10))
            .await;
        assert_eq!(outcome.status, DnsClientStatus::Timeout);
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn test_exchange_io_stopped() {
        let outcome = client(None)
            .send_update(&Stopped, UpdateMessage::new("example.com."), Duration::from_secs(1))
            .await;
        assert_eq!(outcome.status, DnsClientStatus::IoStopped);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(DnsClientStatus::InvalidResponse.to_string(), "INVALID_RESPONSE");
        assert_eq!(DnsClientStatus::IoStopped.to_string(), "IO_STOPPED");
    }
}
