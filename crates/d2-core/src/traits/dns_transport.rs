// # DNS Transport Trait
//
// Defines the interface for exchanging one DNS UPDATE with one server.
//
// ## Implementations
//
// - Test doubles in `tests/common`
// - Future: UDP/TCP wire transport
//
// ## Usage
//
// ```rust,ignore
// use d2_core::{DnsClient, DnsTransport};
//
// async fn send(transport: &dyn DnsTransport, client: &DnsClient, request: UpdateMessage) {
//     let outcome = client.send_update(transport, request, timeout).await;
//     println!("{}", outcome.status);
// }
// ```

use async_trait::async_trait;

use crate::domain::DnsServerInfo;
use crate::message::{UpdateMessage, UpdateResponse};

/// Trait for DNS transport implementations
///
/// A transport encodes a request, sends it to one server and decodes the
/// answer. It never signs, verifies, retries or applies timeouts; the
/// [`crate::DnsClient`] owns all of that.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Errors
///
/// - [`crate::Error::IoStopped`] when the transport is shutting down and
///   abandoned the exchange
/// - any other error for send, receive or decode failures
#[async_trait]
pub trait DnsTransport: Send + Sync {
    /// Send `request` to `server` and return its answer
    ///
    /// # Parameters
    ///
    /// - `server`: The server to send to
    /// - `request`: The (possibly signed) update
    ///
    /// # Returns
    ///
    /// - `Ok(UpdateResponse)`: The decoded answer, not yet verified
    /// - `Err(Error)`: If the exchange failed
    async fn exchange(
        &self,
        server: &DnsServerInfo,
        request: &UpdateMessage,
    ) -> Result<UpdateResponse, crate::Error>;

    /// Get the transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}
