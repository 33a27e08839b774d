// # Name Change Request Source Trait
//
// Defines the interface through which the update manager receives name
// change requests from DHCP servers.
//
// ## Implementations
//
// - [`ChannelNcrSource`]: requests pushed through a tokio channel
// - Future: UDP listener for JSON-encoded requests

use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::ncr::NameChangeRequest;

/// Trait for name change request sources
///
/// Implementations must be thread-safe and usable across async tasks.
/// The stream ends when the source has nothing more to deliver.
pub trait NcrSource: Send + Sync {
    /// Stream of incoming requests
    ///
    /// Called once by the manager when it starts.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NameChangeRequest> + Send + 'static>>;
}

/// A source fed through an mpsc channel
pub struct ChannelNcrSource {
    receiver: std::sync::Mutex<Option<mpsc::Receiver<NameChangeRequest>>>,
}

impl ChannelNcrSource {
    /// Create a source and the sender that feeds it
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<NameChangeRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        let source = Self {
            receiver: std::sync::Mutex::new(Some(rx)),
        };
        (source, tx)
    }
}

impl NcrSource for ChannelNcrSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NameChangeRequest> + Send + 'static>> {
        let receiver = self
            .receiver
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());

        match receiver {
            Some(rx) => Box::pin(ReceiverStream::new(rx)),
            // Already watched
            None => Box::pin(tokio_stream::empty()),
        }
    }
}
