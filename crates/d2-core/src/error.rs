//! Error types for the DNS update core
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

use crate::tsig::TsigError;

/// Result type alias for update operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DNS update core
#[derive(Error, Debug)]
pub enum Error {
    /// A handler was run in a context it cannot handle
    ///
    /// Raised for programming errors such as an unexpected event for the
    /// current state. A running model converts this into a failed outcome.
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    /// State model and dictionary violations
    #[error("State model error: {0}")]
    StateModel(String),

    /// Transaction construction or request-building errors
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed name change request
    #[error("Invalid name change request: {0}")]
    Ncr(String),

    /// TSIG key or signature errors
    #[error("TSIG error: {0}")]
    Tsig(#[from] TsigError),

    /// Transport-level failure reported by a `DnsTransport`
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport was stopped while an exchange was outstanding
    #[error("I/O stopped")]
    IoStopped,

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid context error
    pub fn invalid_context(msg: impl Into<String>) -> Self {
        Self::InvalidContext(msg.into())
    }

    /// Create a state model error
    pub fn state_model(msg: impl Into<String>) -> Self {
        Self::StateModel(msg.into())
    }

    /// Create a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a name change request error
    pub fn ncr(msg: impl Into<String>) -> Self {
        Self::Ncr(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
///
/// Transport implementations commonly use `anyhow` internally.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
