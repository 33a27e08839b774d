//! Core traits for the update daemon
//!
//! This module defines the abstract interfaces to the outside world.
//!
//! - [`DnsTransport`]: Exchange one DNS UPDATE with one server
//! - [`NcrSource`]: Deliver name change requests

pub mod dns_transport;
pub mod ncr_source;

pub use dns_transport::DnsTransport;
pub use ncr_source::{ChannelNcrSource, NcrSource};
