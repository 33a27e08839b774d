// # d2-core
//
// Core library of the DHCP-DDNS update daemon.
//
// ## Architecture Overview
//
// This library carries name change requests from DHCP servers through
// RFC 2136 DNS updates:
// - **StateModel**: Cooperative state machine engine with verified event/state dictionaries
// - **NameChangeTransaction**: Transaction context, server selection and retry policy
// - **SimpleAddTransaction / SimpleRemoveTransaction**: Concrete update scenarios
// - **DnsClient**: One signed exchange with one server, classified into a status
// - **UpdateManager**: Request intake, domain matching and bounded concurrent transactions
// - **DnsTransport / NcrSource**: Traits for the wire exchange and the request feed
//
// ## Design Principles
//
// 1. **Errors are data**: Once a transaction starts, every failure ends as a status on its request
// 2. **One outstanding exchange**: A transaction suspends after each send and resumes on completion
// 3. **Ordered failover**: Servers are tried in configured order, a bounded number of times each
// 4. **Library-First**: Transport and request intake are plugged in through traits

pub mod add;
pub mod config;
pub mod dns_client;
pub mod domain;
pub mod error;
pub mod labels;
pub mod manager;
pub mod message;
pub mod ncr;
pub mod remove;
pub mod state_model;
pub mod traits;
pub mod transaction;
pub mod tsig;

// Re-export core types for convenience
pub use add::{AddState, SimpleAddTransaction};
pub use config::{D2Config, D2Params, UpdateConfig};
pub use dns_client::{DnsClient, DnsClientStatus, ExchangeOutcome};
pub use domain::{DdnsDomain, DdnsDomainList, DnsServerInfo};
pub use error::{Error, Result};
pub use labels::{Event, LabeledValueSet};
pub use manager::{ManagerEvent, UpdateManager};
pub use message::{Rcode, UpdateMessage, UpdateResponse};
pub use ncr::{ChangeType, Dhcid, NameChangeRequest, NcrStatus};
pub use remove::{RemoveState, SimpleRemoveTransaction};
pub use state_model::{ModelStatus, StateHandler, StateModel};
pub use traits::{ChannelNcrSource, DnsTransport, NcrSource};
pub use transaction::{
    MAX_UPDATE_TRIES_PER_SERVER, NameChangeTransaction, UpdateTransaction, drive,
};
pub use tsig::{TsigAlgorithm, TsigKey};
