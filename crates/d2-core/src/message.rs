//! DNS UPDATE message model
//!
//! Transactions describe an update as a zone plus an ordered list of RRset
//! operations (RFC 2136 §2.5): an RRset with class `ANY` and no RDATA
//! deletes the whole RRset, class `NONE` deletes the listed records, and
//! class `IN` adds them. Turning a message into wire format is the job of
//! a [`crate::traits::DnsTransport`].

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tsig::{TsigKey, TsigRecord};

/// DNS response code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rcode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    YxDomain,
    YxRrset,
    NxRrset,
    NotAuth,
    NotZone,
    /// Any code without a variant
    Other(u16),
}

impl Rcode {
    /// Numeric value of the code
    pub fn to_int(self) -> u16 {
        match self {
            Rcode::NoError => 0,
            Rcode::FormErr => 1,
            Rcode::ServFail => 2,
            Rcode::NxDomain => 3,
            Rcode::NotImp => 4,
            Rcode::Refused => 5,
            Rcode::YxDomain => 6,
            Rcode::YxRrset => 7,
            Rcode::NxRrset => 8,
            Rcode::NotAuth => 9,
            Rcode::NotZone => 10,
            Rcode::Other(value) => value,
        }
    }

    /// Code for a numeric value
    pub fn from_int(value: u16) -> Self {
        match value {
            0 => Rcode::NoError,
            1 => Rcode::FormErr,
            2 => Rcode::ServFail,
            3 => Rcode::NxDomain,
            4 => Rcode::NotImp,
            5 => Rcode::Refused,
            6 => Rcode::YxDomain,
            7 => Rcode::YxRrset,
            8 => Rcode::NxRrset,
            9 => Rcode::NotAuth,
            10 => Rcode::NotZone,
            other => Rcode::Other(other),
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rcode::NoError => f.write_str("NOERROR"),
            Rcode::FormErr => f.write_str("FORMERR"),
            Rcode::ServFail => f.write_str("SERVFAIL"),
            Rcode::NxDomain => f.write_str("NXDOMAIN"),
            Rcode::NotImp => f.write_str("NOTIMP"),
            Rcode::Refused => f.write_str("REFUSED"),
            Rcode::YxDomain => f.write_str("YXDOMAIN"),
            Rcode::YxRrset => f.write_str("YXRRSET"),
            Rcode::NxRrset => f.write_str("NXRRSET"),
            Rcode::NotAuth => f.write_str("NOTAUTH"),
            Rcode::NotZone => f.write_str("NOTZONE"),
            Rcode::Other(value) => write!(f, "RCODE{}", value),
        }
    }
}

/// Record types used by updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    Aaaa,
    Ptr,
    Dhcid,
    /// Every type at a name
    Any,
}

impl RecordType {
    /// Address record type for `address`
    pub fn for_address(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        }
    }
}

/// Record classes used by updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordClass {
    /// Add records
    In,
    /// Delete an RRset, or every RRset at a name
    Any,
    /// Delete specific records
    None,
}

/// RDATA of one record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordData {
    /// A or AAAA
    Address(IpAddr),
    /// PTR target
    Ptr(String),
    /// DHCID bytes
    Dhcid(Vec<u8>),
}

/// One RRset operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rrset {
    /// Owner name
    pub name: String,
    /// Record type
    pub rtype: RecordType,
    /// Operation class
    pub class: RecordClass,
    /// TTL; zero for deletions
    pub ttl: u32,
    /// Records; empty when deleting whole RRsets
    pub rdata: Vec<RecordData>,
}

impl Rrset {
    /// Delete every record of `rtype` at `name`
    pub fn delete_rrset(name: impl Into<String>, rtype: RecordType) -> Self {
        Self {
            name: name.into(),
            rtype,
            class: RecordClass::Any,
            ttl: 0,
            rdata: Vec::new(),
        }
    }

    /// Delete the single record `rdata` at `name`
    pub fn delete_record(name: impl Into<String>, rtype: RecordType, rdata: RecordData) -> Self {
        Self {
            name: name.into(),
            rtype,
            class: RecordClass::None,
            ttl: 0,
            rdata: vec![rdata],
        }
    }

    /// Add the record `rdata` at `name`
    pub fn add_record(
        name: impl Into<String>,
        rtype: RecordType,
        ttl: u32,
        rdata: RecordData,
    ) -> Self {
        Self {
            name: name.into(),
            rtype,
            class: RecordClass::In,
            ttl,
            rdata: vec![rdata],
        }
    }
}

/// An outbound DNS UPDATE request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    /// Message ID
    pub id: u16,
    /// Zone being updated
    pub zone: String,
    /// Prerequisite section
    pub prerequisites: Vec<Rrset>,
    /// Update section
    pub updates: Vec<Rrset>,
    /// Signature, present once signed
    pub tsig: Option<TsigRecord>,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    id: u16,
    zone: &'a str,
    prerequisites: &'a [Rrset],
    updates: &'a [Rrset],
}

impl UpdateMessage {
    /// Create an empty update of `zone` with a random ID
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            id: rand::random(),
            zone: zone.into(),
            prerequisites: Vec::new(),
            updates: Vec::new(),
            tsig: None,
        }
    }

    /// Append to the prerequisite section
    pub fn add_prerequisite(&mut self, rrset: Rrset) {
        self.prerequisites.push(rrset);
    }

    /// Append to the update section
    pub fn add_update(&mut self, rrset: Rrset) {
        self.updates.push(rrset);
    }

    /// Whether the message carries a signature
    pub fn is_signed(&self) -> bool {
        self.tsig.is_some()
    }

    /// Canonical bytes covered by the signature
    pub fn signing_data(&self) -> Result<Vec<u8>> {
        let body = RequestBody {
            id: self.id,
            zone: &self.zone,
            prerequisites: &self.prerequisites,
            updates: &self.updates,
        };
        Ok(serde_json::to_vec(&body)?)
    }

    /// Sign with `key`, replacing any previous signature
    pub fn sign(&mut self, key: &TsigKey, now: DateTime<Utc>, fudge: u16) -> Result<()> {
        let data = self.signing_data()?;
        self.tsig = Some(key.sign(&data, None, now, fudge)?);
        Ok(())
    }
}

/// An inbound response to an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// ID of the request being answered
    pub id: u16,
    /// Response code
    pub rcode: Rcode,
    /// Zone, when echoed by the server
    pub zone: Option<String>,
    /// Signature, if the server signed
    pub tsig: Option<TsigRecord>,
}

#[derive(Serialize)]
struct ResponseBody<'a> {
    id: u16,
    rcode: u16,
    zone: Option<&'a str>,
}

impl UpdateResponse {
    /// Create an unsigned response
    pub fn new(id: u16, rcode: Rcode) -> Self {
        Self {
            id,
            rcode,
            zone: None,
            tsig: None,
        }
    }

    /// Set the echoed zone
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Canonical bytes covered by the signature
    pub fn signing_data(&self) -> Result<Vec<u8>> {
        let body = ResponseBody {
            id: self.id,
            rcode: self.rcode.to_int(),
            zone: self.zone.as_deref(),
        };
        Ok(serde_json::to_vec(&body)?)
    }

    /// Sign as an answer to `request`
    pub fn sign(
        &mut self,
        key: &TsigKey,
        request: &UpdateMessage,
        now: DateTime<Utc>,
        fudge: u16,
    ) -> Result<()> {
        let data = self.signing_data()?;
        let request_mac = request.tsig.as_ref().map(|tsig| tsig.mac.as_slice());
        self.tsig = Some(key.sign(&data, request_mac, now, fudge)?);
        Ok(())
    }
}
