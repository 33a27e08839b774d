// # Name Change Requests
//
// A name change request (NCR) is produced by a DHCP server when a lease is
// granted or released. It names the FQDN and address involved, which
// directions (forward, reverse) must be updated, and the DHCID that ties
// the DNS data to the lease holder.
//
// The update core reads every field of a request and writes only its
// status, once, when a transaction reaches a terminal state.
//
// ## Wire format
//
// Requests travel as JSON:
//
// ```json
// {
//   "change_type": "add",
//   "forward_change": true,
//   "reverse_change": true,
//   "fqdn": "myhost.example.com.",
//   "ip_address": "192.0.2.10",
//   "dhcid": "000201D9A8...",
//   "lease_expires_on": "2026-10-18T12:00:00Z",
//   "lease_length": 1300
// }
// ```

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Kind of DNS change requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Add the lease's DNS data
    Add,
    /// Remove the lease's DNS data
    Remove,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Add => f.write_str("add"),
            ChangeType::Remove => f.write_str("remove"),
        }
    }
}

/// Processing status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NcrStatus {
    /// Not yet processed
    #[default]
    Pending,
    /// All requested changes were applied
    Completed,
    /// The request could not be carried out
    Failed,
}

impl fmt::Display for NcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NcrStatus::Pending => f.write_str("Pending"),
            NcrStatus::Completed => f.write_str("Completed"),
            NcrStatus::Failed => f.write_str("Failed"),
        }
    }
}

/// Client identifier kinds a DHCID can be computed from (RFC 4701)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierType {
    /// Hardware type octet followed by the hardware address
    HwAddr = 0x0000,
    /// DHCPv4 client identifier option
    ClientId = 0x0001,
    /// DHCP unique identifier
    Duid = 0x0002,
}

/// DHCID digest type for SHA-256
const DHCID_DIGEST_SHA256: u8 = 1;

/// DHCID RDATA identifying the lease holder
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dhcid(Vec<u8>);

impl Dhcid {
    /// Wrap raw DHCID RDATA
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(Error::ncr("DHCID cannot be empty"));
        }
        Ok(Self(bytes))
    }

    /// Parse DHCID RDATA from hexadecimal
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| Error::ncr(format!("DHCID is not valid hex: {}", e)))?;
        Self::new(bytes)
    }

    /// Compute the DHCID of a client identifier for `fqdn`
    ///
    /// The digest covers the identifier followed by the FQDN in canonical
    /// wire format.
    pub fn from_identifier(kind: IdentifierType, identifier: &[u8], fqdn: &str) -> Result<Self> {
        if identifier.is_empty() {
            return Err(Error::ncr("client identifier cannot be empty"));
        }

        let mut hasher = Sha256::new();
        hasher.update(identifier);
        hasher.update(fqdn_to_wire(fqdn)?);
        let digest = hasher.finalize();

        let mut bytes = Vec::with_capacity(3 + digest.len());
        bytes.extend_from_slice(&(kind as u16).to_be_bytes());
        bytes.push(DHCID_DIGEST_SHA256);
        bytes.extend_from_slice(&digest);
        Ok(Self(bytes))
    }

    /// Raw RDATA
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Uppercase hexadecimal form
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }
}

impl TryFrom<String> for Dhcid {
    type Error = Error;

    fn try_from(text: String) -> Result<Self> {
        Self::from_hex(&text)
    }
}

impl From<Dhcid> for String {
    fn from(dhcid: Dhcid) -> Self {
        dhcid.to_hex()
    }
}

impl fmt::Display for Dhcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Dhcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dhcid({})", self.to_hex())
    }
}

/// Lowercased, length-prefixed label encoding of `fqdn`
fn fqdn_to_wire(fqdn: &str) -> Result<Vec<u8>> {
    let trimmed = fqdn.trim_end_matches('.');
    let mut wire = Vec::with_capacity(trimmed.len() + 2);

    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > 63 {
                return Err(Error::ncr(format!("invalid label in FQDN: {}", fqdn)));
            }
            wire.push(label.len() as u8);
            wire.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
        }
    }

    wire.push(0);
    if wire.len() > 255 {
        return Err(Error::ncr(format!("FQDN too long: {}", fqdn)));
    }
    Ok(wire)
}

/// A request to change the DNS data of one lease
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameChangeRequest {
    /// Add or remove
    pub change_type: ChangeType,
    /// Whether the forward (address) records must change
    pub forward_change: bool,
    /// Whether the reverse (PTR) records must change
    pub reverse_change: bool,
    /// The client's fully qualified domain name
    pub fqdn: String,
    /// The leased address
    pub ip_address: IpAddr,
    /// DHCID of the lease holder
    pub dhcid: Dhcid,
    /// When the lease expires
    pub lease_expires_on: DateTime<Utc>,
    /// Lease length in seconds, used as record TTL
    pub lease_length: u32,
    #[serde(skip)]
    status: NcrStatus,
}

impl NameChangeRequest {
    /// Create a request changing both directions
    pub fn new(
        change_type: ChangeType,
        fqdn: impl Into<String>,
        ip_address: IpAddr,
        dhcid: Dhcid,
    ) -> Self {
        Self {
            change_type,
            forward_change: true,
            reverse_change: true,
            fqdn: fqdn.into(),
            ip_address,
            dhcid,
            lease_expires_on: Utc::now(),
            lease_length: 0,
            status: NcrStatus::Pending,
        }
    }

    /// Set whether the forward records change
    pub fn with_forward_change(mut self, forward_change: bool) -> Self {
        self.forward_change = forward_change;
        self
    }

    /// Set whether the reverse records change
    pub fn with_reverse_change(mut self, reverse_change: bool) -> Self {
        self.reverse_change = reverse_change;
        self
    }

    /// Set the lease length (record TTL)
    pub fn with_lease_length(mut self, lease_length: u32) -> Self {
        self.lease_length = lease_length;
        self
    }

    /// Set the lease expiry time
    pub fn with_lease_expires_on(mut self, lease_expires_on: DateTime<Utc>) -> Self {
        self.lease_expires_on = lease_expires_on;
        self
    }

    /// Parse and validate a JSON request
    pub fn from_json(json: &str) -> Result<Self> {
        let ncr: Self = serde_json::from_str(json)?;
        ncr.validate()?;
        Ok(ncr)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check the request is actionable
    pub fn validate(&self) -> Result<()> {
        if self.fqdn.trim_end_matches('.').is_empty() {
            return Err(Error::ncr("FQDN cannot be empty"));
        }

        fqdn_to_wire(&self.fqdn)?;

        if !self.forward_change && !self.reverse_change {
            return Err(Error::ncr(
                "request must change the forward or reverse direction",
            ));
        }

        if self.dhcid.as_bytes().is_empty() {
            return Err(Error::ncr("DHCID cannot be empty"));
        }

        Ok(())
    }

    /// Current processing status
    pub fn status(&self) -> NcrStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: NcrStatus) {
        self.status = status;
    }

    /// Whether the leased address is IPv4
    pub fn is_v4(&self) -> bool {
        self.ip_address.is_ipv4()
    }

    /// Multi-line textual form for logs and outcome summaries
    pub fn to_text(&self) -> String {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        format!(
            "Type: {}\n\
             Forward Change: {}\n\
             Reverse Change: {}\n\
             FQDN: [{}]\n\
             IP Address: [{}]\n\
             DHCID: [{}]\n\
             Lease Expires On: {}\n\
             Lease Length: {}\n",
            self.change_type,
            yes_no(self.forward_change),
            yes_no(self.reverse_change),
            self.fqdn,
            self.ip_address,
            self.dhcid,
            self.lease_expires_on.format("%Y%m%d%H%M%S"),
            self.lease_length
        )
    }
}
