//! TSIG keys, signing and verification
//!
//! Requests sent to a server configured with a key carry a [`TsigRecord`]
//! whose MAC covers the message body and the signing variables. A response
//! to a signed request must carry a record made with the same key whose
//! MAC additionally covers the request MAC.

use std::fmt;

use chrono::{DateTime, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

/// Default permitted clock skew in seconds
pub const DEFAULT_FUDGE: u16 = 300;

/// TSIG failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TsigError {
    /// The key itself is unusable
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The record names a different key or algorithm
    #[error("bad key: {0}")]
    BadKey(String),

    /// The MAC does not match
    #[error("bad signature")]
    BadSig,

    /// The signing time is outside the permitted fudge
    #[error("bad time: signed {time_signed}, now {now}")]
    BadTime {
        /// When the record claims it was signed
        time_signed: DateTime<Utc>,
        /// Local time of verification
        now: DateTime<Utc>,
    },
}

/// HMAC algorithm of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TsigAlgorithm {
    /// HMAC-SHA1
    HmacSha1,
    /// HMAC-SHA256
    HmacSha256,
    /// HMAC-SHA384
    HmacSha384,
    /// HMAC-SHA512
    HmacSha512,
}

impl TsigAlgorithm {
    /// Algorithm name as it appears in a TSIG record
    pub fn name(self) -> &'static str {
        match self {
            TsigAlgorithm::HmacSha1 => "hmac-sha1.",
            TsigAlgorithm::HmacSha256 => "hmac-sha256.",
            TsigAlgorithm::HmacSha384 => "hmac-sha384.",
            TsigAlgorithm::HmacSha512 => "hmac-sha512.",
        }
    }
}

/// The signature carried by a signed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsigRecord {
    /// Name of the signing key
    pub key_name: String,
    /// Algorithm of the signing key
    pub algorithm: TsigAlgorithm,
    /// Signing time
    pub time_signed: DateTime<Utc>,
    /// Permitted clock skew in seconds
    pub fudge: u16,
    /// Message authentication code
    pub mac: Vec<u8>,
}

/// A shared secret key
#[derive(Clone, PartialEq, Eq)]
pub struct TsigKey {
    name: String,
    algorithm: TsigAlgorithm,
    secret: Vec<u8>,
}

// The secret never appears in debug output
impl fmt::Debug for TsigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsigKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl TsigKey {
    /// Create a key from raw secret bytes
    pub fn new(
        name: impl Into<String>,
        algorithm: TsigAlgorithm,
        secret: impl Into<Vec<u8>>,
    ) -> Result<Self, TsigError> {
        let name = name.into();
        let secret = secret.into();

        if name.trim_end_matches('.').is_empty() {
            return Err(TsigError::InvalidKey("key name cannot be empty".to_string()));
        }
        if secret.is_empty() {
            return Err(TsigError::InvalidKey(format!(
                "secret of key {} cannot be empty",
                name
            )));
        }

        Ok(Self {
            name,
            algorithm,
            secret,
        })
    }

    /// Create a key from a base64 secret
    pub fn from_base64(
        name: impl Into<String>,
        algorithm: TsigAlgorithm,
        secret: &str,
    ) -> Result<Self, TsigError> {
        let name = name.into();
        let bytes = base64::decode(secret.trim()).map_err(|e| {
            TsigError::InvalidKey(format!("secret of key {} is not base64: {}", name, e))
        })?;
        Self::new(name, algorithm, bytes)
    }

    /// Key name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key algorithm
    pub fn algorithm(&self) -> TsigAlgorithm {
        self.algorithm
    }

    /// Sign `data`, binding the signature to `request_mac` when signing a
    /// response
    pub fn sign(
        &self,
        data: &[u8],
        request_mac: Option<&[u8]>,
        time_signed: DateTime<Utc>,
        fudge: u16,
    ) -> Result<TsigRecord, TsigError> {
        let name = canonical_name(&self.name);
        let time_bytes = time_signed.timestamp().to_be_bytes();
        let fudge_bytes = fudge.to_be_bytes();
        let parts = self.digest_parts(&name, data, request_mac, &time_bytes, &fudge_bytes);

        let mac = match self.algorithm {
            TsigAlgorithm::HmacSha1 => keyed::<Hmac<Sha1>>(&self.secret, &parts)?
                .finalize()
                .into_bytes()
                .to_vec(),
            TsigAlgorithm::HmacSha256 => keyed::<Hmac<Sha256>>(&self.secret, &parts)?
                .finalize()
                .into_bytes()
                .to_vec(),
            TsigAlgorithm::HmacSha384 => keyed::<Hmac<Sha384>>(&self.secret, &parts)?
                .finalize()
                .into_bytes()
                .to_vec(),
            TsigAlgorithm::HmacSha512 => keyed::<Hmac<Sha512>>(&self.secret, &parts)?
                .finalize()
                .into_bytes()
                .to_vec(),
        };

        Ok(TsigRecord {
            key_name: self.name.clone(),
            algorithm: self.algorithm,
            time_signed,
            fudge,
            mac,
        })
    }

    /// Verify that `record` signs `data` with this key
    pub fn verify(
        &self,
        record: &TsigRecord,
        data: &[u8],
        request_mac: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<(), TsigError> {
        if !names_equal(&record.key_name, &self.name) || record.algorithm != self.algorithm {
            return Err(TsigError::BadKey(format!(
                "expected {} ({}), got {} ({})",
                self.name,
                self.algorithm.name(),
                record.key_name,
                record.algorithm.name()
            )));
        }

        let name = canonical_name(&self.name);
        let time_bytes = record.time_signed.timestamp().to_be_bytes();
        let fudge_bytes = record.fudge.to_be_bytes();
        let parts = self.digest_parts(&name, data, request_mac, &time_bytes, &fudge_bytes);

        let valid = match self.algorithm {
            TsigAlgorithm::HmacSha1 => keyed::<Hmac<Sha1>>(&self.secret, &parts)?
                .verify_slice(&record.mac)
                .is_ok(),
            TsigAlgorithm::HmacSha256 => keyed::<Hmac<Sha256>>(&self.secret, &parts)?
                .verify_slice(&record.mac)
                .is_ok(),
            TsigAlgorithm::HmacSha384 => keyed::<Hmac<Sha384>>(&self.secret, &parts)?
                .verify_slice(&record.mac)
                .is_ok(),
            TsigAlgorithm::HmacSha512 => keyed::<Hmac<Sha512>>(&self.secret, &parts)?
                .verify_slice(&record.mac)
                .is_ok(),
        };
        if !valid {
            return Err(TsigError::BadSig);
        }

        let skew = (now - record.time_signed).num_seconds().abs();
        if skew > i64::from(record.fudge) {
            return Err(TsigError::BadTime {
                time_signed: record.time_signed,
                now,
            });
        }

        Ok(())
    }

    fn digest_parts<'a>(
        &self,
        name: &'a str,
        data: &'a [u8],
        request_mac: Option<&'a [u8]>,
        time_bytes: &'a [u8; 8],
        fudge_bytes: &'a [u8; 2],
    ) -> Vec<&'a [u8]> {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(6);
        if let Some(request_mac) = request_mac {
            parts.push(request_mac);
        }
        parts.push(data);
        parts.push(name.as_bytes());
        parts.push(self.algorithm.name().as_bytes());
        // 48-bit signing time
        parts.push(&time_bytes[2..]);
        parts.push(fudge_bytes);
        parts
    }
}

fn keyed<M: Mac + KeyInit>(secret: &[u8], parts: &[&[u8]]) -> Result<M, TsigError> {
    let mut mac = <M as Mac>::new_from_slice(secret)
        .map_err(|e| TsigError::InvalidKey(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

fn canonical_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn names_equal(a: &str, b: &str) -> bool {
    canonical_name(a) == canonical_name(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(name: &str, secret: &str) -> TsigKey {
        TsigKey::from_base64(name, TsigAlgorithm::HmacSha256, secret).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let key = key("d2.key.", "c2VjcmV0LWtleS1tYXRlcmlhbA==");
        let now = Utc::now();

        let record = key.sign(b"body", None, now, DEFAULT_FUDGE).unwrap();
        assert_eq!(record.mac.len(), 32);
        assert!(key.verify(&record, b"body", None, now).is_ok());
        assert_eq!(key.verify(&record, b"tampered", None, now), Err(TsigError::BadSig));
    }

    #[test]
    fn test_response_is_bound_to_request_mac() {
        let key = key("d2.key", "c2VjcmV0LWtleS1tYXRlcmlhbA==");
        let now = Utc::now();

        let record = key.sign(b"answer", Some(b"request-mac"), now, DEFAULT_FUDGE).unwrap();
        assert!(key.verify(&record, b"answer", Some(b"request-mac"), now).is_ok());
        assert!(key.verify(&record, b"answer", Some(b"other-mac"), now).is_err());
        assert!(key.verify(&record, b"answer", None, now).is_err());
    }

    #[test]
    fn test_key_name_comparison_ignores_case_and_dot() {
        let signer = key("D2.Key.", "c2VjcmV0LWtleS1tYXRlcmlhbA==");
        let verifier = key("d2.key", "c2VjcmV0LWtleS1tYXRlcmlhbA==");
        let now = Utc::now();

        let record = signer.sign(b"body", None, now, DEFAULT_FUDGE).unwrap();
        assert!(verifier.verify(&record, b"body", None, now).is_ok());

        let record = verifier.sign(b"body", None, now, DEFAULT_FUDGE).unwrap();
        let renamed = TsigRecord {
            key_name: "D2.KEY.".to_string(),
            ..record
        };
        assert!(verifier.verify(&renamed, b"body", None, now).is_ok());
    }

    #[test]
    fn test_different_key_is_bad_key() {
        let ours = key("ours.key", "c2VjcmV0LWtleS1tYXRlcmlhbA==");
        let theirs = key("theirs.key", "b3RoZXItc2VjcmV0");
        let now = Utc::now();

        let record = theirs.sign(b"body", None, now, DEFAULT_FUDGE).unwrap();
        assert!(matches!(
            ours.verify(&record, b"body", None, now),
            Err(TsigError::BadKey(_))
        ));
    }

    #[test]
    fn test_same_name_different_secret_is_bad_sig() {
        let ours = key("d2.key", "c2VjcmV0LWtleS1tYXRlcmlhbA==");
        let forged = key("d2.key", "b3RoZXItc2VjcmV0");
        let now = Utc::now();

        let record = forged.sign(b"body", None, now, DEFAULT_FUDGE).unwrap();
        assert_eq!(ours.verify(&record, b"body", None, now), Err(TsigError::BadSig));
    }

    #[test]
    fn test_time_outside_fudge() {
        let key = key("d2.key", "c2VjcmV0LWtleS1tYXRlcmlhbA==");
        let signed = Utc::now();

        let record = key.sign(b"body", None, signed, 10).unwrap();
        assert!(key.verify(&record, b"body", None, signed + Duration::seconds(10)).is_ok());
        assert!(matches!(
            key.verify(&record, b"body", None, signed + Duration::seconds(11)),
            Err(TsigError::BadTime { .. })
        ));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(TsigKey::new("", TsigAlgorithm::HmacSha1, vec![1]).is_err());
        assert!(TsigKey::new("k", TsigAlgorithm::HmacSha1, Vec::new()).is_err());
        assert!(TsigKey::from_base64("k", TsigAlgorithm::HmacSha512, "not base64!").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = key("d2.key", "c2VjcmV0LWtleS1tYXRlcmlhbA==");
        let debug = format!("{:?}", key);
        assert!(debug.contains("<REDACTED>"));
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn test_algorithm_serde_names() {
        let algorithm: TsigAlgorithm = serde_json::from_str("\"hmac-sha384\"").unwrap();
        assert_eq!(algorithm, TsigAlgorithm::HmacSha384);
        assert_eq!(algorithm.name(), "hmac-sha384.");
    }
}
