//! Document model
//!
//! Documents are opaque byte values addressed by string keys. The store owns
//! them; the cache tier only ever holds a copy encoded with
//! [`DocumentRecord::encode_payload`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::ValidationError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Longest accepted document key, in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// Default upper bound for a single document value (20 MiB).
pub const DEFAULT_MAX_VALUE_BYTES: usize = 20 * 1024 * 1024;

/// Header size of an encoded payload: version (u64) + updated_at millis (i64).
const PAYLOAD_HEADER_LEN: usize = 16;

/// Validated document key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Parse and validate a key: 1..=512 bytes, no ASCII control characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(ValidationError::KeyTooLong {
                len: raw.len(),
                max: MAX_KEY_LEN,
            });
        }
        if let Some(position) = raw.bytes().position(|b| b.is_ascii_control()) {
            return Err(ValidationError::InvalidKeyCharacter { position });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocumentKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DocumentKey> for String {
    fn from(key: DocumentKey) -> Self {
        key.0
    }
}

/// Reject values larger than `max` bytes.
pub fn validate_value_size(value: &[u8], max: usize) -> Result<(), ValidationError> {
    if value.len() > max {
        return Err(ValidationError::ValueTooLarge {
            size: value.len(),
            max,
        });
    }
    Ok(())
}

/// A durable document as held by the store.
///
/// `version` starts at 1 and is bumped by exactly one on every successful
/// write of the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub key: DocumentKey,
    pub value: Vec<u8>,
    pub version: u64,
    pub updated_at: Timestamp,
}

impl DocumentRecord {
    /// Encode version, timestamp and value for the cache tier.
    ///
    /// Format: `[version: u64 LE][updated_at millis: i64 LE][value]`.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PAYLOAD_HEADER_LEN + self.value.len());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.updated_at.timestamp_millis().to_le_bytes());
        out.extend_from_slice(&self.value);
        out
    }

    /// Decode a payload written by [`encode_payload`](Self::encode_payload).
    ///
    /// Returns `None` for truncated or otherwise unreadable payloads.
    pub fn decode_payload(key: DocumentKey, bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PAYLOAD_HEADER_LEN {
            return None;
        }
        let version = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let millis = i64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let updated_at = DateTime::<Utc>::from_timestamp_millis(millis)?;
        Some(Self {
            key,
            value: bytes[PAYLOAD_HEADER_LEN..].to_vec(),
            version,
            updated_at,
        })
    }

    pub fn etag(&self) -> String {
        compute_etag(&self.value)
    }
}

/// Hex SHA-256 of a document value, used as the HTTP entity tag.
pub fn compute_etag(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(value: &[u8], version: u64) -> DocumentRecord {
        DocumentRecord {
            key: DocumentKey::parse("a/b").unwrap(),
            value: value.to_vec(),
            version,
            updated_at: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap(),
        }
    }

    #[test]
    fn test_key_rejects_empty_and_control_chars() {
        assert_eq!(DocumentKey::parse(""), Err(ValidationError::EmptyKey));
        assert_eq!(
            DocumentKey::parse("ab\ncd"),
            Err(ValidationError::InvalidKeyCharacter { position: 2 })
        );
        assert!(DocumentKey::parse("pypi/simple/requests").is_ok());
    }

    #[test]
    fn test_key_length_limit() {
        assert!(DocumentKey::parse("k".repeat(MAX_KEY_LEN)).is_ok());
        assert_eq!(
            DocumentKey::parse("k".repeat(MAX_KEY_LEN + 1)),
            Err(ValidationError::KeyTooLong {
                len: MAX_KEY_LEN + 1,
                max: MAX_KEY_LEN
            })
        );
    }

    #[test]
    fn test_key_deserialize_validates() {
        let ok: Result<DocumentKey, _> = serde_json::from_str("\"docs/1\"");
        assert!(ok.is_ok());
        let bad: Result<DocumentKey, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_value_size_limit() {
        assert!(validate_value_size(&[0u8; 10], 10).is_ok());
        assert_eq!(
            validate_value_size(&[0u8; 11], 10),
            Err(ValidationError::ValueTooLarge { size: 11, max: 10 })
        );
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let key = DocumentKey::parse("a").unwrap();
        assert!(DocumentRecord::decode_payload(key, &[1, 2, 3]).is_none());
    }

    #[test]
    fn test_etag_is_stable_hex() {
        let tag = record(b"hello", 1).etag();
        assert_eq!(tag.len(), 64);
        assert_eq!(
            tag,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    proptest! {
        #[test]
        fn prop_payload_preserves_record(value in proptest::collection::vec(any::<u8>(), 0..256), version in 1u64..u64::MAX) {
            let original = record(&value, version);
            let decoded = DocumentRecord::decode_payload(original.key.clone(), &original.encode_payload());
            prop_assert_eq!(decoded, Some(original));
        }
    }
}
