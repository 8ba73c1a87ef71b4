//! On-disk counter record and its checksummed JSON encoding.
//!
//! Layout (pretty JSON, two-space indent, fixed key order):
//!
//! ```text
//! {
//!   "visits": 5,
//!   "last_updated": "2024-01-02T03:04:05.123Z",
//!   "version": "1.0.0",
//!   "crc": 1234567
//! }
//! ```
//!
//! `crc` is computed over the same document with the `crc` key omitted.

use crate::core::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format tag written into every record.
pub const RECORD_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedRecord {
    pub visits: i64,
    pub last_updated: DateTime<Utc>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc: Option<u32>,
}

/// Why a byte sequence was not accepted as a record.
///
/// Rejections are not failures: callers treat them exactly like a missing file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordRejection {
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("record carries a zero checksum")]
    ZeroChecksum,

    #[error("checksum mismatch (stored {expected}, computed {actual})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("record is not in canonical form")]
    NonCanonical,
}

/// Order-dependent rolling checksum: `acc = acc * 31 + byte`, seeded at 0.
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(u32::from(b)))
}

impl PersistedRecord {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let unsealed = PersistedRecord { crc: None, ..self.clone() };
        Ok(serde_json::to_vec_pretty(&unsealed)?)
    }
}

/// Serializes a record and seals it with its checksum.
///
/// A computed checksum of zero is left out, the same way an absent one is.
pub fn encode(visits: i64, timestamp: DateTime<Utc>, version: &str) -> Result<Vec<u8>> {
    let mut record = PersistedRecord {
        visits,
        last_updated: timestamp,
        version: version.to_string(),
        crc: None,
    };
    let crc = checksum(&record.canonical_bytes()?);
    record.crc = (crc != 0).then_some(crc);
    Ok(serde_json::to_vec_pretty(&record)?)
}

/// Parses and verifies `bytes`, explaining any rejection.
///
/// Records without a `crc` key are accepted as-is. Sealed records must match
/// their checksum and be byte-for-byte in canonical form.
pub fn validate(bytes: &[u8]) -> std::result::Result<PersistedRecord, RecordRejection> {
    let record: PersistedRecord =
        serde_json::from_slice(bytes).map_err(|e| RecordRejection::Malformed(e.to_string()))?;

    let Some(expected) = record.crc else {
        return Ok(record);
    };
    // Rejected on purpose: `encode` never writes 0, so a stored 0 is damage.
    if expected == 0 {
        return Err(RecordRejection::ZeroChecksum);
    }

    let canonical = record
        .canonical_bytes()
        .map_err(|e| RecordRejection::Malformed(e.to_string()))?;
    let actual = checksum(&canonical);
    if actual != expected {
        return Err(RecordRejection::ChecksumMismatch { expected, actual });
    }

    let sealed = serde_json::to_vec_pretty(&record)
        .map_err(|e| RecordRejection::Malformed(e.to_string()))?;
    if sealed != bytes {
        return Err(RecordRejection::NonCanonical);
    }

    Ok(record)
}

/// `validate` without the reason: `None` means "no prior state".
pub fn decode(bytes: &[u8]) -> Option<PersistedRecord> {
    validate(bytes).ok()
}
