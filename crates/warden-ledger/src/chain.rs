//! Canonical hashing and chain verification

use crate::error::LedgerError;
use crate::record::{RecordPayload, StepRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// `previous_hash` of the first record in every island.
pub const GENESIS: &str = "genesis";

/// Canonical JSON: UTF-8, keys sorted, no insignificant whitespace.
///
/// Routing through `serde_json::Value` sorts object keys; float formatting
/// is locale-independent by construction. This string is the hash input, so
/// it must never depend on struct field order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, LedgerError> {
    Ok(serde_json::to_string(&serde_json::to_value(value)?)?)
}

/// Canonical timestamp form used in link hashes: RFC-3339 UTC with
/// microsecond precision.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Content hash of a payload: SHA-256 over its canonical serialization.
pub fn content_hash(payload: &RecordPayload) -> Result<String, LedgerError> {
    let canonical = canonical_json(payload)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// The chain link a successor must carry as `previous_hash`:
/// `SHA-256(record_id ‖ content_hash ‖ canonical timestamp)`.
///
/// This is also the island tip. Because the record id participates, the tip
/// changes on every append even when two consecutive payloads are
/// byte-identical.
pub fn link_hash(record: &StepRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.record_id.to_string().as_bytes());
    hasher.update(record.content_hash.as_bytes());
    hasher.update(canonical_timestamp(&record.timestamp).as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of walking a chain from scratch.
#[derive(Clone, Debug)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_records: usize,
    pub first_invalid: Option<usize>,
    pub detail: Option<String>,
}

impl ChainVerification {
    fn ok(total: usize) -> Self {
        Self {
            valid: true,
            total_records: total,
            first_invalid: None,
            detail: None,
        }
    }

    fn broken(total: usize, index: usize, detail: String) -> Self {
        Self {
            valid: false,
            total_records: total,
            first_invalid: Some(index),
            detail: Some(detail),
        }
    }
}

/// Recompute every hash and link for one island's records, in sequence
/// order. Pure: depends only on the record stream.
pub fn verify_records(records: &[StepRecord]) -> Result<ChainVerification, LedgerError> {
    let total = records.len();

    for (i, record) in records.iter().enumerate() {
        let expected_seq = i as u64;
        if record.sequence_num != expected_seq {
            return Ok(ChainVerification::broken(
                total,
                i,
                format!(
                    "sequence gap: expected {expected_seq}, found {}",
                    record.sequence_num
                ),
            ));
        }

        let computed_content = content_hash(&record.payload)?;
        if computed_content != record.content_hash {
            return Ok(ChainVerification::broken(
                total,
                i,
                format!("content hash mismatch on record {}", record.record_id),
            ));
        }

        if record.kind != record.payload.kind() {
            return Ok(ChainVerification::broken(
                total,
                i,
                format!("kind/payload mismatch on record {}", record.record_id),
            ));
        }

        let expected_previous = if i == 0 {
            GENESIS.to_string()
        } else {
            link_hash(&records[i - 1])
        };
        if record.previous_hash != expected_previous {
            return Ok(ChainVerification::broken(
                total,
                i,
                format!("broken link on record {}", record.record_id),
            ));
        }

        if i > 0 && record.timestamp < records[i - 1].timestamp {
            return Ok(ChainVerification::broken(
                total,
                i,
                format!("timestamp regression on record {}", record.record_id),
            ));
        }
    }

    Ok(ChainVerification::ok(total))
}
