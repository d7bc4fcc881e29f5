//! Store keyspace.
//!
//! Records live under `message:{id}`, the delivery index is the single
//! sorted collection `scheduled_messages`, and lock markers are `lock:{id}`.
//! The RocksDB backend additionally encodes scores so that byte order
//! matches numeric order.

use std::fmt::Display;

/// Name of the score-ordered delivery index.
pub const SCHEDULE_INDEX: &str = "scheduled_messages";

const RECORD_PREFIX: &str = "message:";
const LOCK_PREFIX: &str = "lock:";

/// Build a record key: `message:{id}`.
pub fn record_key(id: &str) -> String {
    format!("{RECORD_PREFIX}{id}")
}

/// Build a lock key: `lock:{id}`.
pub fn lock_key(id: impl Display) -> String {
    format!("{LOCK_PREFIX}{id}")
}

/// Encode a signed score as 8 bytes whose lexicographic order matches the
/// numeric order (sign bit flipped, big-endian).
pub fn encode_score(score: i64) -> [u8; 8] {
    ((score as u64) ^ (1 << 63)).to_be_bytes()
}

/// Inverse of [`encode_score`].
pub fn decode_score(bytes: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some((u64::from_be_bytes(bytes) ^ (1 << 63)) as i64)
}

/// Build an index key: `{encoded_score}{id}`.
///
/// Score-first layout enables "scan from earliest delivery" iteration.
pub fn schedule_key(score: i64, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + id.len());
    key.extend_from_slice(&encode_score(score));
    key.extend_from_slice(id.as_bytes());
    key
}

/// Split an index key back into `(score, id)`.
pub fn parse_schedule_key(key: &[u8]) -> Option<(i64, String)> {
    let score = decode_score(key)?;
    let id = std::str::from_utf8(&key[8..]).ok()?;
    Some((score, id.to_string()))
}
