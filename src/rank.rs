//! Deterministic mapping from index keys to sortable numeric ranks.
//!
//! Every emitted key collapses to an `f64` so heterogeneous keys can share
//! one sorted structure:
//!
//! - numbers rank as their own floating-point value,
//! - strings rank by their first 8 UTF-8 bytes, zero-padded when shorter,
//!   read big-endian into a `u64` and cast to `f64`,
//! - any other JSON value is coerced to its compact JSON text and ranked by
//!   the string rule.
//!
//! The string rule is a lossy prefix encoding: two strings sharing their
//! first 8 bytes rank equal no matter what follows. Downstream ordering
//! depends on this, so it is a documented property pinned by a test, not a
//! defect to fix.

use byteorder::{BigEndian, ByteOrder};
use serde_json::Value;

use crate::error::{AlderError, Result};
use crate::key::Key;

/// Width of the string prefix that contributes to a rank.
pub const STRING_PREFIX_BYTES: usize = 8;

/// Compute the rank of a point key.
///
/// Range keys cannot be collapsed to a single rank; use [`rank_bounds`]
/// to decompose them into an interval.
pub fn rank_of(key: &Key) -> Result<f64> {
    match key {
        Key::Value(v) => Ok(rank_value(v)),
        Key::Range(..) => Err(AlderError::invalid_argument(
            "a range key has no single rank; ranges only bound interval lookups",
        )),
    }
}

/// Compute the inclusive rank interval covered by a key.
///
/// A point key covers `[r, r]`; a range key covers the ranks of its
/// endpoints.
pub fn rank_bounds(key: &Key) -> Result<(f64, f64)> {
    match key {
        Key::Value(v) => {
            let r = rank_value(v);
            Ok((r, r))
        }
        Key::Range(start, end) => Ok((rank_value(start), rank_value(end))),
    }
}

fn rank_value(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n
            .as_f64()
            .unwrap_or_else(|| rank_str(&value.to_string())),
        Value::String(s) => rank_str(s),
        other => rank_str(&other.to_string()),
    }
}

fn rank_str(s: &str) -> f64 {
    let mut buf = [0u8; STRING_PREFIX_BYTES];
    let bytes = s.as_bytes();
    let n = bytes.len().min(STRING_PREFIX_BYTES);
    buf[..n].copy_from_slice(&bytes[..n]);
    BigEndian::read_u64(&buf) as f64
}
