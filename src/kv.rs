//! Pluggable key-value substrate.
//!
//! [`Kv`] is the boundary the whole engine coordinates through: plain byte
//! values, an atomic counter, unordered sets of `u64` members with an atomic
//! pop, rank-sorted sets, and prefix-wide enumeration and truncation. Every
//! cross-worker guarantee the repair engine relies on reduces to the
//! atomicity of these primitives, so implementations must make each method
//! atomic with respect to the others.

pub mod file;
pub mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;

pub use file::{FileKv, FileKvConfig};
pub use memory::MemoryKv;

/// Atomic primitives the engine requires from a backing store.
///
/// All methods take `&self`; implementations are shared across threads
/// behind an `Arc<dyn Kv>`.
pub trait Kv: Send + Sync + Debug {
    // ── plain values ────────────────────────────────────────────────

    /// Read the bytes stored at `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` at `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove the value at `key`. Returns whether a value existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically increment the counter at `key` and return the new value.
    /// A counter that has never been incremented yields 1.
    fn incr(&self, key: &str) -> Result<u64>;

    // ── unordered u64 sets ──────────────────────────────────────────

    /// Add `member` to the set at `key`. Returns whether it was absent.
    fn set_add(&self, key: &str, member: u64) -> Result<bool>;

    /// Remove `member` from the set at `key`. Returns whether it was present.
    fn set_remove(&self, key: &str, member: u64) -> Result<bool>;

    /// Atomically remove and return one arbitrary member, or `None` when the
    /// set is empty. Two concurrent callers never receive the same member.
    fn set_pop(&self, key: &str) -> Result<Option<u64>>;

    /// Number of members in the set at `key` (0 when absent).
    fn set_len(&self, key: &str) -> Result<u64>;

    // ── rank-sorted u64 sets ────────────────────────────────────────

    /// Insert `member` at `rank`, re-ranking it if already present.
    fn sorted_insert(&self, key: &str, rank: f64, member: u64) -> Result<()>;

    /// Remove `member` regardless of rank. Returns whether it was present.
    fn sorted_remove(&self, key: &str, member: u64) -> Result<bool>;

    /// Members with `min <= rank <= max`, ascending by rank, ties ascending
    /// by member.
    fn sorted_range_by_rank(&self, key: &str, min: f64, max: f64) -> Result<Vec<u64>>;

    /// Members in full ascending rank order, skipping `offset`, returning at
    /// most `limit` (`None` means to the end).
    fn sorted_page(&self, key: &str, offset: usize, limit: Option<usize>) -> Result<Vec<u64>>;

    /// Number of members in the sorted set at `key` (0 when absent).
    fn sorted_len(&self, key: &str) -> Result<u64>;

    // ── namespace operations ────────────────────────────────────────

    /// All keys starting with `prefix`, across every kind of value, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Atomically remove every key starting with `prefix`. Returns the
    /// number of keys removed.
    fn clear_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Configuration selecting a KV backend.
#[derive(Debug, Clone)]
pub enum KvConfig {
    /// Volatile in-memory backend.
    Memory,
    /// Log-backed backend that replays its state on open.
    File(FileKvConfig),
}

/// Factory constructing a shared KV handle from a [`KvConfig`].
pub struct KvFactory;

impl KvFactory {
    /// Build the configured backend.
    pub fn create(config: KvConfig) -> Result<Arc<dyn Kv>> {
        match config {
            KvConfig::Memory => Ok(Arc::new(MemoryKv::new())),
            KvConfig::File(config) => Ok(Arc::new(FileKv::open(config)?)),
        }
    }
}
