//! In-memory KV backend.
//!
//! One `RwLock` guards all state, which makes every [`Kv`] method atomic
//! with respect to the others. Sorted sets are kept as a `BTreeMap` from
//! rank to the members holding it, plus a reverse map for O(log n) removal.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use crate::error::Result;
use crate::kv::Kv;

/// `f64` wrapper with a total order so ranks can key a `BTreeMap`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rank(f64);

impl Eq for Rank {}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    by_rank: BTreeMap<Rank, BTreeSet<u64>>,
    member_ranks: AHashMap<u64, Rank>,
}

impl SortedSet {
    fn insert(&mut self, rank: Rank, member: u64) {
        if let Some(old) = self.member_ranks.insert(member, rank) {
            Self::unlink(&mut self.by_rank, old, member);
        }
        self.by_rank.entry(rank).or_default().insert(member);
    }

    fn remove(&mut self, member: u64) -> bool {
        match self.member_ranks.remove(&member) {
            Some(rank) => {
                Self::unlink(&mut self.by_rank, rank, member);
                true
            }
            None => false,
        }
    }

    fn unlink(by_rank: &mut BTreeMap<Rank, BTreeSet<u64>>, rank: Rank, member: u64) {
        if let Some(bucket) = by_rank.get_mut(&rank) {
            bucket.remove(&member);
            if bucket.is_empty() {
                by_rank.remove(&rank);
            }
        }
    }

    fn len(&self) -> usize {
        self.member_ranks.len()
    }

    fn is_empty(&self) -> bool {
        self.member_ranks.is_empty()
    }
}

#[derive(Debug, Default)]
struct Shelves {
    values: AHashMap<String, Vec<u8>>,
    counters: AHashMap<String, u64>,
    sets: AHashMap<String, AHashSet<u64>>,
    sorted: AHashMap<String, SortedSet>,
}

/// Volatile [`Kv`] backend holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: RwLock<Shelves>,
}

impl MemoryKv {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kv for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner
            .write()
            .values
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.write().values.remove(key).is_some())
    }

    fn incr(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.write();
        let counter = inner.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn set_add(&self, key: &str, member: u64) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member))
    }

    fn set_remove(&self, key: &str, member: u64) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(&member);
        if set.is_empty() {
            inner.sets.remove(key);
        }
        Ok(removed)
    }

    fn set_pop(&self, key: &str) -> Result<Option<u64>> {
        let mut inner = self.inner.write();
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(None);
        };
        let member = match set.iter().next() {
            Some(&member) => member,
            None => return Ok(None),
        };
        set.remove(&member);
        if set.is_empty() {
            inner.sets.remove(key);
        }
        Ok(Some(member))
    }

    fn set_len(&self, key: &str) -> Result<u64> {
        Ok(self.inner.read().sets.get(key).map_or(0, |s| s.len() as u64))
    }

    fn sorted_insert(&self, key: &str, rank: f64, member: u64) -> Result<()> {
        self.inner
            .write()
            .sorted
            .entry(key.to_string())
            .or_default()
            .insert(Rank(rank), member);
        Ok(())
    }

    fn sorted_remove(&self, key: &str, member: u64) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(sorted) = inner.sorted.get_mut(key) else {
            return Ok(false);
        };
        let removed = sorted.remove(member);
        if sorted.is_empty() {
            inner.sorted.remove(key);
        }
        Ok(removed)
    }

    fn sorted_range_by_rank(&self, key: &str, min: f64, max: f64) -> Result<Vec<u64>> {
        if Rank(min) > Rank(max) {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        let Some(sorted) = inner.sorted.get(key) else {
            return Ok(Vec::new());
        };
        Ok(sorted
            .by_rank
            .range(Rank(min)..=Rank(max))
            .flat_map(|(_, members)| members.iter().copied())
            .collect())
    }

    fn sorted_page(&self, key: &str, offset: usize, limit: Option<usize>) -> Result<Vec<u64>> {
        let inner = self.inner.read();
        let Some(sorted) = inner.sorted.get(key) else {
            return Ok(Vec::new());
        };
        Ok(sorted
            .by_rank
            .values()
            .flat_map(|members| members.iter().copied())
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn sorted_len(&self, key: &str) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .sorted
            .get(key)
            .map_or(0, |s| s.len() as u64))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut keys: Vec<String> = inner
            .values
            .keys()
            .chain(inner.counters.keys())
            .chain(inner.sets.keys())
            .chain(inner.sorted.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn clear_prefix(&self, prefix: &str) -> Result<u64> {
        let mut inner = self.inner.write();
        let before = inner.values.len() + inner.counters.len() + inner.sets.len() + inner.sorted.len();
        inner.values.retain(|k, _| !k.starts_with(prefix));
        inner.counters.retain(|k, _| !k.starts_with(prefix));
        inner.sets.retain(|k, _| !k.starts_with(prefix));
        inner.sorted.retain(|k, _| !k.starts_with(prefix));
        let after = inner.values.len() + inner.counters.len() + inner.sets.len() + inner.sorted.len();
        Ok((before - after) as u64)
    }
}
