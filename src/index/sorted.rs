//! The materialized, rank-ordered view of an index.
//!
//! Each index owns one sorted set mapping entry ids to ranks. Lookups
//! read this view and nothing else; repair is what keeps it in step with
//! the documents.

use std::sync::Arc;

use crate::error::Result;
use crate::keys;
use crate::kv::Kv;

/// Rank-ordered entry ids for each index.
#[derive(Debug, Clone)]
pub struct SortedView {
    kv: Arc<dyn Kv>,
}

impl SortedView {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub fn insert(&self, index: &str, rank: f64, entry_id: u64) -> Result<()> {
        self.kv.sorted_insert(&keys::sorted(index), rank, entry_id)
    }

    pub fn remove(&self, index: &str, entry_id: u64) -> Result<bool> {
        self.kv.sorted_remove(&keys::sorted(index), entry_id)
    }

    /// Entry ids whose rank falls in `[min, max]`, rank order.
    pub fn range(&self, index: &str, min: f64, max: f64) -> Result<Vec<u64>> {
        self.kv.sorted_range_by_rank(&keys::sorted(index), min, max)
    }

    /// A page of entry ids in rank order.
    pub fn page(&self, index: &str, offset: usize, limit: Option<usize>) -> Result<Vec<u64>> {
        self.kv.sorted_page(&keys::sorted(index), offset, limit)
    }

    pub fn len(&self, index: &str) -> Result<u64> {
        self.kv.sorted_len(&keys::sorted(index))
    }
}
