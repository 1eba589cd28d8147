//! Pending-work queues and per-document entry bookkeeping.
//!
//! Every index keeps two unordered sets of document ids: one for
//! documents whose entries must be (re)computed and one for documents
//! whose old entries must be torn down. Mutations push ids into these
//! sets and return immediately; repair pops them. Set pops are atomic in
//! the KV store, which is the only coordination repair workers need.
//!
//! Alongside the queues, the tracker records which entry ids each
//! document currently owns in an index, so teardown can find them
//! without re-running the map.

use std::sync::Arc;

use crate::db::DocId;
use crate::error::Result;
use crate::keys;
use crate::kv::Kv;

/// Queue and entry bookkeeping over the KV store.
#[derive(Debug, Clone)]
pub struct PendingTracker {
    kv: Arc<dyn Kv>,
}

impl PendingTracker {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Queue a new document for indexing under every given index.
    pub fn queue_add(&self, indexes: &[String], doc_id: DocId) -> Result<()> {
        for index in indexes {
            self.queue_add_one(index, doc_id)?;
        }
        Ok(())
    }

    /// Queue one document for indexing under one index.
    pub fn queue_add_one(&self, index: &str, doc_id: DocId) -> Result<()> {
        self.kv.set_add(&keys::pending_add(index), doc_id)?;
        Ok(())
    }

    /// Queue an updated document: its old entries must go and its new
    /// ones must be computed.
    pub fn queue_refresh(&self, indexes: &[String], doc_id: DocId) -> Result<()> {
        for index in indexes {
            self.kv.set_add(&keys::pending_add(index), doc_id)?;
            self.kv.set_add(&keys::pending_delete(index), doc_id)?;
        }
        Ok(())
    }

    /// Queue a deleted document: any not-yet-materialized add is
    /// cancelled and its entries are scheduled for teardown.
    pub fn queue_remove(&self, indexes: &[String], doc_id: DocId) -> Result<()> {
        for index in indexes {
            self.kv.set_remove(&keys::pending_add(index), doc_id)?;
            self.kv.set_add(&keys::pending_delete(index), doc_id)?;
        }
        Ok(())
    }

    /// Claim one document awaiting indexing, or `None` when the queue is
    /// empty. The claim is exclusive; no other worker will see this id.
    pub fn pop_add(&self, index: &str) -> Result<Option<DocId>> {
        self.kv.set_pop(&keys::pending_add(index))
    }

    /// Claim one document awaiting teardown.
    pub fn pop_remove(&self, index: &str) -> Result<Option<DocId>> {
        self.kv.set_pop(&keys::pending_delete(index))
    }

    /// Withdraw a specific document from the teardown queue. Returns
    /// whether it was queued; at most one caller sees `true`.
    pub fn claim_remove(&self, index: &str, doc_id: DocId) -> Result<bool> {
        self.kv.set_remove(&keys::pending_delete(index), doc_id)
    }

    /// Outstanding work for an index as `(adds, deletes)`.
    pub fn backlog(&self, index: &str) -> Result<(u64, u64)> {
        let adds = self.kv.set_len(&keys::pending_add(index))?;
        let deletes = self.kv.set_len(&keys::pending_delete(index))?;
        Ok((adds, deletes))
    }

    /// Record that `entry_id` belongs to `doc_id` under `index`.
    pub fn record_entry(&self, index: &str, doc_id: DocId, entry_id: u64) -> Result<()> {
        self.kv.set_add(&keys::entries(index, doc_id), entry_id)?;
        Ok(())
    }

    /// Claim one of the entries a document owns under an index, or
    /// `None` once they are all gone.
    pub fn pop_entry(&self, index: &str, doc_id: DocId) -> Result<Option<u64>> {
        self.kv.set_pop(&keys::entries(index, doc_id))
    }
}
