//! The document store.
//!
//! [`Database`] ties the pieces together: a [`Kv`] backend holding
//! documents and index state, an [`Evaluator`] that turns documents into
//! index entries, and a [`RepairEngine`] that materializes queued work.
//!
//! Writes are cheap on purpose. `add`, `update` and `delete` touch only
//! the document and the pending queues. Index reads pull: [`lookup`] and
//! [`scan`] run a repair pass before touching the view, so they reflect
//! every write that completed before the call began. Writes racing with
//! a read may or may not be visible to it; the next read picks them up.
//!
//! [`lookup`]: Database::lookup
//! [`scan`]: Database::scan

use std::sync::Arc;

use crate::error::{AlderError, Result};
use crate::eval::{Evaluator, ScriptEvaluator};
use crate::index::{PendingTracker, RepairEngine, RepairReport, SortedView};
use crate::key::Key;
use crate::keys;
use crate::kv::{Kv, KvConfig, KvFactory};
use crate::rank::rank_bounds;

/// A stored document. Any JSON value is accepted.
pub type Document = serde_json::Value;

/// Identifier assigned to a document when it is added. Ids come from a
/// monotonic counter and are never reused, even after deletion.
pub type DocId = u64;

/// Tuning for a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Worker threads each `repair` call drains queues with.
    pub repair_workers: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            repair_workers: num_cpus::get().min(4),
        }
    }
}

/// A document store with scripted, self-repairing secondary indexes.
#[derive(Debug)]
pub struct Database {
    kv: Arc<dyn Kv>,
    tracker: PendingTracker,
    view: SortedView,
    evaluator: Arc<dyn Evaluator>,
    repair_engine: RepairEngine,
}

impl Database {
    /// Assemble a store from parts. Most callers want [`Database::open`]
    /// or [`Database::in_memory`]; this form is for swapping in a custom
    /// [`Evaluator`].
    pub fn new(kv: Arc<dyn Kv>, evaluator: Arc<dyn Evaluator>, config: DatabaseConfig) -> Self {
        let tracker = PendingTracker::new(kv.clone());
        let view = SortedView::new(kv.clone());
        let repair_engine = RepairEngine::new(
            kv.clone(),
            tracker.clone(),
            view.clone(),
            evaluator.clone(),
            config.repair_workers,
        );
        Self {
            kv,
            tracker,
            view,
            evaluator,
            repair_engine,
        }
    }

    /// Open a store on the given backend with the default map-script
    /// evaluator and configuration.
    pub fn open(config: KvConfig) -> Result<Self> {
        Ok(Self::new(
            KvFactory::create(config)?,
            Arc::new(ScriptEvaluator::new()),
            DatabaseConfig::default(),
        ))
    }

    /// An in-memory store, mostly useful in tests.
    pub fn in_memory() -> Result<Self> {
        Self::open(KvConfig::Memory)
    }

    // ── documents ────────────────────────────────────────────────────────

    /// Store a new document and queue it for every defined index.
    pub fn add(&self, doc: &Document) -> Result<DocId> {
        let doc_id = self.kv.incr(keys::next_id())?;
        self.kv.set(&keys::doc(doc_id), &serde_json::to_vec(doc)?)?;
        self.tracker.queue_add(&self.indexes()?, doc_id)?;
        log::debug!("added document {doc_id}");
        Ok(doc_id)
    }

    /// Replace an existing document's body and queue it for reindexing.
    pub fn update(&self, doc_id: DocId, doc: &Document) -> Result<()> {
        if self.kv.get(&keys::doc(doc_id))?.is_none() {
            return Err(AlderError::invalid_argument(format!(
                "document {doc_id} does not exist"
            )));
        }
        self.kv.set(&keys::doc(doc_id), &serde_json::to_vec(doc)?)?;
        self.tracker.queue_refresh(&self.indexes()?, doc_id)?;
        log::debug!("updated document {doc_id}");
        Ok(())
    }

    /// Fetch a document by id.
    pub fn get(&self, doc_id: DocId) -> Result<Option<Document>> {
        match self.kv.get(&keys::doc(doc_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a document. Its index entries are queued for teardown
    /// whether or not the body still existed, so a double delete is
    /// harmless. Returns whether the body was present.
    pub fn delete(&self, doc_id: DocId) -> Result<bool> {
        let existed = self.kv.delete(&keys::doc(doc_id))?;
        self.tracker.queue_remove(&self.indexes()?, doc_id)?;
        log::debug!("deleted document {doc_id} (existed: {existed})");
        Ok(existed)
    }

    /// Drop every document, index definition and queue.
    pub fn truncate(&self) -> Result<u64> {
        let cleared = self.kv.clear_prefix(keys::ROOT)?;
        log::debug!("truncated store, {cleared} keys dropped");
        Ok(cleared)
    }

    // ── indexes ──────────────────────────────────────────────────────────

    /// Define (or redefine) an index. The map source is validated before
    /// anything is stored. Every existing document is queued, and for a
    /// redefinition the old entries are queued for teardown too.
    pub fn define(&self, index: &str, source: &str) -> Result<()> {
        keys::validate_index_name(index)?;
        self.evaluator.check(source)?;

        self.kv.set(&keys::map_func(index), source.as_bytes())?;

        let target = [index.to_string()];
        for key in self.kv.keys_with_prefix(keys::doc_prefix())? {
            if let Some(doc_id) = keys::doc_id(&key) {
                self.tracker.queue_refresh(&target, doc_id)?;
            }
        }
        log::debug!("defined index `{index}`");
        Ok(())
    }

    /// Names of all defined indexes, sorted.
    pub fn indexes(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for key in self.kv.keys_with_prefix(keys::map_func_prefix())? {
            if let Some(name) = keys::index_name(&key) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Outstanding work for an index as `(adds, deletes)`.
    pub fn backlog(&self, index: &str) -> Result<(u64, u64)> {
        self.require_index(index)?;
        self.tracker.backlog(index)
    }

    /// Drain an index's queues and bring its view up to date.
    pub fn repair(&self, index: &str) -> Result<RepairReport> {
        self.repair_engine.repair(index)
    }

    // ── queries ──────────────────────────────────────────────────────────

    /// Entry values whose key matches, in rank order. A plain key matches
    /// exactly; a [`Key::Range`] matches the inclusive rank interval of
    /// its endpoints.
    ///
    /// Repairs the index first, so the result reflects every write that
    /// completed before this call. Documents the map fails on are simply
    /// absent; the lookup itself still succeeds.
    pub fn lookup(
        &self,
        index: &str,
        key: impl Into<Key>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let (min, max) = rank_bounds(&key.into())?;
        self.repair_engine.repair(index)?;
        let ids = self.view.range(index, min, max)?;
        self.resolve(ids, limit)
    }

    /// A page of an index's entry values in rank order. Repairs the index
    /// first, like [`Database::lookup`].
    pub fn scan(
        &self,
        index: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        self.repair_engine.repair(index)?;
        let ids = self.view.page(index, offset, limit)?;
        self.resolve(ids, limit)
    }

    fn require_index(&self, index: &str) -> Result<()> {
        if self.kv.get(&keys::map_func(index))?.is_none() {
            return Err(AlderError::not_found(format!(
                "index `{index}` is not defined"
            )));
        }
        Ok(())
    }

    fn resolve(&self, entry_ids: Vec<u64>, limit: Option<usize>) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        for entry_id in entry_ids {
            if limit.is_some_and(|cap| docs.len() >= cap) {
                break;
            }
            // A concurrent teardown can drop a blob between the view read
            // and this get; such entries are already dead, skip them.
            let Some(bytes) = self.kv.get(&keys::value(entry_id))? else {
                continue;
            };
            docs.push(serde_json::from_slice(&bytes)?);
        }
        Ok(docs)
    }
}
