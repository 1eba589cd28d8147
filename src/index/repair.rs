//! Pull-based index repair.
//!
//! Repair drains an index's pending queues with a pool of worker threads.
//! Teardown runs to exhaustion first: every document queued for removal
//! has its recorded entries unlinked from the sorted view and their value
//! blobs deleted. Only after all workers finish teardown does the add
//! phase start, so an updated document never has its freshly written
//! entries wiped by its own stale-entry cleanup. An update racing the
//! add phase queues the document on both sides again; the add phase
//! settles that teardown before writing, so delete-before-add holds per
//! document there too.
//!
//! Workers coordinate through atomic set pops alone. Each popped id is an
//! exclusive claim, so any number of workers (or concurrent `repair`
//! calls) can drain the same queue without stepping on each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::db::{DocId, Document};
use crate::error::{AlderError, Result};
use crate::eval::Evaluator;
use crate::index::{PendingTracker, SortedView};
use crate::keys;
use crate::kv::Kv;
use crate::rank::rank_of;

/// Outcome of one [`RepairEngine::repair`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairReport {
    /// Documents whose entries were written into the view.
    pub repaired: u64,
    /// Documents whose old entries were torn down.
    pub removed: u64,
    /// Documents that could not be indexed, with the reason.
    pub failures: Vec<RepairFailure>,
}

/// A document the map could not index. The document itself is untouched
/// and simply has no entries under this index until it is updated or the
/// map is redefined.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairFailure {
    pub doc_id: DocId,
    pub message: String,
}

/// Drains pending index work and rebuilds the sorted view.
#[derive(Debug)]
pub struct RepairEngine {
    kv: Arc<dyn Kv>,
    tracker: PendingTracker,
    view: SortedView,
    evaluator: Arc<dyn Evaluator>,
    workers: usize,
}

impl RepairEngine {
    pub fn new(
        kv: Arc<dyn Kv>,
        tracker: PendingTracker,
        view: SortedView,
        evaluator: Arc<dyn Evaluator>,
        workers: usize,
    ) -> Self {
        Self {
            kv,
            tracker,
            view,
            evaluator,
            workers,
        }
    }

    /// Bring `index` up to date with every queued mutation.
    ///
    /// Documents that fail the map are skipped and reported in the
    /// returned [`RepairReport`]; a store error aborts the repair.
    ///
    /// A claim is not a transaction: ids popped by a process that dies
    /// mid-repair are forgotten, not re-queued. The next update of those
    /// documents (or redefining the index) queues them again.
    pub fn repair(&self, index: &str) -> Result<RepairReport> {
        let source = self.load_source(index)?;

        // Reads repair before every query, so the common case is an
        // already-current index; don't spin up workers for it.
        let (adds, deletes) = self.tracker.backlog(index)?;
        if adds == 0 && deletes == 0 {
            return Ok(RepairReport::default());
        }

        let removed = AtomicU64::new(0);
        let repaired = AtomicU64::new(0);
        let first_error: Mutex<Option<AlderError>> = Mutex::new(None);
        let (failure_tx, failure_rx) = crossbeam_channel::unbounded();

        let workers = self.workers.max(1);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        match self.teardown_one(index) {
                            Ok(true) => {
                                removed.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(false) => break,
                            Err(e) => {
                                record_error(&first_error, e);
                                break;
                            }
                        }
                    }
                });
            }
        });
        take_error(&first_error)?;

        {
            let source = source.as_str();
            let repaired = &repaired;
            let first_error = &first_error;
            std::thread::scope(|scope| {
                for _ in 0..workers {
                    let failure_tx = failure_tx.clone();
                    scope.spawn(move || {
                        loop {
                            match self.materialize_one(index, source, &failure_tx) {
                                Ok(Some(true)) => {
                                    repaired.fetch_add(1, Ordering::Relaxed);
                                }
                                Ok(Some(false)) => {}
                                Ok(None) => break,
                                Err(e) => {
                                    record_error(first_error, e);
                                    break;
                                }
                            }
                        }
                    });
                }
            });
        }
        take_error(&first_error)?;

        let report = RepairReport {
            repaired: repaired.into_inner(),
            removed: removed.into_inner(),
            failures: failure_rx.try_iter().collect(),
        };
        log::debug!(
            "repaired `{index}`: {} indexed, {} removed, {} failed",
            report.repaired,
            report.removed,
            report.failures.len()
        );
        Ok(report)
    }

    fn load_source(&self, index: &str) -> Result<String> {
        let Some(bytes) = self.kv.get(&keys::map_func(index))? else {
            return Err(AlderError::not_found(format!(
                "index `{index}` is not defined"
            )));
        };
        String::from_utf8(bytes).map_err(|_| {
            AlderError::internal(format!("map source for `{index}` is not valid UTF-8"))
        })
    }

    /// Tear down one document's entries. `Ok(false)` means the removal
    /// queue is empty.
    fn teardown_one(&self, index: &str) -> Result<bool> {
        let Some(doc_id) = self.tracker.pop_remove(index)? else {
            return Ok(false);
        };
        self.teardown_entries(index, doc_id)?;
        Ok(true)
    }

    fn teardown_entries(&self, index: &str, doc_id: DocId) -> Result<()> {
        while let Some(entry_id) = self.tracker.pop_entry(index, doc_id)? {
            self.view.remove(index, entry_id)?;
            self.kv.delete(&keys::value(entry_id))?;
        }
        Ok(())
    }

    /// Index one queued document. `Ok(None)` means the add queue is
    /// empty; `Ok(Some(false))` means the document was claimed but not
    /// indexed (vanished, or failed and reported).
    fn materialize_one(
        &self,
        index: &str,
        source: &str,
        failures: &Sender<RepairFailure>,
    ) -> Result<Option<bool>> {
        let Some(doc_id) = self.tracker.pop_add(index)? else {
            return Ok(None);
        };

        // An update that lands after the delete phase has drained queues
        // the document on both sides again. Settle its teardown debt
        // before writing new entries, or the next repair's delete phase
        // would erase what this pass writes with no add left to restore
        // it.
        if self.tracker.claim_remove(index, doc_id)? {
            self.teardown_entries(index, doc_id)?;
        }

        let Some(body) = self.kv.get(&keys::doc(doc_id))? else {
            // Deleted after it was queued; nothing to index.
            log::debug!("document {doc_id} vanished before `{index}` indexed it");
            return Ok(Some(false));
        };

        match self.index_document(index, source, doc_id, &body) {
            Ok(()) => Ok(Some(true)),
            Err(
                e @ (AlderError::Evaluation(_)
                | AlderError::InvalidArgument(_)
                | AlderError::Serde(_)),
            ) => {
                let message = e.to_string();
                log::warn!("document {doc_id} failed `{index}` map: {message}");
                let _ = failures.send(RepairFailure { doc_id, message });
                Ok(Some(false))
            }
            Err(e) => Err(e),
        }
    }

    fn index_document(
        &self,
        index: &str,
        source: &str,
        doc_id: DocId,
        body: &[u8],
    ) -> Result<()> {
        let doc: Document = serde_json::from_slice(body)?;

        let mut emitted = Vec::new();
        self.evaluator
            .evaluate(source, &doc, &mut |key, value| emitted.push((key, value)))?;

        // Rank everything before persisting anything, so one bad emit
        // leaves no partial entries behind.
        let mut ranked = Vec::with_capacity(emitted.len());
        for (key, value) in emitted {
            ranked.push((rank_of(&key)?, value));
        }

        for (rank, value) in ranked {
            let entry_id = self.kv.incr(keys::next_id())?;
            self.kv.set(&keys::value(entry_id), &serde_json::to_vec(&value)?)?;
            self.tracker.record_entry(index, doc_id, entry_id)?;
            self.view.insert(index, rank, entry_id)?;
        }
        Ok(())
    }
}

fn record_error(slot: &Mutex<Option<AlderError>>, e: AlderError) {
    let mut slot = slot.lock();
    if slot.is_none() {
        *slot = Some(e);
    }
}

fn take_error(slot: &Mutex<Option<AlderError>>) -> Result<()> {
    match slot.lock().take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::ScriptEvaluator;
    use crate::key::Key;
    use crate::kv::MemoryKv;
    use serde_json::json;

    struct Fixture {
        kv: Arc<dyn Kv>,
        tracker: PendingTracker,
        view: SortedView,
        engine: RepairEngine,
    }

    fn fixture(evaluator: Arc<dyn Evaluator>) -> Fixture {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let tracker = PendingTracker::new(kv.clone());
        let view = SortedView::new(kv.clone());
        let engine = RepairEngine::new(
            kv.clone(),
            tracker.clone(),
            view.clone(),
            evaluator,
            2,
        );
        Fixture {
            kv,
            tracker,
            view,
            engine,
        }
    }

    fn script_fixture(index: &str, source: &str) -> Fixture {
        let f = fixture(Arc::new(ScriptEvaluator::new()));
        f.kv.set(&keys::map_func(index), source.as_bytes()).unwrap();
        f
    }

    fn put_doc(f: &Fixture, index: &str, doc_id: u64, doc: &Document) {
        f.kv.set(&keys::doc(doc_id), &serde_json::to_vec(doc).unwrap())
            .unwrap();
        f.tracker.queue_add_one(index, doc_id).unwrap();
    }

    #[test]
    fn test_materializes_queued_documents_in_rank_order() {
        let f = script_fixture("by_price", "function(doc) { emit(doc.price, doc.name); }");
        put_doc(&f, "by_price", 1, &json!({"name": "a", "price": 9}));
        put_doc(&f, "by_price", 2, &json!({"name": "b", "price": 3}));

        let report = f.engine.repair("by_price").unwrap();
        assert_eq!(report.repaired, 2);
        assert_eq!(report.removed, 0);
        assert!(report.failures.is_empty());

        let page = f.view.page("by_price", 0, None).unwrap();
        assert_eq!(page.len(), 2);
        let first = f.kv.get(&keys::value(page[0])).unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<Document>(&first).unwrap(), json!("b"));
    }

    #[test]
    fn test_teardown_reclaims_entries_and_blobs() {
        let f = script_fixture("by_name", "function(doc) { emit(doc.name, doc); }");
        put_doc(&f, "by_name", 1, &json!({"name": "a"}));
        f.engine.repair("by_name").unwrap();
        assert_eq!(f.view.len("by_name").unwrap(), 1);

        f.tracker
            .queue_remove(&["by_name".to_string()], 1)
            .unwrap();
        let report = f.engine.repair("by_name").unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(f.view.len("by_name").unwrap(), 0);
        assert!(f.kv.keys_with_prefix("alder:val:").unwrap().is_empty());
    }

    #[test]
    fn test_refresh_replaces_entries() {
        let f = script_fixture("by_name", "function(doc) { emit(doc.name, doc); }");
        put_doc(&f, "by_name", 1, &json!({"name": "old"}));
        f.engine.repair("by_name").unwrap();

        f.kv.set(
            &keys::doc(1),
            &serde_json::to_vec(&json!({"name": "new"})).unwrap(),
        )
        .unwrap();
        f.tracker
            .queue_refresh(&["by_name".to_string()], 1)
            .unwrap();

        let report = f.engine.repair("by_name").unwrap();
        assert_eq!((report.repaired, report.removed), (1, 1));
        assert_eq!(f.view.len("by_name").unwrap(), 1);
        assert_eq!(f.kv.keys_with_prefix("alder:val:").unwrap().len(), 1);
    }

    #[test]
    fn test_add_phase_settles_teardown_debt_before_writing() {
        let source = "function(doc) { emit(doc.name, doc); }";
        let f = script_fixture("by_name", source);
        put_doc(&f, "by_name", 1, &json!({"name": "old"}));
        f.engine.repair("by_name").unwrap();

        // An update landing after a repair's delete phase has drained
        // queues the document on both sides. Drive only the add side,
        // as that repair's add phase would.
        f.kv.set(
            &keys::doc(1),
            &serde_json::to_vec(&json!({"name": "new"})).unwrap(),
        )
        .unwrap();
        f.tracker
            .queue_refresh(&["by_name".to_string()], 1)
            .unwrap();

        let (tx, _rx) = crossbeam_channel::unbounded();
        assert_eq!(f.engine.materialize_one("by_name", source, &tx).unwrap(), Some(true));

        // The stale entry went down before the new one went in, and no
        // teardown debt is left for a later repair to pay destructively.
        assert_eq!(f.tracker.backlog("by_name").unwrap(), (0, 0));
        assert_eq!(f.view.len("by_name").unwrap(), 1);
        f.engine.repair("by_name").unwrap();
        let page = f.view.page("by_name", 0, None).unwrap();
        assert_eq!(page.len(), 1);
        let body = f.kv.get(&keys::value(page[0])).unwrap().unwrap();
        assert_eq!(
            serde_json::from_slice::<Document>(&body).unwrap(),
            json!({"name": "new"})
        );
    }

    #[test]
    fn test_vanished_document_is_skipped() {
        let f = script_fixture("by_name", "function(doc) { emit(doc.name, doc); }");
        f.tracker.queue_add_one("by_name", 42).unwrap();

        let report = f.engine.repair("by_name").unwrap();
        assert_eq!(report.repaired, 0);
        assert!(report.failures.is_empty());
        assert_eq!(f.view.len("by_name").unwrap(), 0);
    }

    #[test]
    fn test_undefined_index_is_not_found() {
        let f = fixture(Arc::new(ScriptEvaluator::new()));
        let err = f.engine.repair("nope").unwrap_err();
        assert!(matches!(err, AlderError::NotFound(_)));
    }

    #[test]
    fn test_repair_is_idempotent() {
        let f = script_fixture("by_name", "function(doc) { emit(doc.name, doc); }");
        put_doc(&f, "by_name", 1, &json!({"name": "a"}));
        f.engine.repair("by_name").unwrap();

        let report = f.engine.repair("by_name").unwrap();
        assert_eq!((report.repaired, report.removed), (0, 0));
        assert_eq!(f.view.len("by_name").unwrap(), 1);
    }

    /// Emits a range key for poisoned documents, which cannot be ranked.
    #[derive(Debug)]
    struct PoisonEvaluator;

    impl Evaluator for PoisonEvaluator {
        fn evaluate(
            &self,
            _source: &str,
            doc: &Document,
            emit: &mut dyn FnMut(Key, Document),
        ) -> Result<()> {
            emit(Key::Value(doc["n"].clone()), doc.clone());
            if doc.get("poison").is_some() {
                emit(Key::range(1, 5), doc.clone());
            }
            Ok(())
        }
    }

    #[test]
    fn test_failed_documents_are_reported_and_leave_no_entries() {
        let f = fixture(Arc::new(PoisonEvaluator));
        f.kv.set(&keys::map_func("by_n"), b"native").unwrap();
        put_doc(&f, "by_n", 1, &json!({"n": 1}));
        put_doc(&f, "by_n", 2, &json!({"n": 2, "poison": true}));
        put_doc(&f, "by_n", 3, &json!({"n": 3}));

        let report = f.engine.repair("by_n").unwrap();
        assert_eq!(report.repaired, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].doc_id, 2);

        // The poisoned document's good emit was not persisted either.
        assert_eq!(f.view.len("by_n").unwrap(), 2);
        assert_eq!(f.kv.keys_with_prefix("alder:val:").unwrap().len(), 2);
        assert_eq!(f.tracker.pop_entry("by_n", 2).unwrap(), None);
    }

    #[test]
    fn test_corrupt_body_is_reported_not_fatal() {
        let f = script_fixture("by_name", "function(doc) { emit(doc.name, doc); }");
        f.kv.set(&keys::doc(1), b"not json").unwrap();
        f.tracker.queue_add_one("by_name", 1).unwrap();
        put_doc(&f, "by_name", 2, &json!({"name": "ok"}));

        let report = f.engine.repair("by_name").unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].doc_id, 1);
    }
}
