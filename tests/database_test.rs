use std::sync::Arc;

use alder::{AlderError, Database, DatabaseConfig, Document, Evaluator, Key, Kv, MemoryKv};
use serde_json::json;

const MENU_MAP: &str = "function(doc) { emit(doc.category, doc); }";

fn foo() -> Document {
    json!({"name": "foo", "category": "pizza"})
}

fn bar() -> Document {
    json!({"name": "bar", "category": "ice cream"})
}

/// A store with the menu index defined and both documents added but not
/// yet materialized.
fn menu_db() -> (Database, u64, u64) {
    let db = Database::in_memory().unwrap();
    db.define("by_category", MENU_MAP).unwrap();
    let foo_id = db.add(&foo()).unwrap();
    let bar_id = db.add(&bar()).unwrap();
    (db, foo_id, bar_id)
}

fn names(docs: &[Document]) -> Vec<&str> {
    docs.iter().map(|d| d["name"].as_str().unwrap()).collect()
}

#[test]
fn test_scan_orders_by_emitted_key() {
    let (db, _, _) = menu_db();

    // The first read materializes both documents; "ice cream" sorts
    // before "pizza".
    let docs = db.scan("by_category", 0, None).unwrap();
    assert_eq!(names(&docs), vec!["bar", "foo"]);
}

#[test]
fn test_delete_before_materialization() {
    let (db, _, bar_id) = menu_db();
    db.delete(bar_id).unwrap();

    let docs = db.scan("by_category", 0, None).unwrap();
    assert_eq!(names(&docs), vec!["foo"]);
}

#[test]
fn test_delete_after_materialization() {
    let (db, _, bar_id) = menu_db();
    db.scan("by_category", 0, None).unwrap();

    db.delete(bar_id).unwrap();
    let docs = db.scan("by_category", 0, None).unwrap();
    assert_eq!(names(&docs), vec!["foo"]);
}

#[test]
fn test_update_moves_document_to_its_new_key() {
    let (db, _, bar_id) = menu_db();
    db.scan("by_category", 0, None).unwrap();

    db.update(bar_id, &json!({"name": "bar", "category": "sushi"}))
        .unwrap();

    // "pizza" now sorts before "sushi", and the old "ice cream" entry is
    // gone rather than coexisting with the new one.
    let docs = db.scan("by_category", 0, None).unwrap();
    assert_eq!(names(&docs), vec!["foo", "bar"]);
}

#[test]
fn test_scan_offset_and_limit() {
    let (db, _, _) = menu_db();

    assert_eq!(
        names(&db.scan("by_category", 0, Some(1)).unwrap()),
        vec!["bar"]
    );
    assert_eq!(
        names(&db.scan("by_category", 1, None).unwrap()),
        vec!["foo"]
    );
    assert!(db.scan("by_category", 2, None).unwrap().is_empty());
}

#[test]
fn test_scan_pages_agree_with_the_full_scan() {
    let db = Database::in_memory().unwrap();
    db.define("by_n", "function(doc) { emit(doc.n, doc); }")
        .unwrap();
    for n in 0..10 {
        db.add(&json!({"n": n})).unwrap();
    }

    let all = db.scan("by_n", 0, None).unwrap();
    assert_eq!(all.len(), 10);
    for offset in 0..12 {
        for limit in 0..12 {
            let page = db.scan("by_n", offset, Some(limit)).unwrap();
            let start = offset.min(all.len());
            let end = (offset + limit).min(all.len());
            assert_eq!(page, &all[start..end], "offset {offset} limit {limit}");
        }
    }
}

#[test]
fn test_lookup_exact_key() {
    let (db, _, _) = menu_db();

    assert_eq!(names(&db.lookup("by_category", "pizza", None).unwrap()), vec!["foo"]);
    assert_eq!(
        names(&db.lookup("by_category", "ice cream", None).unwrap()),
        vec!["bar"]
    );
    assert!(db.lookup("by_category", "nachos", None).unwrap().is_empty());
}

#[test]
fn test_lookup_range_and_limit() {
    let db = Database::in_memory().unwrap();
    db.define("by_price", "function(doc) { emit(doc.price, doc.name); }")
        .unwrap();
    for (name, price) in [("a", 1), ("b", 3), ("c", 5), ("d", 7)] {
        db.add(&json!({"name": name, "price": price})).unwrap();
    }

    let hits = db.lookup("by_price", Key::range(2, 6), None).unwrap();
    assert_eq!(hits, vec![json!("b"), json!("c")]);

    // Endpoints are inclusive.
    let hits = db.lookup("by_price", Key::range(3, 7), None).unwrap();
    assert_eq!(hits, vec![json!("b"), json!("c"), json!("d")]);

    let hits = db.lookup("by_price", Key::range(0, 100), Some(2)).unwrap();
    assert_eq!(hits, vec![json!("a"), json!("b")]);
}

#[test]
fn test_document_ids_are_never_reused() {
    let db = Database::in_memory().unwrap();
    let a = db.add(&json!({"n": 1})).unwrap();
    db.delete(a).unwrap();
    let b = db.add(&json!({"n": 2})).unwrap();
    assert!(b > a);
}

#[test]
fn test_deleted_entries_release_their_values() {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let db = Database::new(
        kv.clone(),
        Arc::new(alder::ScriptEvaluator::new()),
        DatabaseConfig::default(),
    );
    db.define("by_category", MENU_MAP).unwrap();
    let id = db.add(&foo()).unwrap();
    db.repair("by_category").unwrap();
    assert_eq!(kv.keys_with_prefix("alder:val:").unwrap().len(), 1);

    db.delete(id).unwrap();
    db.repair("by_category").unwrap();
    assert!(kv.keys_with_prefix("alder:val:").unwrap().is_empty());
}

#[test]
fn test_redefining_an_index_rebuilds_it() {
    let db = Database::in_memory().unwrap();
    db.define("menu", "function(doc) { emit(doc.name, doc); }")
        .unwrap();
    db.add(&foo()).unwrap();
    db.add(&bar()).unwrap();
    assert_eq!(names(&db.lookup("menu", "foo", None).unwrap()), vec!["foo"]);

    db.define("menu", MENU_MAP).unwrap();

    // Entries keyed by the old map are rebuilt under the new one.
    assert!(db.lookup("menu", "foo", None).unwrap().is_empty());
    assert_eq!(names(&db.lookup("menu", "pizza", None).unwrap()), vec!["foo"]);
    assert_eq!(db.scan("menu", 0, None).unwrap().len(), 2);
}

#[test]
fn test_documents_added_after_definition_are_picked_up() {
    let db = Database::in_memory().unwrap();
    db.add(&foo()).unwrap();
    db.define("by_category", MENU_MAP).unwrap();
    db.add(&bar()).unwrap();

    let docs = db.scan("by_category", 0, None).unwrap();
    assert_eq!(names(&docs), vec!["bar", "foo"]);
}

#[test]
fn test_indexes_repair_independently() {
    let db = Database::in_memory().unwrap();
    db.define("by_category", MENU_MAP).unwrap();
    db.define("by_name", "function(doc) { emit(doc.name, doc); }")
        .unwrap();
    db.add(&foo()).unwrap();

    // Repairing one index leaves the other's queue untouched.
    db.repair("by_name").unwrap();
    assert_eq!(db.backlog("by_name").unwrap(), (0, 0));
    assert_eq!(db.backlog("by_category").unwrap(), (1, 0));

    // The queued index catches up when it is read.
    assert_eq!(
        names(&db.scan("by_category", 0, None).unwrap()),
        vec!["foo"]
    );
    assert_eq!(db.backlog("by_category").unwrap(), (0, 0));
}

#[test]
fn test_truncate_drops_documents_and_indexes() {
    let (db, foo_id, _) = menu_db();
    db.scan("by_category", 0, None).unwrap();

    db.truncate().unwrap();

    assert_eq!(db.get(foo_id).unwrap(), None);
    assert!(db.indexes().unwrap().is_empty());
    assert!(matches!(
        db.scan("by_category", 0, None).unwrap_err(),
        AlderError::NotFound(_)
    ));
}

/// Indexes documents natively, without the script language.
#[derive(Debug)]
struct FieldEvaluator;

impl Evaluator for FieldEvaluator {
    fn evaluate(
        &self,
        _source: &str,
        doc: &Document,
        emit: &mut dyn FnMut(Key, Document),
    ) -> alder::Result<()> {
        match doc.get("n") {
            Some(n) => {
                emit(Key::Value(n.clone()), doc.clone());
                Ok(())
            }
            None => Err(AlderError::evaluation("document has no n field")),
        }
    }
}

#[test]
fn test_custom_evaluator_failures_are_reported_not_fatal() {
    let db = Database::new(
        Arc::new(MemoryKv::new()),
        Arc::new(FieldEvaluator),
        DatabaseConfig::default(),
    );
    db.define("by_n", "n").unwrap();
    db.add(&json!({"n": 2})).unwrap();
    let bad = db.add(&json!({"m": 9})).unwrap();
    db.add(&json!({"n": 1})).unwrap();

    let report = db.repair("by_n").unwrap();
    assert_eq!(report.repaired, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].doc_id, bad);

    let docs = db.scan("by_n", 0, None).unwrap();
    assert_eq!(docs, vec![json!({"n": 1}), json!({"n": 2})]);
}
