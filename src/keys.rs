//! Persisted key layout.
//!
//! Everything the engine writes lives under one root prefix so unrelated
//! data can share a backend. Sub-namespaces:
//!
//! | key                          | holds                                    |
//! |------------------------------|------------------------------------------|
//! | `alder:doc:<id>`             | document body (JSON bytes)               |
//! | `alder:nextid`               | identity counter for documents + entries |
//! | `alder:mapfunc:<index>`      | map function source                      |
//! | `alder:pend:<index>`         | pending-add set of document ids          |
//! | `alder:penddel:<index>`      | pending-delete set of document ids       |
//! | `alder:entries:<index>:<id>` | entry ids a document owns in an index    |
//! | `alder:idx:<index>`          | the index's rank-sorted entry ids        |
//! | `alder:val:<id>`             | persisted entry value (JSON bytes)       |
//!
//! Index names are validated at definition time (non-empty, no `:`), which
//! keeps the layout collision-free across names.

use crate::error::{AlderError, Result};

/// Root prefix for every key the engine writes.
pub const ROOT: &str = "alder:";

const DOC: &str = "alder:doc:";
const MAP_FUNC: &str = "alder:mapfunc:";

/// Key of a document body.
pub fn doc(id: u64) -> String {
    format!("{DOC}{id}")
}

/// Prefix shared by all document body keys.
pub fn doc_prefix() -> &'static str {
    DOC
}

/// Parse the document id out of a document body key.
pub fn doc_id(key: &str) -> Option<u64> {
    key.strip_prefix(DOC)?.parse().ok()
}

/// Key of the shared identity counter.
pub fn next_id() -> &'static str {
    "alder:nextid"
}

/// Key of an index's map function source.
pub fn map_func(index: &str) -> String {
    format!("{MAP_FUNC}{index}")
}

/// Prefix shared by all map function keys.
pub fn map_func_prefix() -> &'static str {
    MAP_FUNC
}

/// Parse the index name out of a map function key.
pub fn index_name(key: &str) -> Option<&str> {
    key.strip_prefix(MAP_FUNC)
}

/// Key of an index's pending-add set.
pub fn pending_add(index: &str) -> String {
    format!("alder:pend:{index}")
}

/// Key of an index's pending-delete set.
pub fn pending_delete(index: &str) -> String {
    format!("alder:penddel:{index}")
}

/// Key of the entry set a document owns in an index.
pub fn entries(index: &str, doc_id: u64) -> String {
    format!("alder:entries:{index}:{doc_id}")
}

/// Key of an index's rank-sorted structure.
pub fn sorted(index: &str) -> String {
    format!("alder:idx:{index}")
}

/// Key of a persisted entry value.
pub fn value(entry_id: u64) -> String {
    format!("alder:val:{entry_id}")
}

/// Check that a name is usable as an index name.
pub fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AlderError::invalid_argument("index name must not be empty"));
    }
    if name.contains(':') {
        return Err(AlderError::invalid_argument(format!(
            "index name `{name}` must not contain ':'"
        )));
    }
    Ok(())
}
