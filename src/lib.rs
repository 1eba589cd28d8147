//! # Alder
//!
//! A document store with scripted, self-repairing secondary indexes.
//!
//! Documents are arbitrary JSON bodies under numeric ids. Indexes are
//! defined by small map scripts that emit `(key, value)` pairs per
//! document. Mutations never touch an index inline; they queue work that
//! a pull-based repair engine drains when the index is next read, so
//! writes stay cheap and reads see everything written before them.
//!
//! ## Features
//!
//! - **Documents**: JSON bodies with monotonically assigned ids
//! - **Maps**: JavaScript-like scripts choose the keys a document
//!   appears under, with pluggable evaluation for native logic
//! - **Pull-based repair**: worker pools rebuild index views on demand;
//!   concurrent repairs of the same index stay correct
//! - **Ranked queries**: exact, range and paged lookups in key order
//! - **Backends**: in-memory, or durable via an append-only log
//! - **Wire protocol**: a line-oriented TCP server and client
//!
//! ## Quick start
//!
//! ```
//! use alder::Database;
//! use serde_json::json;
//!
//! # fn main() -> alder::Result<()> {
//! let db = Database::in_memory()?;
//! db.define("by_category", "function(doc) { emit(doc.category, doc); }")?;
//!
//! db.add(&json!({"name": "foo", "category": "pizza"}))?;
//! db.add(&json!({"name": "bar", "category": "ice cream"}))?;
//!
//! // Reads repair the index before serving it.
//! let hits = db.lookup("by_category", "pizza", None)?;
//! assert_eq!(hits[0]["name"], "foo");
//!
//! let menu = db.scan("by_category", 0, None)?;
//! assert_eq!(menu[0]["name"], "bar"); // "ice cream" ranks below "pizza"
//! # Ok(())
//! # }
//! ```

mod db;
mod error;
pub mod eval;
pub mod index;
mod key;
pub mod keys;
pub mod kv;
pub mod net;
mod rank;

pub use db::{Database, DatabaseConfig, DocId, Document};
pub use error::{AlderError, Result};
pub use eval::{Evaluator, ScriptEvaluator};
pub use index::{RepairFailure, RepairReport};
pub use key::Key;
pub use kv::{FileKv, FileKvConfig, Kv, KvConfig, KvFactory, MemoryKv};
pub use net::{Client, Frame, Server};
pub use rank::{STRING_PREFIX_BYTES, rank_bounds, rank_of};

/// Library version, from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
