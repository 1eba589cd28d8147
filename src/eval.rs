//! Map-script evaluation.
//!
//! An index is defined by a script that receives a document and emits
//! `(key, value)` pairs into the index. Evaluation is pluggable: the
//! default [`ScriptEvaluator`] runs a small JavaScript-like map language,
//! and embedders can swap in their own [`Evaluator`] to index documents
//! with arbitrary native logic.

use std::fmt;

use crate::db::Document;
use crate::error::Result;
use crate::key::Key;

mod script;

pub use script::ScriptEvaluator;

/// Turns a document into the `(key, value)` pairs an index should hold
/// for it.
///
/// `evaluate` may call `emit` any number of times, including zero. An
/// error aborts indexing of that one document; the repair engine records
/// the failure and moves on to the next document.
pub trait Evaluator: Send + Sync + fmt::Debug {
    /// Run `source` against `doc`, feeding each emitted pair to `emit`.
    fn evaluate(
        &self,
        source: &str,
        doc: &Document,
        emit: &mut dyn FnMut(Key, Document),
    ) -> Result<()>;

    /// Validate `source` without running it. Called when an index is
    /// defined so malformed scripts are rejected up front rather than
    /// failing on every document during repair.
    fn check(&self, _source: &str) -> Result<()> {
        Ok(())
    }
}
