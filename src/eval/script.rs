//! The default map-script evaluator.
//!
//! Scripts look like a JavaScript function but support only what indexing
//! needs: one parameter and a body of `emit(key, value)` calls, where each
//! argument is a dotted path into the document, a string literal, or a
//! number literal. Compiled programs are cached by source text, so the
//! per-document cost during repair is a hash lookup plus path walks.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::db::Document;
use crate::error::{AlderError, Result};
use crate::eval::Evaluator;
use crate::key::Key;

#[derive(Parser)]
#[grammar = "eval/map.pest"]
struct MapParser;

/// A compiled map script: the emit pairs with paths already resolved
/// against the parameter name.
#[derive(Debug)]
struct Program {
    emits: Vec<(Expr, Expr)>,
}

#[derive(Debug, Clone)]
enum Expr {
    /// The whole document (the bare parameter).
    Param,
    /// A dotted path below the parameter, root stripped.
    Path(Vec<String>),
    /// A string or number literal.
    Literal(Document),
}

/// [`Evaluator`] for the map-script language, with a compile cache keyed
/// by source text.
#[derive(Debug, Default)]
pub struct ScriptEvaluator {
    programs: RwLock<AHashMap<String, Arc<Program>>>,
}

impl ScriptEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn program(&self, source: &str) -> Result<Arc<Program>> {
        if let Some(program) = self.programs.read().get(source) {
            return Ok(program.clone());
        }
        let program = Arc::new(compile(source)?);
        self.programs
            .write()
            .insert(source.to_string(), program.clone());
        Ok(program)
    }
}

impl Evaluator for ScriptEvaluator {
    fn evaluate(
        &self,
        source: &str,
        doc: &Document,
        emit: &mut dyn FnMut(Key, Document),
    ) -> Result<()> {
        let program = self.program(source)?;
        for (key_expr, value_expr) in &program.emits {
            // A key path that resolves to nothing skips the emit; the
            // document simply has no entry under this index for it.
            let Some(key) = resolve_key(key_expr, doc) else {
                continue;
            };
            emit(key, resolve_value(value_expr, doc));
        }
        Ok(())
    }

    fn check(&self, source: &str) -> Result<()> {
        self.program(source).map(|_| ())
    }
}

// ── compilation ──────────────────────────────────────────────────────────

fn compile(source: &str) -> Result<Program> {
    let pairs = MapParser::parse(Rule::program, source)
        .map_err(|e| AlderError::evaluation(e.to_string()))?;

    let mut param = String::new();
    let mut emits = Vec::new();

    for pair in pairs {
        if pair.as_rule() != Rule::program {
            continue;
        }
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::ident => param = inner.as_str().to_string(),
                Rule::emit => {
                    let mut exprs = inner.into_inner();
                    let key = compile_expr(&param, exprs.next())?;
                    let value = compile_expr(&param, exprs.next())?;
                    emits.push((key, value));
                }
                _ => {}
            }
        }
    }

    Ok(Program { emits })
}

fn compile_expr(param: &str, pair: Option<Pair<'_, Rule>>) -> Result<Expr> {
    let pair = pair.ok_or_else(|| AlderError::evaluation("emit takes a key and a value"))?;
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| AlderError::evaluation("empty expression"))?;

    match inner.as_rule() {
        Rule::path => {
            let mut segments = inner.as_str().split('.');
            let root = segments.next().unwrap_or_default();
            if root != param {
                return Err(AlderError::evaluation(format!(
                    "unknown identifier `{root}`"
                )));
            }
            let rest: Vec<String> = segments.map(str::to_string).collect();
            if rest.is_empty() {
                Ok(Expr::Param)
            } else {
                Ok(Expr::Path(rest))
            }
        }
        Rule::string => {
            let raw = inner
                .into_inner()
                .next()
                .map(|p| p.as_str())
                .unwrap_or_default();
            Ok(Expr::Literal(Document::String(unescape(raw))))
        }
        Rule::number => {
            let text = inner.as_str();
            // Integers stay integers; anything with a fraction (or too
            // large for i64) becomes a float.
            let value = match text.parse::<i64>() {
                Ok(n) if !text.contains('.') => Document::from(n),
                _ => {
                    let n: f64 = text.parse().map_err(|_| {
                        AlderError::evaluation(format!("bad number literal `{text}`"))
                    })?;
                    Document::from(n)
                }
            };
            Ok(Expr::Literal(value))
        }
        other => Err(AlderError::evaluation(format!(
            "unexpected expression `{other:?}`"
        ))),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// ── resolution ───────────────────────────────────────────────────────────

fn resolve_key(expr: &Expr, doc: &Document) -> Option<Key> {
    match expr {
        Expr::Param => Some(Key::Value(doc.clone())),
        Expr::Path(segments) => walk(doc, segments).map(|v| Key::Value(v.clone())),
        Expr::Literal(value) => Some(Key::Value(value.clone())),
    }
}

fn resolve_value(expr: &Expr, doc: &Document) -> Document {
    match expr {
        Expr::Param => doc.clone(),
        Expr::Path(segments) => walk(doc, segments).cloned().unwrap_or(Document::Null),
        Expr::Literal(value) => value.clone(),
    }
}

fn walk<'a>(doc: &'a Document, segments: &[String]) -> Option<&'a Document> {
    let mut current = doc;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}
