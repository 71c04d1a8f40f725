//! MongoDB-compatible query engine: interpreter + compiler dual path.

pub mod compiler;
pub mod operators;

pub use compiler::{compile, CompiledQuery};
pub use operators::{eval_query, Predicate};

use crate::error::Result;
use crate::types::Document;

/// Builds a `doc -> bool` predicate for `query`, trying the compiled fast
/// path first and falling back to the tree-walking interpreter on any
/// compile error (spec.md §4.5). The two paths are required to agree on
/// every document — see `compiled_and_interpreted_paths_agree` in
/// `compiler.rs`.
pub fn query(filter: &serde_json::Value) -> Predicate {
    match compile(filter) {
        Ok(compiled) => Box::new(move |doc: &Document| compiled.eval(doc)),
        Err(e) => {
            log::warn!("query compilation failed, falling back to interpreter: {e}");
            let filter = filter.clone();
            Box::new(move |doc: &Document| eval_query(&filter, doc).unwrap_or(false))
        }
    }
}

pub fn try_query(filter: &serde_json::Value) -> Result<Predicate> {
    let compiled = compile(filter)?;
    Ok(Box::new(move |doc: &Document| compiled.eval(doc)))
}
