//! Per-index field projection: turns a document into the encoded key it
//! contributes to one index, per spec.md §4.4's index-maintenance rule 1.

use crate::config::{FieldProcess, IndexDef, SortDirection};
use crate::types::{self, Document};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;

/// A caller-registered value transform, indexed by `FieldProcess::Custom(key)`,
/// replacing the teacher's/spec's source-text `process` field (spec.md §9).
pub type CustomProcessor = Arc<dyn Fn(&Json) -> Json + Send + Sync>;

#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    custom: HashMap<u32, CustomProcessor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: u32, f: CustomProcessor) {
        self.custom.insert(key, f);
    }

    fn apply(&self, key: u32, v: &Json) -> Json {
        match self.custom.get(&key) {
            Some(f) => f(v),
            None => v.clone(),
        }
    }
}

fn fold_field(def: &IndexDef, raw: Option<&Json>, processors: &ProcessorRegistry) -> Json {
    let mut v = raw.cloned().unwrap_or(Json::Null);
    if def.ignore_case {
        if let Json::String(s) = &v {
            v = Json::String(s.to_lowercase());
        }
    }
    match def.process {
        FieldProcess::None => v,
        FieldProcess::Lowercase => match v {
            Json::String(s) => Json::String(s.to_lowercase()),
            other => other,
        },
        FieldProcess::Custom(key) => processors.apply(key, &v),
    }
}

/// Outcome of projecting one document through one index definition.
pub enum Projection {
    /// The index should carry an entry under this encoded key.
    Key(String),
    /// The projected value was null/missing and the index is sparse: skip.
    Skip,
    /// The projected value was null/missing and the index is required: fail.
    Missing,
}

/// Projects `doc` through `def`, resolving each configured field path,
/// applying `ignore_case`/`process`, and encoding the result.
///
/// Single-field indexes use `encode_sortable_part` so numeric fields sort
/// numerically rather than lexicographically; composite indexes keep the
/// decimal `encode_composite_key` encoding spec.md §3 describes, across all
/// of the index's fields in declared order (direction is applied by the
/// comparator that reads the index, not at encoding time).
pub fn project(doc: &Document, def: &IndexDef, processors: &ProcessorRegistry) -> Projection {
    let wrapped = Json::Object(doc.clone());
    let values: Vec<Json> = def
        .fields
        .iter()
        .map(|(path, _)| {
            let raw = types::resolve_path(&wrapped, path);
            fold_field(def, raw, processors)
        })
        .collect();

    let all_null = values.iter().all(|v| v.is_null());
    if all_null {
        return if def.sparse {
            Projection::Skip
        } else if def.required {
            Projection::Missing
        } else {
            Projection::Key(encode(def, &values))
        };
    }
    Projection::Key(encode(def, &values))
}

/// Folds and encodes a single lookup value the same way `project` folds and
/// encodes a document's field for `def`, so `find_by`/`find_first_by`/
/// `find_last_by` probe the index with a key built by the same
/// `ignore_case`/`process` rules the writer used — otherwise a lookup for
/// `"A@X.com"` against a folded `ignore_case` index never matches the stored
/// `"a@x.com"` key.
pub fn encode_query_value(def: &IndexDef, value: &Json, processors: &ProcessorRegistry) -> String {
    let folded = fold_field(def, Some(value), processors);
    types::encode_sortable_part(Some(&folded).filter(|v| !v.is_null()))
}

fn encode(def: &IndexDef, values: &[Json]) -> String {
    if def.is_composite() {
        let refs: Vec<Option<&Json>> =
            values.iter().map(|v| if v.is_null() { None } else { Some(v) }).collect();
        types::encode_composite_key(&refs, def.separator)
    } else {
        types::encode_sortable_part(values.first().filter(|v| !v.is_null()))
    }
}

/// Whether `def`'s fields sort descending overall. `Collection::lowest`/
/// `greatest` use this to invert which end of the index they read, since a
/// desc-declared index's own order runs largest-first.
pub fn is_descending(def: &IndexDef) -> bool {
    def.fields.iter().all(|(_, dir)| *dir == SortDirection::Desc) && !def.fields.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexDef;
    use serde_json::json;

    fn doc(v: Json) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn sparse_skips_missing_field() {
        let def = IndexDef::new("by_email", "email").sparse();
        let registry = ProcessorRegistry::new();
        let d = doc(json!({"id": 1}));
        assert!(matches!(project(&d, &def, &registry), Projection::Skip));
    }

    #[test]
    fn required_rejects_missing_field() {
        let def = IndexDef::new("by_email", "email").required();
        let registry = ProcessorRegistry::new();
        let d = doc(json!({"id": 1}));
        assert!(matches!(project(&d, &def, &registry), Projection::Missing));
    }

    #[test]
    fn ignore_case_lowercases_string_values() {
        let def = IndexDef::new("by_email", "email").ignore_case();
        let registry = ProcessorRegistry::new();
        let d = doc(json!({"email": "A@X.com"}));
        match project(&d, &def, &registry) {
            Projection::Key(k) => assert_eq!(k, "sa@x.com"),
            _ => panic!("expected key"),
        }
    }

    #[test]
    fn numeric_single_field_sorts_numerically() {
        let def = IndexDef::new("by_age", "age");
        let registry = ProcessorRegistry::new();
        let low = match project(&doc(json!({"age": 9})), &def, &registry) {
            Projection::Key(k) => k,
            _ => panic!(),
        };
        let high = match project(&doc(json!({"age": 10})), &def, &registry) {
            Projection::Key(k) => k,
            _ => panic!(),
        };
        assert!(low < high, "expected {low:?} < {high:?}");
    }

    #[test]
    fn custom_processor_is_applied() {
        let mut def = IndexDef::new("by_tag", "tag");
        def.process = FieldProcess::Custom(1);
        let mut registry = ProcessorRegistry::new();
        registry.register(1, Arc::new(|v| json!(format!("tag:{v}"))));
        let d = doc(json!({"tag": "x"}));
        match project(&d, &def, &registry) {
            Projection::Key(k) => assert!(k.contains("tag:")),
            _ => panic!("expected key"),
        }
    }
}
