//! `TypedCollection`: a thin wrapper over [`Collection`] that layers a
//! MongoDB-style update-operator interpreter on top of its plain CRUD surface
//! (spec.md §9's pluggable-validator/typed-wrapper component, grounded on the
//! same `$set`/`$inc`/... vocabulary the query engine already speaks for
//! reads).
//!
//! Schema validation itself is not this module's job — a [`Validator`] is
//! attached to the underlying `Collection` at registration time
//! (`Database::register_collection_with_validator`) and runs on every write
//! regardless of whether it goes through `TypedCollection` or `Collection`
//! directly. `TypedCollection` only adds the operator layer: turning an
//! update-operator document into the fully-materialized replacement document
//! `Collection::save` expects.

use crate::error::{Result, StorageError};
use crate::types::Document;
use crate::Collection;
use serde_json::Value as Json;

/// Applies one update-operator document (`{"$set": {...}, "$inc": {...}}`) to
/// `doc`, returning the new document. Unknown top-level keys that don't start
/// with `$` are rejected — callers that want a plain field replacement should
/// use [`Collection::save`] directly instead of going through the operator
/// interpreter.
fn apply_operators(doc: &Document, ops: &Document) -> Result<Document> {
    let mut out = doc.clone();
    for (op, spec) in ops {
        match op.as_str() {
            "$set" => {
                for (path, value) in as_spec_object(op, spec)? {
                    set_path(&mut out, path, value.clone());
                }
            }
            "$unset" => {
                for (path, _) in as_spec_object(op, spec)? {
                    unset_path(&mut out, path);
                }
            }
            "$inc" => {
                for (path, delta) in as_spec_object(op, spec)? {
                    let delta = delta.as_f64().ok_or_else(|| {
                        StorageError::OperatorMisuse(format!("$inc value for '{path}' must be numeric"))
                    })?;
                    let current = get_path(&out, path).and_then(|v| v.as_f64()).unwrap_or(0.0);
                    set_path(&mut out, path, numeric_json(current + delta));
                }
            }
            "$mul" => {
                for (path, factor) in as_spec_object(op, spec)? {
                    let factor = factor.as_f64().ok_or_else(|| {
                        StorageError::OperatorMisuse(format!("$mul value for '{path}' must be numeric"))
                    })?;
                    let current = get_path(&out, path).and_then(|v| v.as_f64()).unwrap_or(0.0);
                    set_path(&mut out, path, numeric_json(current * factor));
                }
            }
            "$push" => {
                for (path, value) in as_spec_object(op, spec)? {
                    let mut arr = match get_path(&out, path) {
                        Some(Json::Array(a)) => a.clone(),
                        Some(_) | None => Vec::new(),
                    };
                    arr.push(value.clone());
                    set_path(&mut out, path, Json::Array(arr));
                }
            }
            "$pull" => {
                for (path, value) in as_spec_object(op, spec)? {
                    if let Some(Json::Array(arr)) = get_path(&out, path) {
                        let filtered: Vec<Json> = arr.iter().filter(|v| *v != value).cloned().collect();
                        set_path(&mut out, path, Json::Array(filtered));
                    }
                }
            }
            "$rename" => {
                for (path, new_name) in as_spec_object(op, spec)? {
                    let new_name = new_name.as_str().ok_or_else(|| {
                        StorageError::OperatorMisuse(format!("$rename target for '{path}' must be a string"))
                    })?;
                    if let Some(value) = get_path(&out, path).cloned() {
                        unset_path(&mut out, path);
                        set_path(&mut out, new_name, value);
                    }
                }
            }
            other => return Err(StorageError::OperatorMisuse(format!("unsupported update operator '{other}'"))),
        }
    }
    Ok(out)
}

fn as_spec_object<'a>(op: &str, spec: &'a Json) -> Result<&'a serde_json::Map<String, Json>> {
    spec.as_object().ok_or_else(|| StorageError::OperatorMisuse(format!("{op} requires an object argument")))
}

fn numeric_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}

/// Dot-path field access, restricted to nested objects (no array-index
/// segments) — matching the document model's secondary-index projection
/// rules in `collection::project`.
fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Json> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for seg in segments {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Json) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);
    let mut current = doc;
    for seg in segments {
        let entry = current.entry(seg.to_string()).or_insert_with(|| Json::Object(Default::default()));
        if !entry.is_object() {
            *entry = Json::Object(Default::default());
        }
        current = entry.as_object_mut().unwrap();
    }
    current.insert(last.to_string(), value);
}

fn unset_path(doc: &mut Document, path: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);
    let mut current: Option<&mut Document> = Some(doc);
    for seg in segments {
        current = current.and_then(|d| d.get_mut(seg)).and_then(|v| v.as_object_mut());
    }
    if let Some(d) = current {
        d.remove(last);
    }
}

/// A `Collection` plus the update-operator interpreter. Everything else
/// (plain insert/save/find/remove, index and TTL maintenance, persistence) is
/// delegated straight through to the wrapped `Collection`.
pub struct TypedCollection {
    inner: Collection,
}

impl TypedCollection {
    pub fn new(inner: Collection) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Collection {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Collection {
        &mut self.inner
    }

    pub fn into_inner(self) -> Collection {
        self.inner
    }

    pub fn insert(&mut self, doc: Document) -> Result<Document> {
        self.inner.insert(doc)
    }

    pub fn find_by_id(&self, id: &Json) -> Option<Document> {
        self.inner.find_by_id(id)
    }

    pub fn find(&mut self, predicate: impl Fn(&Document) -> bool) -> Vec<Document> {
        self.inner.find(predicate)
    }

    pub fn remove(&mut self, predicate: impl Fn(&Document) -> bool) -> Result<usize> {
        self.inner.remove(predicate)
    }

    /// Applies `ops` (an update-operator document) to every document matching
    /// `predicate`, saving each result back through `Collection::save` so
    /// index maintenance, validation, and audit history all run exactly as
    /// they would for a direct `save` call.
    pub fn update_many(&mut self, predicate: impl Fn(&Document) -> bool, ops: &Document) -> Result<usize> {
        let matches = self.inner.find(predicate);
        let mut updated = 0;
        for doc in matches {
            let next = apply_operators(&doc, ops)?;
            self.inner.save(next)?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Like [`Self::update_many`] but stops after the first match, matching
    /// the `updateOne` semantics most document-store APIs expose alongside a
    /// bulk `updateMany`.
    pub fn update_one(&mut self, predicate: impl Fn(&Document) -> bool, ops: &Document) -> Result<bool> {
        let target = self.inner.find(predicate).into_iter().next();
        match target {
            Some(doc) => {
                let next = apply_operators(&doc, ops)?;
                self.inner.save(next)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::project::ProcessorRegistry;
    use crate::config::CollectionConfig;
    use crate::id_gen::GeneratorRegistry;
    use crate::storage::adapter::MemoryAdapter;
    use serde_json::json;
    use std::sync::Arc;

    fn doc(v: Json) -> Document {
        v.as_object().unwrap().clone()
    }

    fn fresh(config: CollectionConfig) -> TypedCollection {
        TypedCollection::new(Collection::new(
            config,
            Box::new(MemoryAdapter::new()),
            Arc::new(GeneratorRegistry::new()),
            Arc::new(ProcessorRegistry::new()),
        ))
    }

    #[test]
    fn set_and_inc_apply_in_order() {
        let mut coll = fresh(CollectionConfig::new("accts"));
        coll.insert(doc(json!({"id": 1, "balance": 100}))).unwrap();
        let ops = doc(json!({"$set": {"name": "a"}, "$inc": {"balance": -25}}));
        assert!(coll.update_one(|d| d["id"] == json!(1), &ops).unwrap());
        let found = coll.find_by_id(&json!(1)).unwrap();
        assert_eq!(found["balance"], json!(75));
        assert_eq!(found["name"], json!("a"));
    }

    #[test]
    fn unset_removes_field() {
        let mut coll = fresh(CollectionConfig::new("accts"));
        coll.insert(doc(json!({"id": 1, "temp": "x"}))).unwrap();
        let ops = doc(json!({"$unset": {"temp": ""}}));
        coll.update_one(|d| d["id"] == json!(1), &ops).unwrap();
        assert!(!coll.find_by_id(&json!(1)).unwrap().contains_key("temp"));
    }

    #[test]
    fn push_and_pull_mutate_arrays() {
        let mut coll = fresh(CollectionConfig::new("lists"));
        coll.insert(doc(json!({"id": 1, "tags": ["a"]}))).unwrap();
        coll.update_one(|d| d["id"] == json!(1), &doc(json!({"$push": {"tags": "b"}}))).unwrap();
        assert_eq!(coll.find_by_id(&json!(1)).unwrap()["tags"], json!(["a", "b"]));
        coll.update_one(|d| d["id"] == json!(1), &doc(json!({"$pull": {"tags": "a"}}))).unwrap();
        assert_eq!(coll.find_by_id(&json!(1)).unwrap()["tags"], json!(["b"]));
    }

    #[test]
    fn rename_moves_value_to_new_key() {
        let mut coll = fresh(CollectionConfig::new("items"));
        coll.insert(doc(json!({"id": 1, "old": "v"}))).unwrap();
        coll.update_one(|d| d["id"] == json!(1), &doc(json!({"$rename": {"old": "new"}}))).unwrap();
        let found = coll.find_by_id(&json!(1)).unwrap();
        assert!(!found.contains_key("old"));
        assert_eq!(found["new"], json!("v"));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let mut coll = fresh(CollectionConfig::new("items"));
        coll.insert(doc(json!({"id": 1}))).unwrap();
        let err = coll.update_one(|d| d["id"] == json!(1), &doc(json!({"$bogus": {}}))).unwrap_err();
        assert!(matches!(err, StorageError::OperatorMisuse(_)));
    }

    #[test]
    fn update_many_applies_to_every_match() {
        let mut coll = fresh(CollectionConfig::new("accts"));
        coll.insert(doc(json!({"id": 1, "active": true, "balance": 10}))).unwrap();
        coll.insert(doc(json!({"id": 2, "active": true, "balance": 20}))).unwrap();
        coll.insert(doc(json!({"id": 3, "active": false, "balance": 30}))).unwrap();
        let updated = coll.update_many(|d| d["active"] == json!(true), &doc(json!({"$inc": {"balance": 5}}))).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(coll.find_by_id(&json!(1)).unwrap()["balance"], json!(15));
        assert_eq!(coll.find_by_id(&json!(2)).unwrap()["balance"], json!(25));
        assert_eq!(coll.find_by_id(&json!(3)).unwrap()["balance"], json!(30));
    }
}
