//! Audit-mode version history: a structural delta between successive
//! document snapshots, represented as the sum type spec.md §9's REDESIGN
//! FLAGS calls for (`Insert | Update(path, old, new) | Delete(path, old) |
//! Array(path, ops)`) rather than a free-form JSON diff.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// One structural change at a dotted field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldChange {
    Insert { path: String, value: Json },
    Update { path: String, old: Json, new: Json },
    Delete { path: String, old: Json },
    Array { path: String, op: ArrayOp },
}

/// Trailing-element array deltas; anything else (reorder, interior splice)
/// falls back to a whole-value `FieldChange::Update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayOp {
    Push(Json),
    Pop,
}

/// One entry of a `StoredRecord`'s `history` per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    pub delta: Vec<FieldChange>,
    pub date_ms: i64,
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Structural diff from `old` to `new`, both JSON objects, emitting a flat
/// list of `FieldChange`s. Arrays that only grew or shrank at the tail
/// produce `Array` ops; any other array change is a whole-value `Update`.
pub fn diff(old: &Json, new: &Json) -> Vec<FieldChange> {
    let mut out = Vec::new();
    diff_at("", old, new, &mut out);
    out
}

fn diff_at(path: &str, old: &Json, new: &Json, out: &mut Vec<FieldChange>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Json::Object(o), Json::Object(n)) => {
            for (k, ov) in o {
                let child = join_path(path, k);
                match n.get(k) {
                    Some(nv) => diff_at(&child, ov, nv, out),
                    None => out.push(FieldChange::Delete { path: child, old: ov.clone() }),
                }
            }
            for (k, nv) in n {
                if !o.contains_key(k) {
                    out.push(FieldChange::Insert { path: join_path(path, k), value: nv.clone() });
                }
            }
        }
        (Json::Array(oa), Json::Array(na)) => {
            if na.len() > oa.len() && na[..oa.len()] == oa[..] {
                for item in &na[oa.len()..] {
                    out.push(FieldChange::Array { path: path.to_string(), op: ArrayOp::Push(item.clone()) });
                }
            } else if na.len() < oa.len() && oa[..na.len()] == na[..] {
                for _ in na.len()..oa.len() {
                    out.push(FieldChange::Array { path: path.to_string(), op: ArrayOp::Pop });
                }
            } else {
                out.push(FieldChange::Update { path: path.to_string(), old: old.clone(), new: new.clone() });
            }
        }
        _ => out.push(FieldChange::Update { path: path.to_string(), old: old.clone(), new: new.clone() }),
    }
}

/// Applies `delta` in order to `base`, mutating it in place.
pub fn apply(base: &mut Json, delta: &[FieldChange]) {
    for change in delta {
        match change {
            FieldChange::Insert { path, value } => set_path(base, path, value.clone()),
            FieldChange::Update { path, new, .. } => set_path(base, path, new.clone()),
            FieldChange::Delete { path, .. } => remove_path(base, path),
            FieldChange::Array { path, op } => {
                if let Some(arr) = get_array_mut(base, path) {
                    match op {
                        ArrayOp::Push(v) => arr.push(v.clone()),
                        ArrayOp::Pop => {
                            arr.pop();
                        }
                    }
                }
            }
        }
    }
}

/// Folds a sequence of history entries starting from an empty object,
/// reproducing the record's current `data` — the audit-completeness
/// invariant from spec.md §8.
pub fn fold(history: &[HistoryEntry]) -> Json {
    let mut acc = Json::Object(Default::default());
    for entry in history {
        apply(&mut acc, &entry.delta);
    }
    acc
}

fn set_path(root: &mut Json, path: &str, value: Json) {
    if path.is_empty() {
        *root = value;
        return;
    }
    let mut cur = root;
    let segs: Vec<&str> = path.split('.').collect();
    for seg in &segs[..segs.len() - 1] {
        if !cur.is_object() {
            *cur = Json::Object(Default::default());
        }
        cur = cur
            .as_object_mut()
            .unwrap()
            .entry(seg.to_string())
            .or_insert_with(|| Json::Object(Default::default()));
    }
    if !cur.is_object() {
        *cur = Json::Object(Default::default());
    }
    cur.as_object_mut().unwrap().insert(segs[segs.len() - 1].to_string(), value);
}

fn remove_path(root: &mut Json, path: &str) {
    let segs: Vec<&str> = path.split('.').collect();
    let mut cur = root;
    for seg in &segs[..segs.len() - 1] {
        match cur.as_object_mut().and_then(|m| m.get_mut(*seg)) {
            Some(next) => cur = next,
            None => return,
        }
    }
    if let Some(map) = cur.as_object_mut() {
        map.remove(segs[segs.len() - 1]);
    }
}

fn get_array_mut<'a>(root: &'a mut Json, path: &str) -> Option<&'a mut Vec<Json>> {
    let mut cur = root;
    if !path.is_empty() {
        for seg in path.split('.') {
            cur = cur.as_object_mut()?.get_mut(seg)?;
        }
    }
    cur.as_array_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_then_apply_roundtrips() {
        let old = json!({"a": 1, "b": {"c": 2}});
        let new = json!({"a": 2, "b": {"c": 2}, "d": 4});
        let delta = diff(&old, &new);
        let mut base = old.clone();
        apply(&mut base, &delta);
        assert_eq!(base, new);
    }

    #[test]
    fn array_push_is_tracked_as_array_op() {
        let old = json!({"tags": ["a", "b"]});
        let new = json!({"tags": ["a", "b", "c"]});
        let delta = diff(&old, &new);
        assert!(matches!(delta[0], FieldChange::Array { op: ArrayOp::Push(_), .. }));
        let mut base = old;
        apply(&mut base, &delta);
        assert_eq!(base, new);
    }

    #[test]
    fn history_folds_from_empty_to_current() {
        let mut history = Vec::new();
        let mut acc = json!({});
        for (i, step) in [json!({"a": 1}), json!({"a": 1, "b": 2}), json!({"a": 3, "b": 2})]
            .into_iter()
            .enumerate()
        {
            let delta = diff(&acc, &step);
            history.push(HistoryEntry { version: i as u64, delta, date_ms: i as i64 });
            acc = step;
        }
        assert_eq!(fold(&history), acc);
        assert_eq!(history.len(), history.last().unwrap().version as usize + 1);
    }
}
