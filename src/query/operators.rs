//! Mongo-compatible query operator semantics: the interpreter path.
//!
//! `eval_query` builds no persistent tree — spec.md calls this the
//! "interpreter", a walk over the query document itself, re-evaluated on
//! every call. The compiler (`query/compiler.rs`) pre-parses the same query
//! shape into a closure tree once; both call into the scalar/array operator
//! logic in this module so the two paths can never diverge in semantics.

use crate::error::{Result, StorageError};
use crate::types::{deep_eq, resolve_path, value_cmp};
use regex::Regex;
use serde_json::Value as Json;
use std::cmp::Ordering;

use crate::types::Document;

/// A compiled predicate over a document.
pub type Predicate = Box<dyn Fn(&Document) -> bool + Send + Sync>;

fn doc_as_value(doc: &Document) -> Json {
    Json::Object(doc.clone())
}

/// Entry point for the interpreter path: evaluate `query` against `doc`.
pub fn eval_query(query: &Json, doc: &Document) -> Result<bool> {
    eval_query_value(query, &doc_as_value(doc))
}

pub(crate) fn eval_query_value(query: &Json, doc: &Json) -> Result<bool> {
    let map = query
        .as_object()
        .ok_or_else(|| StorageError::OperatorMisuse("query must be an object".into()))?;
    for (key, value) in map {
        let ok = if let Some(stripped) = key.strip_prefix('$') {
            eval_top_level(stripped, value, doc)?
        } else {
            eval_field_condition(doc, key, value)?
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_top_level(op: &str, arg: &Json, doc: &Json) -> Result<bool> {
    match op {
        "and" => {
            let arr = as_query_array(arg)?;
            for q in arr {
                if !eval_query_value(q, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "or" => {
            let arr = as_query_array(arg)?;
            for q in arr {
                if eval_query_value(q, doc)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "nor" => {
            let arr = as_query_array(arg)?;
            for q in arr {
                if eval_query_value(q, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "not" => Ok(!eval_query_value(arg, doc)?),
        "text" => eval_text(arg, doc),
        "where" => Err(StorageError::QueryCompile(
            "$where is unsupported by default (requires a registered capability; see spec.md §9)".into(),
        )),
        other => Err(StorageError::OperatorMisuse(format!("unsupported top-level operator ${other}"))),
    }
}

fn as_query_array(arg: &Json) -> Result<&Vec<Json>> {
    arg.as_array().ok_or_else(|| StorageError::OperatorMisuse("expected an array of sub-queries".into()))
}

fn eval_field_condition(doc: &Json, path: &str, condition: &Json) -> Result<bool> {
    let resolved = resolve_path(doc, path);
    match condition {
        Json::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            for (op, arg) in map {
                let stripped = op.strip_prefix('$').unwrap_or(op);
                if !apply_operator(stripped, arg, resolved, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(matches_literal(resolved, condition)),
    }
}

pub(crate) fn matches_literal(resolved: Option<&Json>, literal: &Json) -> bool {
    match resolved {
        Some(Json::Array(items)) => {
            items.iter().any(|i| deep_eq(i, literal)) || deep_eq(resolved.unwrap(), literal)
        }
        Some(v) => deep_eq(v, literal),
        None => literal.is_null(),
    }
}

/// Operators that act on the whole (possibly array-valued) resolved value
/// rather than being distributed element-wise.
fn is_array_aware(op: &str) -> bool {
    matches!(op, "all" | "size" | "elemMatch" | "type" | "exists" | "in" | "nin")
}

fn apply_operator(op: &str, arg: &Json, resolved: Option<&Json>, root: &Json) -> Result<bool> {
    if !is_array_aware(op) {
        if let Some(Json::Array(items)) = resolved {
            for item in items {
                if apply_scalar(op, arg, Some(item), root)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
    }
    apply_scalar(op, arg, resolved, root)
}

fn apply_scalar(op: &str, arg: &Json, resolved: Option<&Json>, root: &Json) -> Result<bool> {
    match op {
        "eq" => Ok(matches_literal(resolved, arg)),
        "ne" => Ok(!matches_literal(resolved, arg)),
        "gt" => Ok(cmp_resolved(resolved, arg) == Ordering::Greater),
        "gte" => Ok(cmp_resolved(resolved, arg) != Ordering::Less),
        "lt" => Ok(cmp_resolved(resolved, arg) == Ordering::Less),
        "lte" => Ok(cmp_resolved(resolved, arg) != Ordering::Greater),
        "in" => Ok(in_check(arg, resolved)?),
        "nin" => Ok(!in_check(arg, resolved)?),
        "exists" => {
            let want = arg.as_bool().unwrap_or(true);
            Ok(resolved.is_some() == want)
        }
        "type" => eval_type(arg, resolved),
        "all" => eval_all(arg, resolved),
        "elemMatch" => eval_elem_match(arg, resolved),
        "size" => {
            let want = arg.as_u64().ok_or_else(|| StorageError::OperatorMisuse("$size expects a non-negative integer".into()))?;
            Ok(matches!(resolved, Some(Json::Array(items)) if items.len() as u64 == want))
        }
        "mod" => eval_mod(arg, resolved),
        "regex" => eval_regex(arg, None, resolved),
        "not" => Ok(!eval_condition_or_regex(arg, resolved, root)?),
        "bitsAllSet" => eval_bits(arg, resolved, |mask, value| value & mask == mask),
        "bitsAnySet" => eval_bits(arg, resolved, |mask, value| value & mask != 0),
        "bitsAllClear" => eval_bits(arg, resolved, |mask, value| value & mask == 0),
        "bitsAnyClear" => eval_bits(arg, resolved, |mask, value| value & mask != mask),
        other => Err(StorageError::OperatorMisuse(format!("unsupported operator ${other}"))),
    }
}

fn eval_condition_or_regex(arg: &Json, resolved: Option<&Json>, root: &Json) -> Result<bool> {
    if let Some(map) = arg.as_object() {
        if map.keys().any(|k| k.starts_with('$')) {
            for (op, inner) in map {
                let stripped = op.strip_prefix('$').unwrap_or(op);
                if !apply_operator(stripped, inner, resolved, root)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }
    eval_regex(arg, None, resolved)
}

fn cmp_resolved(resolved: Option<&Json>, arg: &Json) -> Ordering {
    value_cmp(resolved.unwrap_or(&Json::Null), arg)
}

fn in_check(arg: &Json, resolved: Option<&Json>) -> Result<bool> {
    let arr = arg.as_array().ok_or_else(|| StorageError::OperatorMisuse("$in/$nin expect an array".into()))?;
    Ok(match resolved {
        Some(Json::Array(items)) => {
            items.iter().any(|i| arr.iter().any(|a| deep_eq(i, a)))
                || arr.iter().any(|a| deep_eq(resolved.unwrap(), a))
        }
        Some(v) => arr.iter().any(|a| deep_eq(v, a)),
        None => arr.iter().any(|a| a.is_null()),
    })
}

fn bson_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_i64() || n.is_u64() => "int",
        Json::Number(_) => "double",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn bson_type_code(name: &str) -> Option<&'static str> {
    Some(match name {
        "1" | "double" => "double",
        "2" | "string" => "string",
        "3" | "object" => "object",
        "4" | "array" => "array",
        "8" | "bool" => "bool",
        "10" | "null" => "null",
        "16" | "18" | "int" | "long" => "int",
        _ => return None,
    })
}

fn eval_type(arg: &Json, resolved: Option<&Json>) -> Result<bool> {
    let actual = resolved.map(bson_type_name).unwrap_or("null");
    let wanted: Vec<&str> = match arg {
        Json::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
        Json::String(s) => vec![s.as_str()],
        Json::Number(n) => return Ok(bson_type_code(&n.to_string()).map_or(false, |t| t == actual)),
        _ => return Err(StorageError::OperatorMisuse("$type expects a string, number, or array".into())),
    };
    Ok(wanted.iter().any(|w| bson_type_code(w).map_or(*w == actual, |t| t == actual)))
}

fn eval_all(arg: &Json, resolved: Option<&Json>) -> Result<bool> {
    let wanted = arg.as_array().ok_or_else(|| StorageError::OperatorMisuse("$all expects an array".into()))?;
    let items = match resolved {
        Some(Json::Array(items)) => items,
        _ => return Ok(wanted.is_empty()),
    };
    Ok(wanted.iter().all(|w| items.iter().any(|i| deep_eq(i, w))))
}

fn eval_elem_match(arg: &Json, resolved: Option<&Json>) -> Result<bool> {
    let items = match resolved {
        Some(Json::Array(items)) => items,
        _ => return Ok(false),
    };
    for item in items {
        if eval_query_value(arg, item).unwrap_or(false) {
            return Ok(true);
        }
        // scalar array elements: allow operator-only sub-queries like
        // {$elemMatch: {$gt: 5}} applied directly to each element.
        if let Some(map) = arg.as_object() {
            if map.keys().all(|k| k.starts_with('$')) {
                let mut all = true;
                for (op, inner) in map {
                    let stripped = op.strip_prefix('$').unwrap_or(op);
                    if !apply_operator(stripped, inner, Some(item), item).unwrap_or(false) {
                        all = false;
                        break;
                    }
                }
                if all {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn eval_mod(arg: &Json, resolved: Option<&Json>) -> Result<bool> {
    let pair = arg.as_array().ok_or_else(|| StorageError::OperatorMisuse("$mod expects [divisor, remainder]".into()))?;
    if pair.len() != 2 {
        return Err(StorageError::OperatorMisuse("$mod expects exactly 2 elements".into()));
    }
    let divisor = pair[0].as_i64().ok_or_else(|| StorageError::OperatorMisuse("$mod divisor must be an integer".into()))?;
    let remainder = pair[1].as_i64().ok_or_else(|| StorageError::OperatorMisuse("$mod remainder must be an integer".into()))?;
    let value = match resolved.and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return Ok(false),
    };
    if divisor == 0 {
        return Err(StorageError::OperatorMisuse("$mod divisor must not be zero".into()));
    }
    Ok(value % divisor == remainder)
}

fn eval_regex(arg: &Json, options: Option<&str>, resolved: Option<&Json>) -> Result<bool> {
    let text = match resolved.and_then(|v| v.as_str()) {
        Some(s) => s,
        None => return Ok(false),
    };
    let (pattern, opts) = match arg {
        Json::String(s) => (s.clone(), options.unwrap_or("").to_string()),
        Json::Object(map) => {
            let pattern = map.get("$regex").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let opts = map.get("$options").and_then(|v| v.as_str()).unwrap_or("").to_string();
            (pattern, opts)
        }
        _ => return Err(StorageError::OperatorMisuse("$regex expects a string or {$regex,$options}".into())),
    };
    let full_pattern = if opts.contains('i') { format!("(?i){pattern}") } else { pattern };
    let re = Regex::new(&full_pattern)
        .map_err(|e| StorageError::QueryCompile(format!("invalid regex: {e}")))?;
    Ok(re.is_match(text))
}

fn eval_bits(arg: &Json, resolved: Option<&Json>, check: impl Fn(i64, i64) -> bool) -> Result<bool> {
    let value = match resolved.and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return Ok(false),
    };
    let mask = match arg {
        Json::Number(n) => n.as_i64().ok_or_else(|| StorageError::OperatorMisuse("bitwise mask must be an integer".into()))?,
        Json::Array(positions) => {
            let mut mask = 0i64;
            for p in positions {
                let bit = p.as_u64().ok_or_else(|| StorageError::OperatorMisuse("bit positions must be non-negative integers".into()))?;
                mask |= 1i64 << bit;
            }
            mask
        }
        _ => return Err(StorageError::OperatorMisuse("bitwise operators expect an integer mask or bit-position array".into())),
    };
    Ok(check(mask, value))
}

/// Strips common Latin combining diacritics for `$diacriticSensitive: false`
/// text search, without pulling in a Unicode-normalization dependency.
fn strip_diacritics(s: &str) -> String {
    const PAIRS: &[(char, char)] = &[
        ('á', 'a'), ('à', 'a'), ('â', 'a'), ('ä', 'a'), ('ã', 'a'), ('å', 'a'),
        ('é', 'e'), ('è', 'e'), ('ê', 'e'), ('ë', 'e'),
        ('í', 'i'), ('ì', 'i'), ('î', 'i'), ('ï', 'i'),
        ('ó', 'o'), ('ò', 'o'), ('ô', 'o'), ('ö', 'o'), ('õ', 'o'),
        ('ú', 'u'), ('ù', 'u'), ('û', 'u'), ('ü', 'u'),
        ('ñ', 'n'), ('ç', 'c'),
    ];
    s.chars()
        .map(|c| {
            let lower = c.to_ascii_lowercase();
            PAIRS.iter().find(|(d, _)| *d == lower).map(|(_, base)| *base).unwrap_or(c)
        })
        .collect()
}

fn collect_strings(doc: &Json, out: &mut Vec<String>) {
    match doc {
        Json::String(s) => out.push(s.clone()),
        Json::Array(items) => items.iter().for_each(|i| collect_strings(i, out)),
        Json::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn eval_text(arg: &Json, doc: &Json) -> Result<bool> {
    let map = arg.as_object().ok_or_else(|| StorageError::OperatorMisuse("$text expects an object".into()))?;
    let search = map.get("$search").and_then(|v| v.as_str()).unwrap_or("");
    let case_sensitive = map.get("$caseSensitive").and_then(|v| v.as_bool()).unwrap_or(false);
    let diacritic_sensitive = map.get("$diacriticSensitive").and_then(|v| v.as_bool()).unwrap_or(false);

    let normalize = |s: &str| -> String {
        let s = if diacritic_sensitive { s.to_string() } else { strip_diacritics(s) };
        if case_sensitive { s } else { s.to_lowercase() }
    };

    let tokens: Vec<String> = search.split_whitespace().map(normalize).filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        return Ok(true);
    }

    let mut haystacks = Vec::new();
    collect_strings(doc, &mut haystacks);
    let haystacks: Vec<String> = haystacks.iter().map(|s| normalize(s)).collect();

    Ok(tokens.iter().all(|token| haystacks.iter().any(|h| h.contains(token.as_str()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn equality_and_comparison() {
        let d = doc(json!({"age": 30}));
        assert!(eval_query(&json!({"age": 30}), &d).unwrap());
        assert!(eval_query(&json!({"age": {"$gte": 30}}), &d).unwrap());
        assert!(!eval_query(&json!({"age": {"$lt": 30}}), &d).unwrap());
    }

    #[test]
    fn array_field_applies_operator_elementwise() {
        let d = doc(json!({"tags": ["x", "y"]}));
        assert!(eval_query(&json!({"tags": "x"}), &d).unwrap());
        assert!(eval_query(&json!({"tags": {"$eq": "y"}}), &d).unwrap());
        assert!(!eval_query(&json!({"tags": {"$eq": "z"}}), &d).unwrap());
    }

    #[test]
    fn worked_or_all_example() {
        // spec.md §8 scenario 4
        let q = json!({"$or": [{"age": {"$gte": 30}}, {"tags": {"$all": ["x", "y"]}}]});
        let docs = [
            json!({"age": 29, "tags": ["x", "y"]}),
            json!({"age": 35, "tags": ["x"]}),
            json!({"age": 20, "tags": []}),
        ];
        let results: Vec<bool> = docs.iter().map(|d| eval_query(&q, &doc(d.clone())).unwrap()).collect();
        assert_eq!(results, vec![true, true, false]);
    }

    #[test]
    fn elem_match_sub_query() {
        let d = doc(json!({"items": [{"qty": 1}, {"qty": 10}]}));
        let q = json!({"items": {"$elemMatch": {"qty": {"$gt": 5}}}});
        assert!(eval_query(&q, &d).unwrap());
    }

    #[test]
    fn exists_and_type() {
        let d = doc(json!({"name": "a"}));
        assert!(eval_query(&json!({"missing": {"$exists": false}}), &d).unwrap());
        assert!(eval_query(&json!({"name": {"$type": "string"}}), &d).unwrap());
    }

    #[test]
    fn mod_operator() {
        let d = doc(json!({"n": 10}));
        assert!(eval_query(&json!({"n": {"$mod": [5, 0]}}), &d).unwrap());
        assert!(!eval_query(&json!({"n": {"$mod": [3, 0]}}), &d).unwrap());
    }

    #[test]
    fn regex_operator() {
        let d = doc(json!({"name": "Hello"}));
        assert!(eval_query(&json!({"name": {"$regex": "^hel", "$options": "i"}}), &d).unwrap());
        assert!(!eval_query(&json!({"name": {"$regex": "^xyz"}}), &d).unwrap());
    }

    #[test]
    fn text_search_is_token_and_substring() {
        let d = doc(json!({"title": "The Quick Brown Fox"}));
        assert!(eval_query(&json!({"$text": {"$search": "quick fox"}}), &d).unwrap());
        assert!(!eval_query(&json!({"$text": {"$search": "quick dog"}}), &d).unwrap());
    }

    #[test]
    fn bitwise_operators() {
        let d = doc(json!({"flags": 0b0110}));
        assert!(eval_query(&json!({"flags": {"$bitsAllSet": [1, 2]}}), &d).unwrap());
        assert!(eval_query(&json!({"flags": {"$bitsAnyClear": [0]}}), &d).unwrap());
    }
}
