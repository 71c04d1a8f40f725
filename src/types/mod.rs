//! Core data types: documents, composite keys, and BSON-style value ordering.

mod timestamp;

pub use timestamp::Timestamp;

use serde_json::Value as Json;
use std::cmp::Ordering;

/// A document is a schema-less JSON object.
pub type Document = serde_json::Map<String, Json>;

/// The locator stored in index leaves: the document's primary-key value.
pub type Locator = Json;

/// Separator byte used when encoding composite index keys (U+0000 by default).
pub const DEFAULT_SEPARATOR: u8 = 0u8;

/// BSON-style type class used to order values of differing JSON types.
/// Ascending: null < number < string < object < array < boolean < date-like.
fn type_class(v: &Json) -> u8 {
    match v {
        Json::Null => 0,
        Json::Number(_) => 1,
        Json::String(_) => 2,
        Json::Object(_) => 3,
        Json::Array(_) => 4,
        Json::Bool(_) => 5,
    }
}

/// Total ordering over JSON values following the BSON type-class rules from
/// the query engine spec: values of different classes order by class; NaN
/// compares equal to itself and less than every other number.
pub fn value_cmp(a: &Json, b: &Json) -> Ordering {
    let (ca, cb) = (type_class(a), type_class(b));
    if ca != cb {
        return ca.cmp(&cb);
    }
    match (a, b) {
        (Json::Null, Json::Null) => Ordering::Equal,
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        (Json::Number(x), Json::Number(y)) => {
            let (xf, yf) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            if xf.is_nan() && yf.is_nan() {
                Ordering::Equal
            } else if xf.is_nan() {
                Ordering::Less
            } else if yf.is_nan() {
                Ordering::Greater
            } else {
                xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
            }
        }
        (Json::String(x), Json::String(y)) => x.cmp(y),
        (Json::Array(x), Json::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let c = value_cmp(xi, yi);
                if c != Ordering::Equal {
                    return c;
                }
            }
            x.len().cmp(&y.len())
        }
        (Json::Object(x), Json::Object(y)) => {
            let mut xk: Vec<_> = x.keys().collect();
            let mut yk: Vec<_> = y.keys().collect();
            xk.sort();
            yk.sort();
            for (k, l) in xk.iter().zip(yk.iter()) {
                let c = k.cmp(l);
                if c != Ordering::Equal {
                    return c;
                }
            }
            xk.len().cmp(&yk.len())
        }
        _ => Ordering::Equal,
    }
}

/// Deep-equality per spec.md §4.5: strict-equal scalars, pointwise-equal
/// arrays/objects, with key-set equality required for objects.
pub fn deep_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Array(x), Json::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| deep_eq(p, q))
        }
        (Json::Object(x), Json::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).map_or(false, |w| deep_eq(v, w)))
        }
        _ => a == b,
    }
}

/// Resolve a dotted field path against a document, walking nested
/// objects/arrays. Returns `None` when any path segment is absent
/// ("undefined" in the spec's terms).
pub fn resolve_path<'a>(doc: &'a Json, path: &str) -> Option<&'a Json> {
    let mut cur = doc;
    for seg in path.split('.') {
        cur = match cur {
            Json::Object(map) => map.get(seg)?,
            Json::Array(arr) => {
                let idx: usize = seg.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

/// Encode a single field value into its string representation for
/// composite-key construction. `Null`/missing encodes to the empty string.
fn encode_part(v: Option<&Json>) -> String {
    match v {
        None | Some(Json::Null) => String::new(),
        Some(Json::String(s)) => s.clone(),
        Some(Json::Bool(b)) => b.to_string(),
        Some(Json::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Order-preserving string encoding of an `i64`: lexicographic order on the
/// output matches numeric order on the input. Used for single-field numeric
/// indexes (and the hidden `__ttltime` index) where `BTreeIndex`'s
/// lexicographically-ordered `BTreeMap<String, _>` would otherwise sort
/// decimal numerals like strings ("10" < "9").
pub fn encode_sortable_i64(n: i64) -> String {
    let shifted = (n as i128 - i64::MIN as i128) as u64;
    format!("{shifted:016x}")
}

/// Order-preserving string encoding of an `f64`, via the standard
/// IEEE-754 bit-flip trick (flip the sign bit for non-negatives, flip every
/// bit for negatives) so the resulting bit pattern sorts the same as the
/// float value.
pub fn encode_sortable_f64(f: f64) -> String {
    let bits = f.to_bits();
    let flipped = if f.is_sign_negative() { !bits } else { bits | 0x8000_0000_0000_0000 };
    format!("{flipped:016x}")
}

/// Order-preserving encoding for a single (non-composite) index field: falls
/// through to decimal for non-numeric values, which already sort correctly
/// within their own class (strings lexically, booleans `"false"<"true"`).
pub fn encode_sortable_part(v: Option<&Json>) -> String {
    match v {
        Some(Json::Number(n)) => {
            if let Some(i) = n.as_i64() {
                format!("n{}", encode_sortable_i64(i))
            } else {
                format!("n{}", encode_sortable_f64(n.as_f64().unwrap_or(0.0)))
            }
        }
        other => format!("s{}", encode_part(other)),
    }
}

/// Encode a composite key from per-field values, separated by `sep` with
/// backslash-escaping of any literal separator or backslash byte. Bijective:
/// `decode_composite_key(encode_composite_key(parts, sep), sep) == parts`.
pub fn encode_composite_key(parts: &[Option<&Json>], sep: u8) -> String {
    let sep_char = sep as char;
    parts
        .iter()
        .map(|p| {
            let raw = encode_part(*p);
            let mut out = String::with_capacity(raw.len());
            for c in raw.chars() {
                if c == sep_char || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out
        })
        .collect::<Vec<_>>()
        .join(&sep_char.to_string())
}

/// Decode a composite key back into its per-field string parts. The empty
/// string decodes to a single-element list containing an empty part.
pub fn decode_composite_key(key: &str, sep: u8) -> Vec<String> {
    let sep_char = sep as char;
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                cur.push(next);
            }
        } else if c == sep_char {
            parts.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    parts.push(cur);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_class_ordering() {
        assert_eq!(value_cmp(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(value_cmp(&json!(1), &json!("a")), Ordering::Less);
        assert_eq!(value_cmp(&json!("a"), &json!({"x":1})), Ordering::Less);
        assert_eq!(value_cmp(&json!({"x":1}), &json!([1])), Ordering::Less);
        assert_eq!(value_cmp(&json!([1]), &json!(true)), Ordering::Less);
    }

    #[test]
    fn nan_equals_nan() {
        let nan = Json::from(f64::NAN);
        assert_eq!(value_cmp(&nan, &nan), Ordering::Equal);
    }

    #[test]
    fn composite_key_roundtrip() {
        let a = json!("a\u{0}b");
        let b = json!(42);
        let encoded = encode_composite_key(&[Some(&a), Some(&b), None], 0);
        let parts = decode_composite_key(&encoded, 0);
        assert_eq!(parts, vec!["a\u{0}b".to_string(), "42".to_string(), "".to_string()]);
    }

    #[test]
    fn empty_string_decodes_single_null_part() {
        assert_eq!(decode_composite_key("", 0), vec!["".to_string()]);
    }

    #[test]
    fn sortable_i64_preserves_numeric_order() {
        let mut values = vec![-100i64, -1, 0, 1, 9, 10, 100, i64::MAX / 2];
        let mut pairs: Vec<(i64, String)> = values.iter().map(|v| (*v, encode_sortable_i64(*v))).collect();
        values.sort();
        pairs.sort_by(|a, b| a.1.cmp(&b.1));
        let order_by_encoding: Vec<i64> = pairs.into_iter().map(|(v, _)| v).collect();
        assert_eq!(order_by_encoding, values);
    }

    #[test]
    fn path_resolution_through_nesting() {
        let doc = json!({"a": {"b": [1, {"c": 2}]}});
        assert_eq!(resolve_path(&doc, "a.b.1.c"), Some(&json!(2)));
        assert_eq!(resolve_path(&doc, "a.missing"), None);
    }

    #[test]
    fn deep_equality() {
        assert!(deep_eq(&json!({"a":1,"b":[1,2]}), &json!({"b":[1,2],"a":1})));
        assert!(!deep_eq(&json!({"a":1}), &json!({"a":1,"b":2})));
    }
}
