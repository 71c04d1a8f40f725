//! Ordered index mapping a composite index key to one or more record
//! locators (primary-key values), backed by an in-memory `BTreeMap`.
//!
//! The teacher's B+Tree (`motedb::index::btree`) is a disk-paged structure
//! keyed on fixed `u64`s; this store's keys are arbitrary BSON-typed,
//! possibly-composite values, so the on-disk page format doesn't fit. This
//! index keeps the teacher's *contract* — insert/remove/find/range
//! generators/min/max/size/reset, deterministic serialize/deserialize,
//! config-driven uniqueness — over a `BTreeMap<String, Vec<Locator>>`, with
//! the encoded composite key as the map key.

use crate::error::{Result, StorageError};
use crate::types::Locator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BTreeIndexConfig {
    pub unique: bool,
}

impl Default for BTreeIndexConfig {
    fn default() -> Self {
        Self { unique: false }
    }
}

/// An inclusive/exclusive bound used by the range generators.
#[derive(Debug, Clone)]
pub enum RangeBound {
    Unbounded,
    Inclusive(String),
    Exclusive(String),
}

/// Ordered map from an encoded index key to the locators stored under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BTreeIndex {
    config: BTreeIndexConfig,
    entries: BTreeMap<String, Vec<Locator>>,
}

impl BTreeIndex {
    pub fn new(config: BTreeIndexConfig) -> Self {
        Self { config, entries: BTreeMap::new() }
    }

    pub fn is_unique(&self) -> bool {
        self.config.unique
    }

    /// Insert `locator` under `key`. Unique indexes reject a second locator
    /// under an existing key; non-unique indexes append.
    pub fn insert(&mut self, key: String, locator: Locator) -> Result<()> {
        let slot = self.entries.entry(key.clone()).or_insert_with(Vec::new);
        if self.config.unique && !slot.is_empty() && slot[0] != locator {
            return Err(StorageError::UniqueViolation { index: String::new(), key });
        }
        if !slot.contains(&locator) {
            slot.push(locator);
        }
        Ok(())
    }

    /// Delete every locator under `key`.
    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Delete only the locators under `key` for which `predicate` holds,
    /// dropping the key entirely once it is empty.
    pub fn remove_specific(&mut self, key: &str, predicate: impl Fn(&Locator) -> bool) {
        if let Some(slot) = self.entries.get_mut(key) {
            slot.retain(|l| !predicate(l));
            if slot.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    pub fn find(&self, key: &str) -> Vec<Locator> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    pub fn find_first(&self, key: &str) -> Option<Locator> {
        self.entries.get(key).and_then(|v| v.first().cloned())
    }

    pub fn find_last(&self, key: &str) -> Option<Locator> {
        self.entries.get(key).and_then(|v| v.last().cloned())
    }

    /// Keys strictly less than `key`, ascending.
    pub fn lt(&self, key: &str) -> Vec<(String, Locator)> {
        self.entries
            .range(..key.to_string())
            .flat_map(|(k, v)| v.iter().map(move |l| (k.clone(), l.clone())))
            .collect()
    }

    /// Keys less than or equal to `key`, ascending.
    pub fn lte(&self, key: &str) -> Vec<(String, Locator)> {
        self.entries
            .range(..=key.to_string())
            .flat_map(|(k, v)| v.iter().map(move |l| (k.clone(), l.clone())))
            .collect()
    }

    /// Keys strictly greater than `key`, ascending.
    pub fn gt(&self, key: &str) -> Vec<(String, Locator)> {
        self.entries
            .range((std::ops::Bound::Excluded(key.to_string()), std::ops::Bound::Unbounded))
            .flat_map(|(k, v)| v.iter().map(move |l| (k.clone(), l.clone())))
            .collect()
    }

    /// Keys greater than or equal to `key`, ascending.
    pub fn gte(&self, key: &str) -> Vec<(String, Locator)> {
        self.entries
            .range(key.to_string()..)
            .flat_map(|(k, v)| v.iter().map(move |l| (k.clone(), l.clone())))
            .collect()
    }

    /// Combined lower/upper bound scan, e.g. for a compound `$gte`+`$lt`
    /// range filter compiled against a single index.
    pub fn range(&self, lower: RangeBound, upper: RangeBound) -> Vec<(String, Locator)> {
        use std::ops::Bound;
        let lower_bound = match lower {
            RangeBound::Unbounded => Bound::Unbounded,
            RangeBound::Inclusive(k) => Bound::Included(k),
            RangeBound::Exclusive(k) => Bound::Excluded(k),
        };
        let upper_bound = match upper {
            RangeBound::Unbounded => Bound::Unbounded,
            RangeBound::Inclusive(k) => Bound::Included(k),
            RangeBound::Exclusive(k) => Bound::Excluded(k),
        };
        self.entries
            .range((lower_bound, upper_bound))
            .flat_map(|(k, v)| v.iter().map(move |l| (k.clone(), l.clone())))
            .collect()
    }

    /// Forward (`asc=true`) or backward traversal over every `(key, locator)`
    /// pair.
    pub fn each(&self, asc: bool) -> Vec<(String, Locator)> {
        let mut all: Vec<(String, Locator)> = self
            .entries
            .iter()
            .flat_map(|(k, v)| v.iter().map(move |l| (k.clone(), l.clone())))
            .collect();
        if !asc {
            all.reverse();
        }
        all
    }

    pub fn min(&self) -> Option<(String, Locator)> {
        self.entries.iter().next().and_then(|(k, v)| v.first().map(|l| (k.clone(), l.clone())))
    }

    pub fn max(&self) -> Option<(String, Locator)> {
        self.entries.iter().next_back().and_then(|(k, v)| v.last().map(|l| (k.clone(), l.clone())))
    }

    /// Number of distinct `(key, locator)` pairs.
    pub fn size(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Deterministic snapshot suitable for the collection/manifest
    /// serialization formats (spec.md §4.3).
    pub fn serialize(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn deserialize(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_rejects_duplicate_key() {
        let mut idx = BTreeIndex::new(BTreeIndexConfig { unique: true });
        idx.insert("a".into(), json!(1)).unwrap();
        let err = idx.insert("a".into(), json!(2)).unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { .. }));
    }

    #[test]
    fn non_unique_appends() {
        let mut idx = BTreeIndex::new(BTreeIndexConfig::default());
        idx.insert("a".into(), json!(1)).unwrap();
        idx.insert("a".into(), json!(2)).unwrap();
        assert_eq!(idx.find("a").len(), 2);
    }

    #[test]
    fn range_generators_ascending() {
        let mut idx = BTreeIndex::new(BTreeIndexConfig::default());
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            idx.insert(k.into(), json!(v)).unwrap();
        }
        assert_eq!(idx.lt("c").len(), 2);
        assert_eq!(idx.gte("b").len(), 2);
        assert_eq!(idx.min().unwrap().0, "a");
        assert_eq!(idx.max().unwrap().0, "c");
    }

    #[test]
    fn range_with_inclusive_and_exclusive_bounds() {
        let mut idx = BTreeIndex::new(BTreeIndexConfig::default());
        for (k, v) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            idx.insert(k.into(), json!(v)).unwrap();
        }
        let result = idx.range(RangeBound::Inclusive("b".into()), RangeBound::Exclusive("d".into()));
        let keys: Vec<&str> = result.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn remove_specific_drops_empty_key() {
        let mut idx = BTreeIndex::new(BTreeIndexConfig::default());
        idx.insert("a".into(), json!(1)).unwrap();
        idx.remove_specific("a", |l| l == &json!(1));
        assert_eq!(idx.find("a").len(), 0);
        assert_eq!(idx.size(), 0);
    }

    #[test]
    fn serialize_roundtrip() {
        let mut idx = BTreeIndex::new(BTreeIndexConfig { unique: true });
        idx.insert("a".into(), json!(1)).unwrap();
        let snap = idx.serialize();
        let restored = BTreeIndex::deserialize(snap).unwrap();
        assert_eq!(restored.find("a"), idx.find("a"));
        assert!(restored.is_unique());
    }
}
