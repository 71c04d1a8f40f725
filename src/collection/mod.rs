//! `Collection`: one list of documents plus its secondary indexes, the core
//! CRUD/index-maintenance surface of spec.md §4.4.
//!
//! Generalizes the teacher's `Table` + index-maintenance-hook pattern
//! (`database/indexes/*.rs`, `database/helpers.rs`) from a fixed SQL-row
//! shape to schema-less JSON documents with arbitrary index definitions.

pub mod audit;
pub mod project;

use crate::config::{CollectionConfig, IdGenerator, IndexDef, RotationSchedule};
use crate::error::{Result, StorageError};
use crate::id_gen::{self, AutoIncrementCounter, GeneratorRegistry};
use crate::index::btree::{BTreeIndex, BTreeIndexConfig};
use crate::storage::adapter::{Snapshot, StorageAdapter};
use crate::types::{self, Document, Locator};
use crate::validator::{NullValidator, ValidationOutcome, Validator};
use audit::HistoryEntry;
use project::{Projection, ProcessorRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;

const TTL_INDEX_NAME: &str = "__ttltime";

fn locator_key(v: &Json) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

/// One stored document plus its lifecycle bookkeeping. In audit mode,
/// `history` carries the structural deltas spec.md §3 describes; outside
/// audit mode it stays empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    locator: Locator,
    data: Document,
    created_ms: i64,
    updated_ms: Option<i64>,
    deleted_ms: Option<i64>,
    version: u64,
    next_version: u64,
    history: Vec<HistoryEntry>,
    inserted_at_micros: i64,
}

impl Record {
    fn is_live(&self) -> bool {
        self.deleted_ms.is_none()
    }
}

/// One list of documents with N secondary indexes, a TTL reaper, and
/// optional audit history. Owns its storage adapter exclusively (spec.md §3
/// Ownership).
pub struct Collection {
    name: String,
    primary_key_field: String,
    id_generator: IdGenerator,
    counter: AutoIncrementCounter,
    generators: Arc<GeneratorRegistry>,
    processors: Arc<ProcessorRegistry>,
    ttl_ms: Option<u64>,
    rotate: Option<RotationSchedule>,
    last_rotated_ms: Option<i64>,
    audit: bool,
    index_defs: HashMap<String, IndexDef>,
    indexes: HashMap<String, BTreeIndex>,
    ttl_index: BTreeIndex,
    order: Vec<String>,
    list: HashMap<String, Record>,
    adapter: Box<dyn StorageAdapter>,
    validator: Arc<dyn Validator>,
}

impl Collection {
    pub fn new(
        config: CollectionConfig,
        adapter: Box<dyn StorageAdapter>,
        generators: Arc<GeneratorRegistry>,
        processors: Arc<ProcessorRegistry>,
    ) -> Self {
        let mut indexes = HashMap::new();
        let mut index_defs = HashMap::new();
        for def in config.index_defs {
            indexes.insert(def.name.clone(), BTreeIndex::new(BTreeIndexConfig { unique: def.unique }));
            index_defs.insert(def.name.clone(), def);
        }
        Self {
            name: config.name,
            primary_key_field: config.primary_key_field,
            id_generator: config.id_generator,
            counter: AutoIncrementCounter::default(),
            generators,
            processors,
            ttl_ms: config.ttl_ms,
            rotate: config.rotate,
            last_rotated_ms: None,
            audit: config.audit,
            index_defs,
            indexes,
            ttl_index: BTreeIndex::new(BTreeIndexConfig { unique: false }),
            order: Vec::new(),
            list: HashMap::new(),
            adapter,
            validator: Arc::new(NullValidator),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_ttl_live(&self, record: &Record, now_micros: i64) -> bool {
        match self.ttl_ms {
            Some(ttl_ms) => now_micros - record.inserted_at_micros < ttl_ms as i64 * 1000,
            None => true,
        }
    }

    fn visible(&self, record: &Record, now_micros: i64) -> bool {
        record.is_live() && self.is_ttl_live(record, now_micros)
    }

    // ---- index maintenance (spec.md §4.4 rules 1-5) ----

    fn project_for(&self, def: &IndexDef, doc: &Document) -> Result<Option<String>> {
        match project::project(doc, def, &self.processors) {
            Projection::Key(k) => Ok(Some(k)),
            Projection::Skip => Ok(None),
            Projection::Missing => Err(StorageError::RequiredMissing(def.name.clone())),
        }
    }

    /// Rule 3: uniqueness pre-check for a single index, given the proposed
    /// new key and the locator that will own it.
    fn check_unique(&self, def: &IndexDef, new_key: &Option<String>, locator: &Locator) -> Result<()> {
        if !def.unique {
            return Ok(());
        }
        if let Some(key) = new_key {
            if let Some(existing) = self.indexes.get(&def.name).and_then(|idx| idx.find_first(key)) {
                if &existing != locator {
                    return Err(StorageError::UniqueViolation { index: def.name.clone(), key: key.clone() });
                }
            }
        }
        Ok(())
    }

    /// Pre-validates an insert against every index (rules 1-3) without
    /// mutating anything; returns the per-index keys to commit on success.
    fn precheck_insert(&self, doc: &Document, locator: &Locator) -> Result<Vec<(String, Option<String>)>> {
        let mut plan = Vec::with_capacity(self.index_defs.len());
        for def in self.index_defs.values() {
            let key = self.project_for(def, doc)?;
            self.check_unique(def, &key, locator)?;
            plan.push((def.name.clone(), key));
        }
        Ok(plan)
    }

    fn commit_insert(&mut self, plan: Vec<(String, Option<String>)>, locator: &Locator) -> Result<()> {
        for (name, key) in plan {
            if let Some(key) = key {
                self.indexes.get_mut(&name).expect("index exists").insert(key, locator.clone())?;
            }
        }
        Ok(())
    }

    /// Pre-validates an update (old doc -> new doc) against every index
    /// (rules 1-3); returns the per-index (old_key, new_key) pairs.
    fn precheck_update(
        &self,
        old: &Document,
        new: &Document,
        locator: &Locator,
    ) -> Result<Vec<(String, Option<String>, Option<String>)>> {
        let mut plan = Vec::with_capacity(self.index_defs.len());
        for def in self.index_defs.values() {
            let old_key = self.project_for(def, old)?;
            let new_key = self.project_for(def, new)?;
            if old_key != new_key {
                self.check_unique(def, &new_key, locator)?;
            }
            plan.push((def.name.clone(), old_key, new_key));
        }
        Ok(plan)
    }

    fn commit_update(
        &mut self,
        plan: Vec<(String, Option<String>, Option<String>)>,
        locator: &Locator,
    ) -> Result<()> {
        for (name, old_key, new_key) in plan {
            if old_key == new_key {
                continue;
            }
            let def = self.index_defs.get(&name).expect("index def exists");
            let idx = self.indexes.get_mut(&name).expect("index exists");
            if let Some(old_key) = old_key {
                if def.unique {
                    idx.remove(&old_key);
                } else {
                    idx.remove_specific(&old_key, |l| l == locator);
                }
            }
            if let Some(new_key) = new_key {
                idx.insert(new_key, locator.clone())?;
            }
        }
        Ok(())
    }

    fn remove_from_indexes(&mut self, doc: &Document, locator: &Locator) {
        for def in self.index_defs.values() {
            if let Ok(Some(key)) = self.project_for(def, doc) {
                if def.unique {
                    self.indexes.get_mut(&def.name).unwrap().remove(&key);
                } else {
                    self.indexes.get_mut(&def.name).unwrap().remove_specific(&key, |l| l == locator);
                }
            }
        }
    }

    // ---- id generation ----

    fn resolve_locator(&self, doc: &mut Document) -> Locator {
        match doc.get(&self.primary_key_field) {
            Some(v) if !v.is_null() => {
                if self.id_generator == IdGenerator::AutoIncrement {
                    if let Some(n) = v.as_i64() {
                        self.counter.observe(n);
                    }
                }
                v.clone()
            }
            _ => {
                let generated = id_gen::generate(self.id_generator, &self.counter, &self.generators);
                doc.insert(self.primary_key_field.clone(), generated.clone());
                generated
            }
        }
    }

    // ---- CRUD ----

    pub fn insert(&mut self, mut doc: Document) -> Result<Document> {
        let outcome: ValidationOutcome = self.validator.validate(&doc);
        if !outcome.ok {
            return Err(StorageError::ValidationFailed(outcome.errors.join("; ")));
        }
        if let Some(data) = outcome.data {
            doc = data;
        }

        let locator = self.resolve_locator(&mut doc);
        let key = locator_key(&locator);
        if self.list.contains_key(&key) {
            return Err(StorageError::UniqueViolation { index: self.primary_key_field.clone(), key });
        }

        let plan = self.precheck_insert(&doc, &locator)?;
        self.commit_insert(plan, &locator)?;

        let now_ms = types::Timestamp::now().as_millis();
        let now_micros = types::Timestamp::now().as_micros();
        let history = if self.audit {
            vec![HistoryEntry { version: 0, delta: audit::diff(&Json::Object(Default::default()), &Json::Object(doc.clone())), date_ms: now_ms }]
        } else {
            Vec::new()
        };
        let record = Record {
            locator: locator.clone(),
            data: doc.clone(),
            created_ms: now_ms,
            updated_ms: None,
            deleted_ms: None,
            version: 0,
            next_version: 1,
            history,
            inserted_at_micros: now_micros,
        };
        if self.ttl_ms.is_some() {
            self.ttl_index.insert(types::encode_sortable_i64(now_micros), locator.clone())?;
        }
        self.order.push(key.clone());
        self.list.insert(key, record);
        Ok(doc)
    }

    pub fn save(&mut self, doc: Document) -> Result<Document> {
        let locator = doc
            .get(&self.primary_key_field)
            .cloned()
            .ok_or_else(|| StorageError::RequiredMissing(self.primary_key_field.clone()))?;
        let key = locator_key(&locator);
        let old_data = self
            .list
            .get(&key)
            .filter(|r| r.is_live())
            .map(|r| r.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;

        let outcome = self.validator.validate(&doc);
        if !outcome.ok {
            return Err(StorageError::ValidationFailed(outcome.errors.join("; ")));
        }
        let new_data = outcome.data.unwrap_or(doc);

        let plan = self.precheck_update(&old_data, &new_data, &locator)?;
        self.commit_update(plan, &locator)?;

        let record = self.list.get_mut(&key).unwrap();
        record.data = new_data.clone();
        let now_ms = types::Timestamp::now().as_millis();
        record.updated_ms = Some(now_ms);
        if self.audit {
            let delta = audit::diff(&Json::Object(old_data), &Json::Object(new_data.clone()));
            record.history.push(HistoryEntry { version: record.next_version, delta, date_ms: now_ms });
            record.version = record.next_version;
            record.next_version += 1;
        }
        Ok(new_data)
    }

    /// Iterates the list in insertion order; for each document matching
    /// `predicate`, applies `patch` (merged via deep-merge when `merge` is
    /// true, otherwise a plain field assignment) and runs index maintenance.
    pub fn update(
        &mut self,
        predicate: impl Fn(&Document) -> bool,
        patch: &Document,
        merge: bool,
    ) -> Result<usize> {
        let keys: Vec<String> = self.order.clone();
        let now_micros = types::Timestamp::now().as_micros();
        let mut updated = 0;
        for key in keys {
            let (locator, old_data) = match self.list.get(&key) {
                Some(r) if self.visible(r, now_micros) && predicate(&r.data) => (r.locator.clone(), r.data.clone()),
                _ => continue,
            };
            let new_data = if merge { deep_merge(&old_data, patch) } else { assign(&old_data, patch) };

            let outcome = self.validator.validate(&new_data);
            if !outcome.ok {
                return Err(StorageError::ValidationFailed(outcome.errors.join("; ")));
            }
            let new_data = outcome.data.unwrap_or(new_data);

            let plan = self.precheck_update(&old_data, &new_data, &locator)?;
            self.commit_update(plan, &locator)?;

            let record = self.list.get_mut(&key).unwrap();
            record.data = new_data.clone();
            let now_ms = types::Timestamp::now().as_millis();
            record.updated_ms = Some(now_ms);
            if self.audit {
                let delta = audit::diff(&Json::Object(old_data), &Json::Object(new_data));
                record.history.push(HistoryEntry { version: record.next_version, delta, date_ms: now_ms });
                record.version = record.next_version;
                record.next_version += 1;
            }
            updated += 1;
        }
        Ok(updated)
    }

    /// Iterates forward; removes every document matching `predicate`. In
    /// audit mode a tombstone delta is appended and the record is retained
    /// (spec.md §3); otherwise the record is dropped outright.
    pub fn remove(&mut self, predicate: impl Fn(&Document) -> bool) -> Result<usize> {
        let keys: Vec<String> = self.order.clone();
        let now_micros = types::Timestamp::now().as_micros();
        let mut removed = 0;
        for key in keys {
            let matches = match self.list.get(&key) {
                Some(r) if self.visible(r, now_micros) && predicate(&r.data) => true,
                _ => false,
            };
            if !matches {
                continue;
            }
            self.remove_one(&key)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn remove_one(&mut self, key: &str) -> Result<()> {
        let (locator, data, inserted_at_micros) = match self.list.get(key) {
            Some(r) => (r.locator.clone(), r.data.clone(), r.inserted_at_micros),
            None => return Ok(()),
        };
        self.remove_from_indexes(&data, &locator);
        if self.ttl_ms.is_some() {
            let ttl_key = types::encode_sortable_i64(inserted_at_micros);
            self.ttl_index.remove_specific(&ttl_key, |l| l == &locator);
        }
        if self.audit {
            let record = self.list.get_mut(key).unwrap();
            let now_ms = types::Timestamp::now().as_millis();
            let delta = audit::diff(&Json::Object(data), &Json::Null);
            record.history.push(HistoryEntry { version: record.next_version, delta, date_ms: now_ms });
            record.version = record.next_version;
            record.next_version += 1;
            record.deleted_ms = Some(now_ms);
        } else {
            self.list.remove(key);
            self.order.retain(|k| k != key);
        }
        Ok(())
    }

    pub fn find_by_id(&self, id: &Json) -> Option<Document> {
        let now = types::Timestamp::now().as_micros();
        self.list.get(&locator_key(id)).filter(|r| self.visible(r, now)).map(|r| r.data.clone())
    }

    fn single_field_index(&self, field: &str) -> Result<&IndexDef> {
        self.index_defs
            .values()
            .find(|d| d.fields.len() == 1 && d.fields[0].0 == field)
            .ok_or_else(|| StorageError::IndexMissing(field.to_string()))
    }

    pub fn find_by(&self, field: &str, value: &Json) -> Result<Vec<Document>> {
        let def = self.single_field_index(field)?;
        let key = project::encode_query_value(def, value, &self.processors);
        let idx = &self.indexes[&def.name];
        let now = types::Timestamp::now().as_micros();
        Ok(idx
            .find(&key)
            .into_iter()
            .filter_map(|l| self.list.get(&locator_key(&l)))
            .filter(|r| self.visible(r, now))
            .map(|r| r.data.clone())
            .collect())
    }

    pub fn find_first_by(&self, field: &str, value: &Json) -> Result<Option<Document>> {
        let def = self.single_field_index(field)?;
        let key = project::encode_query_value(def, value, &self.processors);
        let locator = self.indexes[&def.name].find_first(&key);
        Ok(locator.and_then(|l| self.find_by_id(&l)))
    }

    pub fn find_last_by(&self, field: &str, value: &Json) -> Result<Option<Document>> {
        let def = self.single_field_index(field)?;
        let key = project::encode_query_value(def, value, &self.processors);
        let locator = self.indexes[&def.name].find_last(&key);
        Ok(locator.and_then(|l| self.find_by_id(&l)))
    }

    pub fn find(&mut self, predicate: impl Fn(&Document) -> bool) -> Vec<Document> {
        let now = types::Timestamp::now().as_micros();
        let mut any_expired = false;
        let mut out = Vec::new();
        for key in &self.order {
            if let Some(r) = self.list.get(key) {
                if !r.is_live() {
                    continue;
                }
                if !self.is_ttl_live(r, now) {
                    any_expired = true;
                    continue;
                }
                if predicate(&r.data) {
                    out.push(r.data.clone());
                }
            }
        }
        if any_expired {
            let _ = self.ensure_ttl();
        }
        out
    }

    pub fn first(&self) -> Option<Document> {
        let now = types::Timestamp::now().as_micros();
        self.order.iter().find_map(|k| self.list.get(k).filter(|r| self.visible(r, now)).map(|r| r.data.clone()))
    }

    pub fn last(&self) -> Option<Document> {
        let now = types::Timestamp::now().as_micros();
        self.order
            .iter()
            .rev()
            .find_map(|k| self.list.get(k).filter(|r| self.visible(r, now)).map(|r| r.data.clone()))
    }

    pub fn oldest(&self) -> Option<Document> {
        let now = types::Timestamp::now().as_micros();
        self.list
            .values()
            .filter(|r| self.visible(r, now))
            .min_by_key(|r| r.created_ms)
            .map(|r| r.data.clone())
    }

    pub fn latest(&self) -> Option<Document> {
        let now = types::Timestamp::now().as_micros();
        self.list
            .values()
            .filter(|r| self.visible(r, now))
            .max_by_key(|r| r.created_ms)
            .map(|r| r.data.clone())
    }

    /// Document with the smallest value of `field`. The index stores keys in
    /// value-ascending order (`project::encode_query_value`/`encode_sortable_part`
    /// never invert for storage), so a `desc`-declared index reads in the
    /// opposite direction: its `min()` is the field's *greatest* value, so
    /// `lowest` reads `max()` for it instead (spec.md §4.3's "direction desc
    /// inverts" applied at read time, per project::is_descending).
    pub fn lowest(&self, field: &str) -> Result<Option<Document>> {
        let def = self.single_field_index(field)?;
        let idx = &self.indexes[&def.name];
        let entry = if project::is_descending(def) { idx.max() } else { idx.min() };
        Ok(entry.and_then(|(_, l)| self.find_by_id(&l)))
    }

    pub fn greatest(&self, field: &str) -> Result<Option<Document>> {
        let def = self.single_field_index(field)?;
        let idx = &self.indexes[&def.name];
        let entry = if project::is_descending(def) { idx.min() } else { idx.max() };
        Ok(entry.and_then(|(_, l)| self.find_by_id(&l)))
    }

    pub fn create_index(&mut self, def: IndexDef) -> Result<()> {
        if self.index_defs.contains_key(&def.name) {
            return Err(StorageError::IndexExists(def.name));
        }
        let mut tree = BTreeIndex::new(BTreeIndexConfig { unique: def.unique });
        for key in &self.order {
            if let Some(record) = self.list.get(key) {
                if !record.is_live() {
                    continue;
                }
                match project::project(&record.data, &def, &self.processors) {
                    Projection::Key(k) => tree.insert(k, record.locator.clone())?,
                    Projection::Skip => {}
                    Projection::Missing => return Err(StorageError::RequiredMissing(def.name.clone())),
                }
            }
        }
        self.indexes.insert(def.name.clone(), tree);
        self.index_defs.insert(def.name.clone(), def);
        Ok(())
    }

    /// Removes expired documents per the `__ttltime` index's `lt(cutoff)`
    /// generator (spec.md §4.4), then persists.
    pub fn ensure_ttl(&mut self) -> Result<usize> {
        let Some(ttl_ms) = self.ttl_ms else { return Ok(0) };
        let now_micros = types::Timestamp::now().as_micros();
        let cutoff = now_micros - ttl_ms as i64 * 1000;
        let expired: Vec<Locator> =
            self.ttl_index.lt(&types::encode_sortable_i64(cutoff)).into_iter().map(|(_, l)| l).collect();
        let mut removed = 0;
        for locator in expired {
            self.remove_one(&locator_key(&locator))?;
            removed += 1;
        }
        if removed > 0 {
            self.persist(None)?;
        }
        Ok(removed)
    }

    /// Copies the collection's current snapshot into a sibling archival name
    /// `{name}.{iso_timestamp}` (spec.md §4.4 "Log rotation"), then resets
    /// this collection's documents and indexes and persists the now-empty
    /// source. Returns the sibling's name. The decision of *when* to call
    /// this is the external rotation scheduler's job (spec.md §1); this
    /// method is the operation it triggers.
    pub fn rotate_now(&mut self) -> Result<String> {
        let snapshot = self.build_snapshot()?;
        let sibling = format!("{}.{}", self.name, chrono::Utc::now().format("%Y%m%dT%H%M%S%.fZ"));
        self.adapter.store(&sibling, &snapshot)?;

        self.list.clear();
        self.order.clear();
        for idx in self.indexes.values_mut() {
            idx.reset();
        }
        self.ttl_index.reset();
        self.last_rotated_ms = Some(types::Timestamp::now().as_millis());
        self.persist(None)?;
        Ok(sibling)
    }

    /// Rotates if `rotate`'s schedule says it's due (spec.md §4.4); a no-op
    /// if the collection has no rotation schedule configured.
    pub fn maybe_rotate(&mut self) -> Result<Option<String>> {
        let Some(schedule) = self.rotate else { return Ok(None) };
        let now_ms = types::Timestamp::now().as_millis();
        if schedule.is_due(self.last_rotated_ms, now_ms) {
            Ok(Some(self.rotate_now()?))
        } else {
            Ok(None)
        }
    }

    // ---- persistence ----

    fn effective_name<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.name)
    }

    fn build_snapshot(&self) -> Result<Snapshot> {
        let live_count = self.list.values().filter(|r| r.is_live()).count();
        let hash: HashMap<String, &Record> = self.list.iter().map(|(k, v)| (k.clone(), v)).collect();
        let mut indexes_json = serde_json::Map::new();
        for (name, idx) in &self.indexes {
            indexes_json.insert(name.clone(), idx.serialize());
        }
        if self.ttl_ms.is_some() {
            indexes_json.insert(TTL_INDEX_NAME.to_string(), self.ttl_index.serialize());
        }
        let mut index_defs_json = serde_json::Map::new();
        for (name, def) in &self.index_defs {
            index_defs_json.insert(name.clone(), serde_json::to_value(def)?);
        }
        Ok(json!({
            "list": {
                "counter": self.counter.current(),
                "hash": hash,
                "_count": live_count,
                "_counter": self.counter.current(),
            },
            "indexes": indexes_json,
            "indexDefs": index_defs_json,
            "id": self.primary_key_field,
            "ttl": self.ttl_ms,
            "rotate": self.rotate.map(|r| json!({"interval_ms": r.interval_ms})),
            "lastRotatedMs": self.last_rotated_ms,
        }))
    }

    pub fn persist(&self, name: Option<&str>) -> Result<()> {
        let snapshot = self.build_snapshot()?;
        self.adapter.store(self.effective_name(name), &snapshot)
    }

    /// Stages this collection's current snapshot under `txn_id` on its own
    /// adapter, as the data half of a `Database`-driven two-phase commit
    /// (spec.md §4.6/§4.7).
    pub(crate) fn stage_for_commit(&self, txn_id: u64) -> Result<()> {
        let snapshot = self.build_snapshot()?;
        let name = self.name.clone();
        self.adapter.store_in_transaction(txn_id, &name, &snapshot)
    }

    /// Swaps out this collection's storage adapter, leaving a fresh,
    /// unrelated placeholder in its stead. Used by `Database` to borrow the
    /// adapter into a transient `{name: adapter}` map for `TransactionManager`
    /// calls, then `put_adapter` restores it afterward.
    pub(crate) fn take_adapter(&mut self) -> Box<dyn StorageAdapter> {
        std::mem::replace(&mut self.adapter, Box::new(crate::storage::adapter::MemoryAdapter::new()))
    }

    pub(crate) fn put_adapter(&mut self, adapter: Box<dyn StorageAdapter>) {
        self.adapter = adapter;
    }

    /// Clears this collection's documents and indexes, then reinserts
    /// `documents` verbatim (preserving existing primary keys, running index
    /// maintenance but not validation or audit history). Used to restore a
    /// document-level transaction snapshot on abort/rollback-to-savepoint
    /// (spec.md §4.7).
    pub fn restore_documents(&mut self, documents: Vec<Document>) -> Result<()> {
        self.list.clear();
        self.order.clear();
        for idx in self.indexes.values_mut() {
            idx.reset();
        }
        self.ttl_index.reset();
        for doc in documents {
            self.reinsert(doc)?;
        }
        Ok(())
    }

    fn reinsert(&mut self, doc: Document) -> Result<()> {
        let locator = doc.get(&self.primary_key_field).cloned().unwrap_or(Json::Null);
        if self.id_generator == IdGenerator::AutoIncrement {
            if let Some(n) = locator.as_i64() {
                self.counter.observe(n);
            }
        }
        let key = locator_key(&locator);
        let plan = self.precheck_insert(&doc, &locator)?;
        self.commit_insert(plan, &locator)?;
        let now_ms = types::Timestamp::now().as_millis();
        let now_micros = types::Timestamp::now().as_micros();
        let record = Record {
            locator: locator.clone(),
            data: doc,
            created_ms: now_ms,
            updated_ms: None,
            deleted_ms: None,
            version: 0,
            next_version: 1,
            history: Vec::new(),
            inserted_at_micros: now_micros,
        };
        if self.ttl_ms.is_some() {
            self.ttl_index.insert(types::encode_sortable_i64(now_micros), locator.clone())?;
        }
        self.order.push(key.clone());
        self.list.insert(key, record);
        Ok(())
    }

    /// Restores list, index defs, and indexes from the adapter; runs
    /// `rebuild` hooks for any index present in `index_defs` but absent from
    /// the snapshot; runs the TTL reaper. Restore errors are swallowed
    /// (spec.md §4.4) and leave the collection empty.
    pub fn load(&mut self, name: Option<&str>) -> Result<()> {
        let snapshot = match self.adapter.restore(self.effective_name(name)) {
            Ok(Some(s)) => s,
            Ok(None) => return Ok(()),
            Err(e) => {
                log::warn!("collection '{}' restore failed, starting empty: {e}", self.name);
                return Ok(());
            }
        };
        let Some(obj) = snapshot.as_object() else { return Ok(()) };

        if let Some(hash) = obj.get("list").and_then(|l| l.get("hash")).and_then(|h| h.as_object()) {
            self.list.clear();
            self.order.clear();
            let mut records: Vec<(String, Record)> = Vec::new();
            for (key, value) in hash {
                if let Ok(record) = serde_json::from_value::<Record>(value.clone()) {
                    records.push((key.clone(), record));
                }
            }
            records.sort_by_key(|(_, r)| r.created_ms);
            for (key, record) in records {
                self.order.push(key.clone());
                self.list.insert(key, record);
            }
        }
        if let Some(counter) = obj.get("list").and_then(|l| l.get("_counter")).and_then(|c| c.as_i64()) {
            self.counter.observe(counter - 1);
        }
        if let Some(last) = obj.get("lastRotatedMs").and_then(|v| v.as_i64()) {
            self.last_rotated_ms = Some(last);
        }

        let indexes_json = obj.get("indexes").and_then(|v| v.as_object()).cloned().unwrap_or_default();
        for (name, def) in self.index_defs.clone() {
            let rebuilt = match indexes_json.get(&name) {
                Some(v) => BTreeIndex::deserialize(v.clone()).ok(),
                None => None,
            };
            let tree = match rebuilt {
                Some(tree) => tree,
                None => {
                    let mut tree = BTreeIndex::new(BTreeIndexConfig { unique: def.unique });
                    for record in self.list.values().filter(|r| r.is_live()) {
                        if let Projection::Key(k) = project::project(&record.data, &def, &self.processors) {
                            let _ = tree.insert(k, record.locator.clone());
                        }
                    }
                    tree
                }
            };
            self.indexes.insert(name, tree);
        }
        if self.ttl_ms.is_some() {
            self.ttl_index = match indexes_json.get(TTL_INDEX_NAME) {
                Some(v) => BTreeIndex::deserialize(v.clone()).unwrap_or_else(|_| BTreeIndex::new(BTreeIndexConfig { unique: false })),
                None => {
                    let mut tree = BTreeIndex::new(BTreeIndexConfig { unique: false });
                    for record in self.list.values().filter(|r| r.is_live()) {
                        let _ = tree.insert(types::encode_sortable_i64(record.inserted_at_micros), record.locator.clone());
                    }
                    tree
                }
            };
        }

        self.ensure_ttl()?;
        Ok(())
    }
}

fn deep_merge(base: &Document, patch: &Document) -> Document {
    let mut out = base.clone();
    for (k, v) in patch {
        match (out.get(k).cloned(), v) {
            (Some(Json::Object(old_obj)), Json::Object(patch_obj)) => {
                out.insert(k.clone(), Json::Object(deep_merge(&old_obj, patch_obj)));
            }
            _ => {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    out
}

fn assign(base: &Document, patch: &Document) -> Document {
    let mut out = base.clone();
    for (k, v) in patch {
        out.insert(k.clone(), v.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexDef;
    use crate::storage::adapter::MemoryAdapter;
    use serde_json::json;

    fn doc(v: Json) -> Document {
        v.as_object().unwrap().clone()
    }

    fn fresh(config: CollectionConfig) -> Collection {
        Collection::new(config, Box::new(MemoryAdapter::new()), Arc::new(GeneratorRegistry::new()), Arc::new(ProcessorRegistry::new()))
    }

    #[test]
    fn insert_and_find_by_unique_index() {
        let config = CollectionConfig::new("users").with_index(IndexDef::new("by_email", "email").unique());
        let mut coll = fresh(config);
        coll.insert(doc(json!({"id": 1, "email": "a@x"}))).unwrap();
        coll.insert(doc(json!({"id": 2, "email": "b@x"}))).unwrap();
        let err = coll.insert(doc(json!({"id": 3, "email": "a@x"}))).unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { .. }));
        assert_eq!(coll.find_first_by("email", &json!("b@x")).unwrap().unwrap()["id"], json!(2));
    }

    #[test]
    fn auto_increment_assigns_primary_key() {
        let mut coll = fresh(CollectionConfig::new("things"));
        let a = coll.insert(doc(json!({}))).unwrap();
        let b = coll.insert(doc(json!({}))).unwrap();
        assert_ne!(a["id"], b["id"]);
    }

    #[test]
    fn update_merges_patch_by_default() {
        let mut coll = fresh(CollectionConfig::new("acct"));
        coll.insert(doc(json!({"id": 1, "balance": 100, "name": "a"}))).unwrap();
        let patch = doc(json!({"balance": 50}));
        coll.update(|d| d["id"] == json!(1), &patch, true).unwrap();
        let found = coll.find_by_id(&json!(1)).unwrap();
        assert_eq!(found["balance"], json!(50));
        assert_eq!(found["name"], json!("a"));
    }

    #[test]
    fn remove_drops_document_outside_audit_mode() {
        let mut coll = fresh(CollectionConfig::new("items"));
        coll.insert(doc(json!({"id": 1}))).unwrap();
        let removed = coll.remove(|d| d["id"] == json!(1)).unwrap();
        assert_eq!(removed, 1);
        assert!(coll.find_by_id(&json!(1)).is_none());
    }

    #[test]
    fn audit_mode_retains_tombstone_and_history() {
        let mut coll = fresh(CollectionConfig::new("items").with_audit());
        coll.insert(doc(json!({"id": 1, "a": 1}))).unwrap();
        coll.save(doc(json!({"id": 1, "a": 2}))).unwrap();
        coll.remove(|d| d["id"] == json!(1)).unwrap();
        assert!(coll.find_by_id(&json!(1)).is_none());
        let record = coll.list.get(&locator_key(&json!(1))).unwrap();
        assert_eq!(record.history.len(), 3);
        assert_eq!(audit::fold(&record.history[..2]), json!({"id": 1, "a": 2}));
    }

    #[test]
    fn ttl_reaper_evicts_expired_documents() {
        let mut coll = fresh(CollectionConfig::new("sessions").with_ttl(1));
        coll.insert(doc(json!({"id": 1}))).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let removed = coll.ensure_ttl().unwrap();
        assert_eq!(removed, 1);
        assert!(coll.find_by_id(&json!(1)).is_none());
    }

    #[test]
    fn create_index_populates_from_existing_list() {
        let mut coll = fresh(CollectionConfig::new("users"));
        coll.insert(doc(json!({"id": 1, "email": "a@x"}))).unwrap();
        coll.create_index(IndexDef::new("by_email", "email").unique()).unwrap();
        assert_eq!(coll.find_first_by("email", &json!("a@x")).unwrap().unwrap()["id"], json!(1));
        let err = coll.create_index(IndexDef::new("by_email", "email")).unwrap_err();
        assert!(matches!(err, StorageError::IndexExists(_)));
    }

    #[test]
    fn persist_then_load_round_trips_documents_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectionConfig::new("users").with_index(IndexDef::new("by_email", "email").unique());
        let mut coll = Collection::new(
            config.clone(),
            Box::new(crate::storage::adapter::FileAdapter::new(dir.path()).unwrap()),
            Arc::new(GeneratorRegistry::new()),
            Arc::new(ProcessorRegistry::new()),
        );
        coll.insert(doc(json!({"id": 1, "email": "a@x"}))).unwrap();
        coll.persist(None).unwrap();

        let mut reloaded = Collection::new(
            config,
            Box::new(crate::storage::adapter::FileAdapter::new(dir.path()).unwrap()),
            Arc::new(GeneratorRegistry::new()),
            Arc::new(ProcessorRegistry::new()),
        );
        reloaded.load(None).unwrap();
        assert_eq!(reloaded.find_by_id(&json!(1)).unwrap()["email"], json!("a@x"));
        assert_eq!(reloaded.find_first_by("email", &json!("a@x")).unwrap().unwrap()["id"], json!(1));
    }

    #[test]
    fn rotate_now_archives_documents_into_sibling_and_resets_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut coll = Collection::new(
            CollectionConfig::new("events").with_rotation(60_000),
            Box::new(crate::storage::adapter::FileAdapter::new(dir.path()).unwrap()),
            Arc::new(GeneratorRegistry::new()),
            Arc::new(ProcessorRegistry::new()),
        );
        coll.insert(doc(json!({"id": 1}))).unwrap();
        let sibling = coll.rotate_now().unwrap();
        assert!(sibling.starts_with("events."));
        assert!(coll.find_by_id(&json!(1)).is_none());
        assert_eq!(coll.find(|_| true).len(), 0);

        let restored = crate::storage::adapter::FileAdapter::new(dir.path()).unwrap().restore(&sibling).unwrap();
        assert!(restored.unwrap()["list"]["hash"].as_object().unwrap().len() == 1);
    }

    #[test]
    fn maybe_rotate_is_a_no_op_without_a_schedule() {
        let mut coll = fresh(CollectionConfig::new("events"));
        coll.insert(doc(json!({"id": 1}))).unwrap();
        assert!(coll.maybe_rotate().unwrap().is_none());
        assert!(coll.find_by_id(&json!(1)).is_some());
    }

    #[test]
    fn find_by_folds_query_value_through_ignore_case_index() {
        let config = CollectionConfig::new("users").with_index(IndexDef::new("by_email", "email").ignore_case());
        let mut coll = fresh(config);
        coll.insert(doc(json!({"id": 1, "email": "A@X.com"}))).unwrap();
        assert_eq!(coll.find_first_by("email", &json!("A@X.com")).unwrap().unwrap()["id"], json!(1));
        assert_eq!(coll.find_by("email", &json!("A@X.com")).unwrap().len(), 1);
    }

    #[test]
    fn lowest_and_greatest_use_numeric_ordering() {
        let config = CollectionConfig::new("scores").with_index(IndexDef::new("by_score", "score"));
        let mut coll = fresh(config);
        coll.insert(doc(json!({"id": 1, "score": 10}))).unwrap();
        coll.insert(doc(json!({"id": 2, "score": 9}))).unwrap();
        assert_eq!(coll.lowest("score").unwrap().unwrap()["id"], json!(2));
        assert_eq!(coll.greatest("score").unwrap().unwrap()["id"], json!(1));
    }

    #[test]
    fn lowest_and_greatest_invert_for_a_descending_index() {
        let config = CollectionConfig::new("scores").with_index(IndexDef::new("by_score", "score").desc());
        let mut coll = fresh(config);
        coll.insert(doc(json!({"id": 1, "score": 10}))).unwrap();
        coll.insert(doc(json!({"id": 2, "score": 9}))).unwrap();
        // A desc-declared index's own order runs largest-first, so "lowest"
        // (first in the index's order) is the highest score and "greatest"
        // (last in the index's order) is the lowest score.
        assert_eq!(coll.lowest("score").unwrap().unwrap()["id"], json!(1));
        assert_eq!(coll.greatest("score").unwrap().unwrap()["id"], json!(2));
    }
}
