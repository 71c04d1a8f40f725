//! `Database`: the top-level handle owning a set of registered collections,
//! the manifest, the write-ahead log, and document-level transactions with
//! savepoints (spec.md §4.7).
//!
//! Generalizes the teacher's `MoteDB` (`database/core.rs`): an Arc-free,
//! single-owner struct holding one `WalTransactionManager` instead of a
//! `TransactionCoordinator` plus per-kind `DashMap` index registries, because
//! this store has exactly one index family (`BTreeIndex`, owned per-`Collection`)
//! rather than the teacher's vector/spatial/text/column index zoo. The
//! teacher's manifest-driven `TableRegistry` becomes `manifest.rs` plus the
//! `collections: HashMap<String, Collection>` field here.

use crate::collection::project::ProcessorRegistry;
use crate::collection::Collection;
use crate::config::{CollectionConfig, DbConfig};
use crate::error::{Result, StorageError};
use crate::id_gen::GeneratorRegistry;
use crate::manifest::{Manifest, ManifestEntry};
use crate::storage::adapter::{FileAdapter, MemoryAdapter, StorageAdapter};
use crate::txn::manager::{IsolationLevel, Savepoint, WalTransactionManager};
use crate::txn::wal::{FileWal, MemoryWal, WriteAheadLog};
use crate::types::Document;
use crate::validator::Validator;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const MEMORY_ROOT: &str = ":memory:";

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Where a `Database`'s data lives. `Memory` never writes a manifest or WAL
/// file, matching spec.md §6's `root == ":memory:"` sentinel.
#[derive(Debug, Clone)]
enum Root {
    Memory,
    Disk(PathBuf),
}

impl Root {
    fn from_str(root: &str) -> Self {
        if root == MEMORY_ROOT {
            Root::Memory
        } else {
            Root::Disk(PathBuf::from(root))
        }
    }

    fn make_adapter(&self, collection_name: &str) -> Result<Box<dyn StorageAdapter>> {
        match self {
            Root::Memory => Ok(Box::new(MemoryAdapter::new())),
            Root::Disk(path) => Ok(Box::new(FileAdapter::new(path.join(collection_name))?)),
        }
    }

    fn adapter_kind(&self) -> &'static str {
        match self {
            Root::Memory => "memory",
            Root::Disk(_) => "file",
        }
    }

    /// The root string actually backing one collection's adapter: the bare
    /// sentinel for `Memory`, or the per-collection subdirectory `FileAdapter`
    /// was opened against for `Disk` (see [`Root::make_adapter`]).
    fn collection_root_str(&self, collection_name: &str) -> String {
        match self {
            Root::Memory => MEMORY_ROOT.to_string(),
            Root::Disk(path) => path.join(collection_name).to_string_lossy().into_owned(),
        }
    }
}

/// A point-in-time "what's active right now" snapshot of one in-flight
/// transaction. `snapshot` is document-level and authoritative for
/// abort/rollback (spec.md §9); `affected` tracks which collections were
/// touched so commit/abort only need to stage/restore those.
struct ActiveTransaction {
    id: u64,
    snapshot: HashMap<String, Vec<Document>>,
    affected: HashSet<String>,
}

/// Caller-visible summary of a savepoint, without the bulky document
/// snapshot.
#[derive(Debug, Clone)]
pub struct SavepointInfo {
    pub id: u64,
    pub name: String,
    pub timestamp_ms: i64,
}

impl From<&Savepoint> for SavepointInfo {
    fn from(s: &Savepoint) -> Self {
        Self { id: s.id, name: s.name.clone(), timestamp_ms: s.timestamp_ms }
    }
}

/// The embeddable collection store's top-level handle.
///
/// Owns every registered `Collection` directly (no `Arc<RwLock<_>>`
/// indirection): spec.md §5's single-threaded cooperative model means a
/// `Database` is driven by one logical owner at a time, so `&mut self`
/// already gives the exclusivity a real lock would otherwise provide.
pub struct Database {
    name: String,
    root: Root,
    collections: HashMap<String, Collection>,
    wal: Arc<dyn WriteAheadLog>,
    txn_manager: WalTransactionManager,
    active_txn: Option<ActiveTransaction>,
    savepoints: HashMap<u64, Savepoint>,
    savepoint_order: Vec<u64>,
    next_savepoint_id: AtomicU64,
    generators: Arc<GeneratorRegistry>,
    processors: Arc<ProcessorRegistry>,
    config: DbConfig,
}

impl Database {
    fn manifest_path(&self) -> Option<PathBuf> {
        match &self.root {
            Root::Memory => None,
            Root::Disk(path) => Some(Manifest::path_for(path, &self.name)),
        }
    }

    fn wal_path(root: &Root, name: &str) -> Option<PathBuf> {
        match root {
            Root::Memory => None,
            Root::Disk(path) => Some(path.join(format!("{name}.wal"))),
        }
    }

    fn new_internal(
        name: String,
        root_enum: Root,
        generators: Arc<GeneratorRegistry>,
        processors: Arc<ProcessorRegistry>,
        config: DbConfig,
    ) -> Result<Self> {
        let wal: Arc<dyn WriteAheadLog> = match Self::wal_path(&root_enum, &name) {
            Some(path) => Arc::new(FileWal::open_with_config(path, config.wal_config.clone())?),
            None => Arc::new(MemoryWal::new()),
        };
        Ok(Self {
            name,
            root: root_enum,
            collections: HashMap::new(),
            wal: wal.clone(),
            txn_manager: WalTransactionManager::new(wal),
            active_txn: None,
            savepoints: HashMap::new(),
            savepoint_order: Vec::new(),
            next_savepoint_id: AtomicU64::new(1),
            generators,
            processors,
            config,
        })
    }

    /// Creates a brand-new, empty database at `root` (`":memory:"` for a
    /// pure in-memory instance). Fails if a manifest already exists there —
    /// use [`Database::open`] to reconnect to an existing one.
    pub fn create(
        name: impl Into<String>,
        root: &str,
        generators: Arc<GeneratorRegistry>,
        processors: Arc<ProcessorRegistry>,
        config: DbConfig,
    ) -> Result<Self> {
        let name = name.into();
        let root_enum = Root::from_str(root);
        if let Root::Disk(p) = &root_enum {
            let path = Manifest::path_for(p, &name);
            if path.exists() {
                return Err(StorageError::CollectionExists(format!(
                    "database '{name}' already has a manifest at {}",
                    path.display()
                )));
            }
        }
        Self::new_internal(name, root_enum, generators, processors, config)
    }

    /// Reconnects to a database at `root`: reads the manifest (if any),
    /// reconstructs every registered collection from its adapter, and —
    /// unless `config.auto_recovery` is false — finishes any transaction the
    /// WAL considers committed but whose adapters never completed
    /// `finalize_commit` (a crash between promoting one collection's staged
    /// snapshot and the next).
    pub fn open(
        name: impl Into<String>,
        root: &str,
        generators: Arc<GeneratorRegistry>,
        processors: Arc<ProcessorRegistry>,
        config: DbConfig,
    ) -> Result<Self> {
        let name = name.into();
        let root_enum = Root::from_str(root);
        let auto_recovery = config.auto_recovery;
        let mut db = Self::new_internal(name, root_enum, generators, processors, config)?;

        if let Some(path) = db.manifest_path() {
            if let Some(manifest) = Manifest::read(&path)? {
                for entry in manifest.collections.values() {
                    db.register_collection(entry.to_config())?;
                }
            }
        }

        if auto_recovery {
            db.recover()?;
        }
        Ok(db)
    }

    /// Finishes any transaction the WAL considers committed but whose
    /// adapters never completed `finalize_commit`, and rolls back any
    /// staged-but-discarded transaction's adapter state. Since collections
    /// persist whole snapshots rather than per-document deltas, reloading
    /// each collection from its (now-finalized) live snapshot is the
    /// complete redo step — there is no further document-level replay to
    /// perform.
    fn recover(&mut self) -> Result<()> {
        let report = self.wal.recover()?;
        for coll in self.collections.values_mut() {
            let adapter = coll.take_adapter();
            for txn_id in &report.committed_txns {
                let _ = adapter.finalize_commit(*txn_id);
            }
            for txn_id in &report.discarded_txns {
                let _ = adapter.rollback(*txn_id);
            }
            coll.put_adapter(adapter);
            coll.load(None)?;
        }
        Ok(())
    }

    /// Registers a new collection (or, on reconnect, reconstructs one from
    /// its manifest entry): builds its adapter, loads any existing snapshot,
    /// and persists the manifest (disk-backed databases only).
    pub fn register_collection(&mut self, config: CollectionConfig) -> Result<()> {
        if self.collections.contains_key(&config.name) {
            return Err(StorageError::CollectionExists(config.name));
        }
        let adapter = self.root.make_adapter(&config.name)?;
        let name = config.name.clone();
        let mut collection = Collection::new(config.clone(), adapter, self.generators.clone(), self.processors.clone());
        collection.load(None)?;
        self.collections.insert(name, collection);
        self.persist_manifest(&config)?;
        Ok(())
    }

    /// Same as [`Self::register_collection`] but layers a schema validator
    /// onto the new collection (spec.md §9's pluggable validator capability).
    pub fn register_collection_with_validator(
        &mut self,
        config: CollectionConfig,
        validator: Arc<dyn Validator>,
    ) -> Result<()> {
        if self.collections.contains_key(&config.name) {
            return Err(StorageError::CollectionExists(config.name));
        }
        let adapter = self.root.make_adapter(&config.name)?;
        let name = config.name.clone();
        let mut collection =
            Collection::new(config.clone(), adapter, self.generators.clone(), self.processors.clone())
                .with_validator(validator);
        collection.load(None)?;
        self.collections.insert(name, collection);
        self.persist_manifest(&config)?;
        Ok(())
    }

    fn persist_manifest(&self, just_registered: &CollectionConfig) -> Result<()> {
        let Some(path) = self.manifest_path() else { return Ok(()) };
        let mut manifest = Manifest::read(&path)?.unwrap_or_default();
        let root = self.root.collection_root_str(&just_registered.name);
        let entry = ManifestEntry::from_config(just_registered, &root, self.root.adapter_kind());
        manifest.collections.insert(just_registered.name.clone(), entry);
        manifest.write_atomic(&path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections.get(name).ok_or_else(|| StorageError::CollectionMissing(name.to_string()))
    }

    pub fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.collections.get_mut(name).ok_or_else(|| StorageError::CollectionMissing(name.to_string()))
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    // ---- transaction-aware mutation helpers ----

    /// Marks `collection_name` as touched by the active transaction, so
    /// commit/abort know to stage/restore it. No-op outside a transaction.
    fn mark_affected(&mut self, collection_name: &str) -> Result<()> {
        if let Some(active) = self.active_txn.as_mut() {
            if active.affected.insert(collection_name.to_string()) {
                self.txn_manager.manager.record_resource(active.id, collection_name)?;
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, collection_name: &str, doc: Document) -> Result<Document> {
        let result = self.collection_mut(collection_name)?.insert(doc)?;
        self.mark_affected(collection_name)?;
        self.persist_if_untransacted(collection_name)?;
        Ok(result)
    }

    pub fn save(&mut self, collection_name: &str, doc: Document) -> Result<Document> {
        let result = self.collection_mut(collection_name)?.save(doc)?;
        self.mark_affected(collection_name)?;
        self.persist_if_untransacted(collection_name)?;
        Ok(result)
    }

    pub fn update(
        &mut self,
        collection_name: &str,
        predicate: impl Fn(&Document) -> bool,
        patch: &Document,
        merge: bool,
    ) -> Result<usize> {
        let result = self.collection_mut(collection_name)?.update(predicate, patch, merge)?;
        if result > 0 {
            self.mark_affected(collection_name)?;
            self.persist_if_untransacted(collection_name)?;
        }
        Ok(result)
    }

    pub fn remove(&mut self, collection_name: &str, predicate: impl Fn(&Document) -> bool) -> Result<usize> {
        let result = self.collection_mut(collection_name)?.remove(predicate)?;
        if result > 0 {
            self.mark_affected(collection_name)?;
            self.persist_if_untransacted(collection_name)?;
        }
        Ok(result)
    }

    /// Durably writes `collection_name`'s current snapshot to its adapter,
    /// unless a transaction is active — transactional writes are instead
    /// staged and finalized by `commit_transaction`'s two-phase commit, so
    /// persisting here too would race an uncommitted mutation onto disk.
    fn persist_if_untransacted(&mut self, collection_name: &str) -> Result<()> {
        if self.in_transaction() {
            return Ok(());
        }
        self.collection_mut(collection_name)?.persist(None)
    }

    // ---- transactions (spec.md §4.7) ----

    pub fn in_transaction(&self) -> bool {
        self.active_txn.is_some()
    }

    /// Starts the database's one allowed active transaction. Snapshots every
    /// registered collection's live documents up front (deep copies) so
    /// abort/rollback-to-savepoint never need to consult the WAL or adapters
    /// for document state.
    pub fn start_transaction(&mut self, timeout_ms: Option<u64>, isolation: Option<IsolationLevel>) -> Result<u64> {
        if self.active_txn.is_some() {
            return Err(StorageError::TransactionStateError(
                "a transaction is already active on this database".into(),
            ));
        }
        let txn_id = self.txn_manager.begin(timeout_ms, isolation)?;
        let mut snapshot = HashMap::with_capacity(self.collections.len());
        for (name, coll) in self.collections.iter_mut() {
            snapshot.insert(name.clone(), coll.find(|_| true));
        }
        self.active_txn = Some(ActiveTransaction { id: txn_id, snapshot, affected: HashSet::new() });
        Ok(txn_id)
    }

    fn take_active(&mut self) -> Result<ActiveTransaction> {
        self.active_txn
            .take()
            .ok_or_else(|| StorageError::TransactionStateError("no active transaction".into()))
    }

    fn borrow_adapters(&mut self, names: &HashSet<String>) -> HashMap<String, Box<dyn StorageAdapter>> {
        let mut out = HashMap::with_capacity(names.len());
        for name in names {
            if let Some(coll) = self.collections.get_mut(name) {
                out.insert(name.clone(), coll.take_adapter());
            }
        }
        out
    }

    fn return_adapters(&mut self, adapters: HashMap<String, Box<dyn StorageAdapter>>) {
        for (name, adapter) in adapters {
            if let Some(coll) = self.collections.get_mut(&name) {
                coll.put_adapter(adapter);
            }
        }
    }

    fn discard_savepoints_for(&mut self, txn_id: u64) {
        self.savepoints.retain(|_, sp| sp.txn_id != txn_id);
        let live = &self.savepoints;
        self.savepoint_order.retain(|id| live.contains_key(id));
    }

    /// Rolls back the active transaction: restores every touched
    /// collection's documents from the pre-transaction snapshot, discards
    /// the transaction's savepoints, and rolls back the 2PC coordinator
    /// (which discards any staged-but-unpromoted adapter snapshots).
    pub fn abort_transaction(&mut self) -> Result<()> {
        let active = self.take_active()?;
        self.discard_savepoints_for(active.id);
        for name in &active.affected {
            if let (Some(docs), Some(coll)) = (active.snapshot.get(name), self.collections.get_mut(name)) {
                coll.restore_documents(docs.clone())?;
            }
        }
        let adapters = self.borrow_adapters(&active.affected);
        let result = self.txn_manager.rollback(active.id, &adapters);
        self.return_adapters(adapters);
        result
    }

    /// Commits the active transaction: stages every touched collection's
    /// current snapshot, runs two-phase commit across their adapters, and
    /// discards the transaction's savepoints.
    pub fn commit_transaction(&mut self) -> Result<()> {
        let active = self.take_active()?;
        self.discard_savepoints_for(active.id);
        for name in &active.affected {
            if let Some(coll) = self.collections.get(name) {
                coll.stage_for_commit(active.id)?;
            }
        }
        let adapters = self.borrow_adapters(&active.affected);
        let result = self.txn_manager.commit(active.id, &adapters);
        self.return_adapters(adapters);
        result
    }

    /// Drops every transaction whose timeout has elapsed (spec.md §4.6),
    /// rolling each back at the 2PC coordinator. `Database` only ever tracks
    /// one active transaction, so this mainly guards against a caller
    /// holding a `Database` open past `config.transaction_timeout_ms`
    /// without calling commit/abort.
    pub fn cleanup_expired(&mut self) -> Vec<u64> {
        let names: HashSet<String> = self.collections.keys().cloned().collect();
        let adapters = self.borrow_adapters(&names);
        let expired = self.txn_manager.manager.cleanup(&adapters);
        self.return_adapters(adapters);
        if let Some(active) = &self.active_txn {
            if expired.contains(&active.id) {
                self.active_txn = None;
            }
        }
        expired
    }

    // ---- savepoints (spec.md §4.7) ----

    /// Creates a savepoint within the active transaction. `name` must be
    /// unique among the transaction's currently-live savepoints.
    pub fn create_savepoint(&mut self, name: &str) -> Result<u64> {
        let txn_id = self
            .active_txn
            .as_ref()
            .ok_or_else(|| StorageError::TransactionStateError("no active transaction".into()))?
            .id;
        if self.savepoints.values().any(|s| s.name == name) {
            return Err(StorageError::OperatorMisuse(format!("savepoint '{name}' already exists")));
        }

        let mut snapshot = HashMap::with_capacity(self.collections.len());
        for (cname, coll) in self.collections.iter_mut() {
            snapshot.insert(cname.clone(), coll.find(|_| true));
        }
        let id = self.next_savepoint_id.fetch_add(1, Ordering::SeqCst);
        let savepoint = Savepoint {
            id,
            name: name.to_string(),
            timestamp_ms: now_ms(),
            txn_id,
            document_snapshot: snapshot
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().map(serde_json::Value::Object).collect()))
                .collect(),
            index_deltas: Vec::new(),
        };
        self.savepoints.insert(id, savepoint);
        self.savepoint_order.push(id);
        Ok(id)
    }

    /// Restores every collection present in the target savepoint's document
    /// snapshot, then discards every savepoint created after it (spec.md §8's
    /// chronology invariant) — the target savepoint itself survives, so
    /// further nested rollbacks remain possible.
    pub fn rollback_to_savepoint(&mut self, id: u64) -> Result<()> {
        if self.active_txn.is_none() {
            return Err(StorageError::TransactionStateError("no active transaction".into()));
        }
        let target = self
            .savepoints
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("savepoint {id}")))?;

        for (cname, docs) in &target.document_snapshot {
            if let Some(coll) = self.collections.get_mut(cname) {
                let docs: Vec<Document> = docs.iter().filter_map(|v| v.as_object().cloned()).collect();
                coll.restore_documents(docs)?;
            }
        }

        let cutoff = target.timestamp_ms;
        self.savepoints.retain(|sid, sp| *sid == id || sp.timestamp_ms <= cutoff);
        let live = &self.savepoints;
        self.savepoint_order.retain(|sid| live.contains_key(sid));
        Ok(())
    }

    pub fn release_savepoint(&mut self, id: u64) -> Result<()> {
        if self.savepoints.remove(&id).is_none() {
            return Err(StorageError::NotFound(format!("savepoint {id}")));
        }
        self.savepoint_order.retain(|sid| *sid != id);
        Ok(())
    }

    pub fn list_savepoints(&self) -> Vec<SavepointInfo> {
        self.savepoint_order.iter().filter_map(|id| self.savepoints.get(id)).map(SavepointInfo::from).collect()
    }

    pub fn savepoint_info(&self, id: u64) -> Result<SavepointInfo> {
        self.savepoints
            .get(&id)
            .map(SavepointInfo::from)
            .ok_or_else(|| StorageError::NotFound(format!("savepoint {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexDef;
    use serde_json::json;

    fn fresh_memory_db() -> Database {
        Database::create(
            "testdb",
            ":memory:",
            Arc::new(GeneratorRegistry::new()),
            Arc::new(ProcessorRegistry::new()),
            DbConfig::for_testing(),
        )
        .unwrap()
    }

    #[test]
    fn register_and_insert() {
        let mut db = fresh_memory_db();
        db.register_collection(CollectionConfig::new("users")).unwrap();
        let doc = db.insert("users", json!({"name": "a"}).as_object().unwrap().clone()).unwrap();
        assert_eq!(doc["name"], json!("a"));
        assert_eq!(db.collection_mut("users").unwrap().find(|_| true).len(), 1);
    }

    #[test]
    fn only_one_active_transaction_at_a_time() {
        let mut db = fresh_memory_db();
        db.register_collection(CollectionConfig::new("users")).unwrap();
        db.start_transaction(None, None).unwrap();
        let err = db.start_transaction(None, None).unwrap_err();
        assert!(matches!(err, StorageError::TransactionStateError(_)));
    }

    #[test]
    fn abort_transaction_restores_pre_transaction_state() {
        let mut db = fresh_memory_db();
        db.register_collection(CollectionConfig::new("users")).unwrap();
        db.insert("users", json!({"id": 1, "name": "a"}).as_object().unwrap().clone()).unwrap();

        db.start_transaction(None, None).unwrap();
        db.insert("users", json!({"id": 2, "name": "b"}).as_object().unwrap().clone()).unwrap();
        assert_eq!(db.collection_mut("users").unwrap().find(|_| true).len(), 2);

        db.abort_transaction().unwrap();
        assert_eq!(db.collection_mut("users").unwrap().find(|_| true).len(), 1);
    }

    #[test]
    fn commit_transaction_persists_changes() {
        let mut db = fresh_memory_db();
        db.register_collection(CollectionConfig::new("users")).unwrap();
        db.start_transaction(None, None).unwrap();
        db.insert("users", json!({"id": 1, "name": "a"}).as_object().unwrap().clone()).unwrap();
        db.commit_transaction().unwrap();
        assert_eq!(db.collection_mut("users").unwrap().find(|_| true).len(), 1);
        assert!(!db.in_transaction());
    }

    #[test]
    fn savepoint_rollback_discards_later_savepoints() {
        let mut db = fresh_memory_db();
        db.register_collection(CollectionConfig::new("users")).unwrap();
        db.start_transaction(None, None).unwrap();
        db.insert("users", json!({"id": 1}).as_object().unwrap().clone()).unwrap();
        let sp1 = db.create_savepoint("sp1").unwrap();
        db.insert("users", json!({"id": 2}).as_object().unwrap().clone()).unwrap();
        let sp2 = db.create_savepoint("sp2").unwrap();
        db.insert("users", json!({"id": 3}).as_object().unwrap().clone()).unwrap();

        db.rollback_to_savepoint(sp1).unwrap();
        assert_eq!(db.collection_mut("users").unwrap().find(|_| true).len(), 1);
        assert!(db.savepoint_info(sp1).is_ok());
        assert!(db.savepoint_info(sp2).is_err());

        db.commit_transaction().unwrap();
    }

    #[test]
    fn duplicate_savepoint_name_rejected() {
        let mut db = fresh_memory_db();
        db.register_collection(CollectionConfig::new("users")).unwrap();
        db.start_transaction(None, None).unwrap();
        db.create_savepoint("sp").unwrap();
        let err = db.create_savepoint("sp").unwrap_err();
        assert!(matches!(err, StorageError::OperatorMisuse(_)));
    }

    #[test]
    fn reconnect_reconstructs_collections_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        {
            let mut db = Database::create(
                "shop",
                root,
                Arc::new(GeneratorRegistry::new()),
                Arc::new(ProcessorRegistry::new()),
                DbConfig::for_testing(),
            )
            .unwrap();
            db.register_collection(CollectionConfig::new("orders").with_index(IndexDef::new("by_sku", "sku")))
                .unwrap();
            db.insert("orders", json!({"id": 1, "sku": "abc"}).as_object().unwrap().clone()).unwrap();
        }

        let reconnected = Database::open(
            "shop",
            root,
            Arc::new(GeneratorRegistry::new()),
            Arc::new(ProcessorRegistry::new()),
            DbConfig::for_testing(),
        )
        .unwrap();
        assert_eq!(reconnected.collection("orders").unwrap().find_by_id(&json!(1)).unwrap()["sku"], json!("abc"));
    }
}
