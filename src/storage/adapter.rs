//! Storage adapters: pluggable durable-storage backends for one collection.
//!
//! Two variants per spec.md §4.2: `MemoryAdapter` (in-process only) and
//! `FileAdapter` (one JSON document per collection). Both implement the
//! transactional extension used by two-phase commit: `prepare_commit` stages
//! no further work (the snapshot is already staged by `store_in_transaction`)
//! and only promises durability is achievable; `finalize_commit` performs the
//! atomic replace, grounded on the teacher's manifest rename-commit technique
//! (`manifest.rs::commit_atomic`).
//!
//! `FileAdapter`'s on-disk snapshots carry the `storage::checksum` CRC32C
//! frame (`[len][data][checksum]`), so a torn or bit-flipped write is caught
//! on restore rather than silently handed to `Collection::load` as bad JSON.

use crate::error::{Result, StorageError};
use crate::storage::checksum::{Checksum, ChecksumType};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(snapshot)?;
    Ok(Checksum::encode_with_checksum(ChecksumType::CRC32C, &bytes))
}

fn decode_snapshot(encoded: &[u8]) -> Result<Snapshot> {
    let bytes = Checksum::decode_with_checksum(ChecksumType::CRC32C, encoded)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// A per-collection snapshot: `{list, indexes, indexDefs, id, ttl, rotate}`
/// per spec.md §6. Kept as an opaque JSON value here; `Collection` knows how
/// to shape and interpret it.
pub type Snapshot = serde_json::Value;

/// Durable-storage backend for one collection.
pub trait StorageAdapter: Send + Sync {
    fn restore(&self, collection_name: &str) -> Result<Option<Snapshot>>;
    fn store(&self, collection_name: &str, snapshot: &Snapshot) -> Result<()>;
    fn init(&self, collection_name: &str) -> Result<()>;
    fn clone_adapter(&self) -> Box<dyn StorageAdapter>;

    fn is_transactional(&self) -> bool {
        false
    }

    fn store_in_transaction(&self, _txn_id: u64, _name: &str, _snapshot: &Snapshot) -> Result<()> {
        Err(StorageError::OperatorMisuse("adapter is not transactional".into()))
    }

    fn prepare_commit(&self, _txn_id: u64) -> Result<bool> {
        Ok(true)
    }

    fn finalize_commit(&self, _txn_id: u64) -> Result<()> {
        Ok(())
    }

    fn rollback(&self, _txn_id: u64) -> Result<()> {
        Ok(())
    }

    fn create_checkpoint(&self, _txn_id: u64) -> Result<String> {
        Ok(String::new())
    }

    fn restore_from_checkpoint(&self, _checkpoint_id: &str) -> Result<()> {
        Ok(())
    }
}

/// In-process adapter; snapshots never touch disk. Staged writes are kept in
/// a side table keyed by `txn_id` until `finalize_commit`/`rollback`.
#[derive(Default)]
pub struct MemoryAdapter {
    live: DashMap<String, Snapshot>,
    staged: DashMap<u64, HashMap<String, Snapshot>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for MemoryAdapter {
    fn restore(&self, collection_name: &str) -> Result<Option<Snapshot>> {
        Ok(self.live.get(collection_name).map(|v| v.clone()))
    }

    fn store(&self, collection_name: &str, snapshot: &Snapshot) -> Result<()> {
        self.live.insert(collection_name.to_string(), snapshot.clone());
        Ok(())
    }

    fn init(&self, _collection_name: &str) -> Result<()> {
        Ok(())
    }

    fn clone_adapter(&self) -> Box<dyn StorageAdapter> {
        Box::new(MemoryAdapter::new())
    }

    fn is_transactional(&self) -> bool {
        true
    }

    fn store_in_transaction(&self, txn_id: u64, name: &str, snapshot: &Snapshot) -> Result<()> {
        self.staged
            .entry(txn_id)
            .or_insert_with(HashMap::new)
            .insert(name.to_string(), snapshot.clone());
        Ok(())
    }

    fn prepare_commit(&self, txn_id: u64) -> Result<bool> {
        Ok(self.staged.contains_key(&txn_id))
    }

    fn finalize_commit(&self, txn_id: u64) -> Result<()> {
        if let Some((_, staged)) = self.staged.remove(&txn_id) {
            for (name, snap) in staged {
                self.live.insert(name, snap);
            }
        }
        Ok(())
    }

    fn rollback(&self, txn_id: u64) -> Result<()> {
        self.staged.remove(&txn_id);
        Ok(())
    }
}

/// JSON-file-backed adapter: `<root>/<collection>.json` holds the live
/// snapshot; staged writes for an in-flight transaction live under
/// `<root>/.txn/<txn_id>/<collection>.json` and are promoted with a rename
/// on `finalize_commit`, the same pattern the teacher uses for manifest
/// commits.
pub struct FileAdapter {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, lock: Mutex::new(()) })
    }

    fn live_path(&self, collection_name: &str) -> PathBuf {
        self.root.join(format!("{collection_name}.json"))
    }

    fn staged_dir(&self, txn_id: u64) -> PathBuf {
        self.root.join(".txn").join(txn_id.to_string())
    }

    fn staged_path(&self, txn_id: u64, collection_name: &str) -> PathBuf {
        self.staged_dir(txn_id).join(format!("{collection_name}.json"))
    }
}

impl StorageAdapter for FileAdapter {
    fn restore(&self, collection_name: &str) -> Result<Option<Snapshot>> {
        let path = self.live_path(collection_name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)?;
        Ok(Some(decode_snapshot(&raw)?))
    }

    fn store(&self, collection_name: &str, snapshot: &Snapshot) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.live_path(collection_name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, encode_snapshot(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn init(&self, _collection_name: &str) -> Result<()> {
        Ok(())
    }

    fn clone_adapter(&self) -> Box<dyn StorageAdapter> {
        Box::new(FileAdapter { root: self.root.clone(), lock: Mutex::new(()) })
    }

    fn is_transactional(&self) -> bool {
        true
    }

    fn store_in_transaction(&self, txn_id: u64, name: &str, snapshot: &Snapshot) -> Result<()> {
        let dir = self.staged_dir(txn_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(self.staged_path(txn_id, name), encode_snapshot(snapshot)?)?;
        Ok(())
    }

    fn prepare_commit(&self, txn_id: u64) -> Result<bool> {
        Ok(self.staged_dir(txn_id).exists())
    }

    fn finalize_commit(&self, txn_id: u64) -> Result<()> {
        let _guard = self.lock.lock();
        let dir = self.staged_dir(txn_id);
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let dest = self.root.join(entry.file_name());
            std::fs::rename(entry.path(), dest)?;
        }
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    fn rollback(&self, txn_id: u64) -> Result<()> {
        let dir = self.staged_dir(txn_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_adapter_two_phase_commit() {
        let adapter = MemoryAdapter::new();
        adapter.store_in_transaction(1, "users", &json!({"a": 1})).unwrap();
        assert!(adapter.prepare_commit(1).unwrap());
        assert!(adapter.restore("users").unwrap().is_none());
        adapter.finalize_commit(1).unwrap();
        assert_eq!(adapter.restore("users").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn memory_adapter_rollback_discards_staged() {
        let adapter = MemoryAdapter::new();
        adapter.store_in_transaction(1, "users", &json!({"a": 1})).unwrap();
        adapter.rollback(1).unwrap();
        assert!(adapter.restore("users").unwrap().is_none());
    }

    #[test]
    fn file_adapter_commit_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        adapter.store_in_transaction(7, "users", &json!({"a": 1})).unwrap();
        assert!(adapter.prepare_commit(7).unwrap());
        adapter.finalize_commit(7).unwrap();
        assert_eq!(adapter.restore("users").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn file_adapter_direct_store() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        adapter.store("orders", &json!({"b": 2})).unwrap();
        assert_eq!(adapter.restore("orders").unwrap(), Some(json!({"b": 2})));
    }

    #[test]
    fn corrupted_snapshot_bytes_fail_checksum_on_restore() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        adapter.store("orders", &json!({"b": 2})).unwrap();
        let path = dir.path().join("orders.json");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();
        assert!(adapter.restore("orders").is_err());
    }
}
