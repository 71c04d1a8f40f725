//! Transaction manager: correlates multiple storage adapters under a single
//! transaction id with two-phase commit.
//!
//! Generalizes `motedb::txn::coordinator::TransactionCoordinator` from a
//! single-resource MVCC coordinator to the multi-adapter 2PC spec.md §4.6
//! describes. Savepoints keep the teacher's delta-based `Savepoint` /
//! `DeltaOperation` shape for best-effort index-level undo; document-level
//! snapshots (owned by `Database`) remain the authoritative savepoint state
//! per spec.md §9.

use crate::error::{Result, StorageError};
use crate::storage::StorageAdapter;
use crate::txn::wal::{WalRecordType, WriteAheadLog};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::Snapshot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Preparing,
    Prepared,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: u64,
    pub start_ms: i64,
    pub state: TransactionState,
    pub isolation: IsolationLevel,
    pub timeout_ms: u64,
    pub affected_resources: Vec<String>,
    pub changes: Vec<serde_json::Value>,
}

/// Best-effort undo operation for a collection's index state, replayed in
/// reverse on `rollback_to_savepoint`. Consecutive operations on the same
/// index are not compressed (unlike the teacher's RowId-keyed compression —
/// document-level snapshots make that optimization unnecessary here).
#[derive(Debug, Clone)]
pub enum DeltaOperation {
    IndexInsert { index_name: String, key: String, locator: serde_json::Value },
    IndexRemove { index_name: String, key: String, locator: serde_json::Value },
}

#[derive(Debug, Clone)]
pub struct Savepoint {
    pub id: u64,
    pub name: String,
    pub timestamp_ms: i64,
    pub txn_id: u64,
    /// Deep-copied documents per collection at savepoint creation time —
    /// authoritative restore state.
    pub document_snapshot: HashMap<String, Vec<serde_json::Value>>,
    /// Index deltas applied since the savepoint was created; best-effort,
    /// replayed in reverse to undo.
    pub index_deltas: Vec<DeltaOperation>,
}

type ChangeListener = Box<dyn Fn(&Transaction) + Send + Sync>;

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Two-phase commit coordinator across named storage adapters.
pub struct TransactionManager {
    next_id: AtomicU64,
    active: parking_lot::Mutex<HashMap<u64, Transaction>>,
    listeners: parking_lot::Mutex<Vec<ChangeListener>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: parking_lot::Mutex::new(HashMap::new()),
            listeners: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn on_change(&self, listener: ChangeListener) {
        self.listeners.lock().push(listener);
    }

    /// Default timeout 30s, default isolation Snapshot per spec.md §4.6.
    pub fn begin(&self, timeout_ms: Option<u64>, isolation: Option<IsolationLevel>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let txn = Transaction {
            id,
            start_ms: now_ms(),
            state: TransactionState::Active,
            isolation: isolation.unwrap_or_default(),
            timeout_ms: timeout_ms.unwrap_or(30_000),
            affected_resources: Vec::new(),
            changes: Vec::new(),
        };
        self.active.lock().insert(id, txn);
        id
    }

    pub fn get(&self, txn_id: u64) -> Result<Transaction> {
        self.active
            .lock()
            .get(&txn_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("transaction {txn_id}")))
    }

    pub fn record_resource(&self, txn_id: u64, resource: &str) -> Result<()> {
        let mut active = self.active.lock();
        let txn = active
            .get_mut(&txn_id)
            .ok_or_else(|| StorageError::NotFound(format!("transaction {txn_id}")))?;
        if !txn.affected_resources.iter().any(|r| r == resource) {
            txn.affected_resources.push(resource.to_string());
        }
        Ok(())
    }

    pub fn record_change(&self, txn_id: u64, change: serde_json::Value) -> Result<()> {
        let mut active = self.active.lock();
        let txn = active
            .get_mut(&txn_id)
            .ok_or_else(|| StorageError::NotFound(format!("transaction {txn_id}")))?;
        txn.changes.push(change);
        Ok(())
    }

    /// Runs `prepare_commit` on every affected resource; if any returns false
    /// or errors the transaction aborts and every resource is rolled back.
    /// Otherwise every resource's `finalize_commit` runs, change listeners
    /// fire best-effort, and the transaction is marked Committed.
    pub fn commit(
        &self,
        txn_id: u64,
        resources: &HashMap<String, Box<dyn StorageAdapter>>,
    ) -> Result<()> {
        let affected = {
            let mut active = self.active.lock();
            let txn = active
                .get_mut(&txn_id)
                .ok_or_else(|| StorageError::NotFound(format!("transaction {txn_id}")))?;
            txn.state = TransactionState::Preparing;
            txn.affected_resources.clone()
        };

        let mut all_prepared = true;
        for name in &affected {
            let prepared = resources
                .get(name)
                .map(|adapter| adapter.prepare_commit(txn_id).unwrap_or(false))
                .unwrap_or(false);
            if !prepared {
                all_prepared = false;
                break;
            }
        }

        if !all_prepared {
            self.rollback(txn_id, resources)?;
            return Err(StorageError::TransactionStateError(
                "one or more resources refused to prepare; transaction aborted".into(),
            ));
        }

        {
            let mut active = self.active.lock();
            if let Some(txn) = active.get_mut(&txn_id) {
                txn.state = TransactionState::Prepared;
            }
        }

        for name in &affected {
            if let Some(adapter) = resources.get(name) {
                adapter.finalize_commit(txn_id)?;
            }
        }

        let finished = {
            let mut active = self.active.lock();
            let mut txn = active
                .remove(&txn_id)
                .ok_or_else(|| StorageError::NotFound(format!("transaction {txn_id}")))?;
            txn.state = TransactionState::Committed;
            txn
        };

        for listener in self.listeners.lock().iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&finished)));
            if result.is_err() {
                log::warn!("transaction change listener panicked; ignoring");
            }
        }
        Ok(())
    }

    pub fn rollback(
        &self,
        txn_id: u64,
        resources: &HashMap<String, Box<dyn StorageAdapter>>,
    ) -> Result<()> {
        let affected = {
            let mut active = self.active.lock();
            let txn = active
                .get_mut(&txn_id)
                .ok_or_else(|| StorageError::NotFound(format!("transaction {txn_id}")))?;
            if txn.state == TransactionState::Committed {
                return Err(StorageError::TransactionStateError(
                    "cannot roll back a committed transaction".into(),
                ));
            }
            txn.affected_resources.clone()
        };
        for name in &affected {
            if let Some(adapter) = resources.get(name) {
                adapter.rollback(txn_id)?;
            }
        }
        let mut active = self.active.lock();
        if let Some(mut txn) = active.remove(&txn_id) {
            txn.state = TransactionState::Aborted;
        }
        Ok(())
    }

    /// Rolls back every active transaction whose `now - start_ms >
    /// timeout_ms`. Returns the ids rolled back.
    pub fn cleanup(&self, resources: &HashMap<String, Box<dyn StorageAdapter>>) -> Vec<u64> {
        let now = now_ms();
        let expired: Vec<u64> = {
            let active = self.active.lock();
            active
                .values()
                .filter(|txn| now - txn.start_ms > txn.timeout_ms as i64)
                .map(|txn| txn.id)
                .collect()
        };
        for id in &expired {
            let _ = self.rollback(*id, resources);
        }
        expired
    }
}

/// Wraps `TransactionManager` with WAL-entry writes around begin/commit/
/// rollback, per spec.md §4.6.
pub struct WalTransactionManager {
    pub manager: TransactionManager,
    wal: Arc<dyn WriteAheadLog>,
}

impl WalTransactionManager {
    pub fn new(wal: Arc<dyn WriteAheadLog>) -> Self {
        Self { manager: TransactionManager::new(), wal }
    }

    pub fn begin(&self, timeout_ms: Option<u64>, isolation: Option<IsolationLevel>) -> Result<u64> {
        let txn_id = self.manager.begin(timeout_ms, isolation);
        self.wal.write(WalRecordType::Begin, txn_id, "", "begin", serde_json::json!({}))?;
        Ok(txn_id)
    }

    pub fn commit(
        &self,
        txn_id: u64,
        resources: &HashMap<String, Box<dyn StorageAdapter>>,
    ) -> Result<()> {
        let txn = self.manager.get(txn_id)?;
        for name in &txn.affected_resources {
            self.wal.write(
                WalRecordType::Prepare,
                txn_id,
                name,
                "prepare",
                serde_json::json!({}),
            )?;
        }
        match self.manager.commit(txn_id, resources) {
            Ok(()) => {
                self.wal.write(WalRecordType::Commit, txn_id, "", "commit", serde_json::json!({}))?;
                Ok(())
            }
            Err(e) => {
                self.wal.write(WalRecordType::Rollback, txn_id, "", "rollback", serde_json::json!({}))?;
                Err(e)
            }
        }
    }

    pub fn rollback(
        &self,
        txn_id: u64,
        resources: &HashMap<String, Box<dyn StorageAdapter>>,
    ) -> Result<()> {
        self.manager.rollback(txn_id, resources)?;
        self.wal.write(WalRecordType::Rollback, txn_id, "", "rollback", serde_json::json!({}))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;

    fn resources_with(name: &str) -> HashMap<String, Box<dyn StorageAdapter>> {
        let mut map: HashMap<String, Box<dyn StorageAdapter>> = HashMap::new();
        map.insert(name.to_string(), Box::new(MemoryAdapter::new()));
        map
    }

    #[test]
    fn commit_requires_all_resources_prepared() {
        let tm = TransactionManager::new();
        let resources = resources_with("users");
        let txn_id = tm.begin(None, None);
        tm.record_resource(txn_id, "users").unwrap();
        resources["users"].store_in_transaction(txn_id, "users", &serde_json::json!({"a":1})).unwrap();
        tm.commit(txn_id, &resources).unwrap();
        assert_eq!(resources["users"].restore("users").unwrap(), Some(serde_json::json!({"a":1})));
    }

    #[test]
    fn rollback_discards_staged_changes() {
        let tm = TransactionManager::new();
        let resources = resources_with("users");
        let txn_id = tm.begin(None, None);
        tm.record_resource(txn_id, "users").unwrap();
        resources["users"].store_in_transaction(txn_id, "users", &serde_json::json!({"a":1})).unwrap();
        tm.rollback(txn_id, &resources).unwrap();
        assert_eq!(resources["users"].restore("users").unwrap(), None);
    }

    #[test]
    fn cannot_rollback_committed_transaction() {
        let tm = TransactionManager::new();
        let resources = resources_with("users");
        let txn_id = tm.begin(None, None);
        tm.commit(txn_id, &resources).unwrap();
        let err = tm.rollback(txn_id, &resources).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
