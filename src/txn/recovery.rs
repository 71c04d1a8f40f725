//! Startup recovery: replays committed transactions from the WAL and
//! discards incomplete ones.
//!
//! Adapted from the teacher's ARIES-style `RecoveryManager`
//! (`txn/recovery.rs`): the Analysis phase is now `WriteAheadLog::recover`
//! itself (it already groups entries by `txn_id` and classifies committed
//! vs. discarded), so this module only drives the Redo step — handing each
//! committed transaction's DATA entries to a caller-supplied replay
//! function, collection-by-collection. There is no Undo phase: uncommitted
//! work was never applied to a collection's in-memory state to begin with,
//! since the WAL is only replayed at startup, not mid-session.

use crate::error::Result;
use crate::txn::wal::{RecoveryReport as WalRecoveryReport, WalEntry, WriteAheadLog};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub committed_txns: usize,
    pub discarded_txns: usize,
    pub redo_count: usize,
    pub errors: Vec<String>,
}

pub struct RecoveryManager {
    wal: Arc<dyn WriteAheadLog>,
}

impl RecoveryManager {
    pub fn new(wal: Arc<dyn WriteAheadLog>) -> Self {
        Self { wal }
    }

    /// Runs `wal.recover()` and replays every DATA entry of a committed
    /// transaction, in `seq` order, through `apply`. Errors from `apply` are
    /// collected rather than aborting the whole recovery pass, matching the
    /// teacher's best-effort redo loop.
    pub fn recover(&self, mut apply: impl FnMut(&WalEntry) -> Result<()>) -> Result<RecoveryReport> {
        let WalRecoveryReport { committed_txns, discarded_txns, replayed_entries } =
            self.wal.recover()?;

        let mut report = RecoveryReport {
            committed_txns: committed_txns.len(),
            discarded_txns: discarded_txns.len(),
            redo_count: 0,
            errors: Vec::new(),
        };

        for entry in &replayed_entries {
            match apply(entry) {
                Ok(()) => report.redo_count += 1,
                Err(e) => report.errors.push(format!("seq {}: {e}", entry.seq)),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::wal::{MemoryWal, WalRecordType};

    #[test]
    fn replays_only_committed_data_entries() {
        let wal = Arc::new(MemoryWal::new());
        wal.write(WalRecordType::Begin, 1, "c", "begin", serde_json::json!({})).unwrap();
        wal.write(WalRecordType::Data, 1, "c", "insert", serde_json::json!({"pk": 1})).unwrap();
        wal.write(WalRecordType::Commit, 1, "c", "commit", serde_json::json!({})).unwrap();
        wal.write(WalRecordType::Begin, 2, "c", "begin", serde_json::json!({})).unwrap();
        wal.write(WalRecordType::Data, 2, "c", "insert", serde_json::json!({"pk": 2})).unwrap();

        let manager = RecoveryManager::new(wal);
        let mut replayed = Vec::new();
        let report = manager
            .recover(|entry| {
                replayed.push(entry.payload.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(report.committed_txns, 1);
        assert_eq!(report.discarded_txns, 1);
        assert_eq!(report.redo_count, 1);
        assert_eq!(replayed, vec![serde_json::json!({"pk": 1})]);
    }
}
