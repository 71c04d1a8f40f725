//! Transaction layer: WAL, two-phase commit manager, and recovery.

pub mod manager;
pub mod recovery;
pub mod wal;

pub use manager::{
    DeltaOperation, IsolationLevel, Savepoint, Transaction, TransactionManager, TransactionState,
    WalTransactionManager,
};
pub use recovery::RecoveryManager;
pub use wal::{CheckpointInfo, FileWal, MemoryWal, RecoveryReport, WalEntry, WalRecordType, WriteAheadLog};
