//! Error types for the storage engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("File not found: {0}")]
    FileNotFound(std::path::PathBuf),

    #[error("Corrupted file: {0}")]
    CorruptedFile(std::path::PathBuf),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unique constraint violated on index '{index}' for key {key}")]
    UniqueViolation { index: String, key: String },

    #[error("Required field missing: {0}")]
    RequiredMissing(String),

    #[error("Index not found: {0}")]
    IndexMissing(String),

    #[error("Index already exists: {0}")]
    IndexExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collection not found: {0}")]
    CollectionMissing(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Invalid transaction state: {0}")]
    TransactionStateError(String),

    #[error("Write-ahead log is closed")]
    WalClosed,

    #[error("WAL corruption detected at seq {seq}: {reason}")]
    WalCorruption { seq: u64, reason: String },

    #[error("Storage adapter IO error: {0}")]
    AdapterIo(String),

    #[error("Query compilation failed: {0}")]
    QueryCompile(String),

    #[error("Query operator misuse: {0}")]
    OperatorMisuse(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
