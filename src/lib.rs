//! collection-store: an embeddable, document-oriented collection store with
//! transactional durability.
//!
//! ## Architecture
//! - Storage layer: write-ahead log (`txn::wal`) + pluggable per-collection
//!   snapshot adapters (`storage::adapter`)
//! - Index layer: B+Tree-backed primary/secondary indexes (`index::btree`)
//! - Query layer: a MongoDB-compatible filter language, evaluated by a
//!   tree-walking interpreter or a compiled fast path (`query`)
//! - Transaction layer: two-phase commit across adapters plus document-level
//!   savepoints (`txn`, `database`)
//!
//! `Database` (see [`database::Database`]) is the top-level handle; it owns a
//! set of named [`collection::Collection`]s, each backed by its own storage
//! adapter and indexes.

pub mod collection;
pub mod config;
pub mod database;
pub mod id_gen;
pub mod index;
pub mod manifest;
pub mod query;
pub mod storage;
pub mod txn;
pub mod types;
pub mod typed;
pub mod validator;

mod error;

pub use collection::Collection;
pub use config::{
    CollectionConfig, DbConfig, DurabilityLevel, FieldProcess, IdGenerator, IndexDef, RotationSchedule,
    SortDirection, WalConfig,
};
pub use database::{Database, SavepointInfo};
pub use error::{Result, StorageError};
pub use id_gen::GeneratorRegistry;
pub use txn::{IsolationLevel, Savepoint, Transaction, TransactionState};
pub use types::{Document, Locator};
pub use typed::TypedCollection;
pub use validator::{NullValidator, ValidationOutcome, Validator};
