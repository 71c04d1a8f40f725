//! Durability levels and configuration presets.
//!
//! Provides flexible configuration for balancing write performance against
//! crash-safety, plus the per-collection knobs (TTL, rotation, audit mode).

use serde::{Deserialize, Serialize};

/// Durability level: trades write latency against how much data a crash can
/// lose. Drives the WAL's flush policy (see `wal::WriteAheadLog`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityLevel {
    /// fsync on every write. Safest, slowest.
    Synchronous,

    /// Buffer writes, fsync once per batch or on commit/rollback, whichever
    /// comes first. Recommended for most embedders.
    GroupCommit { max_batch_size: usize, max_wait_us: u64 },

    /// Background timer flushes periodically; a crash can lose up to
    /// `interval_ms` worth of writes.
    Periodic { interval_ms: u64 },

    /// Never fsync explicitly; rely on the OS page cache. Tests only.
    NoSync,
}

impl Default for DurabilityLevel {
    fn default() -> Self {
        DurabilityLevel::GroupCommit { max_batch_size: 1000, max_wait_us: 1000 }
    }
}

impl DurabilityLevel {
    pub fn synchronous() -> Self {
        Self::Synchronous
    }

    pub fn group_commit() -> Self {
        Self::GroupCommit { max_batch_size: 1000, max_wait_us: 1000 }
    }

    pub fn periodic(interval_ms: u64) -> Self {
        Self::Periodic { interval_ms }
    }

    pub fn no_sync() -> Self {
        Self::NoSync
    }

    /// Entries of this type force an eager flush regardless of buffer state
    /// (spec.md §4.1: COMMIT/ROLLBACK always flush).
    pub fn requires_immediate_sync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn is_no_sync(&self) -> bool {
        matches!(self, Self::NoSync)
    }
}

/// WAL configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    pub durability_level: DurabilityLevel,
    pub max_buffer_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            durability_level: DurabilityLevel::default(),
            max_buffer_size: 256,
            flush_interval_ms: 100,
        }
    }
}

impl WalConfig {
    pub fn for_financial() -> Self {
        Self { durability_level: DurabilityLevel::Synchronous, ..Default::default() }
    }

    pub fn for_general() -> Self {
        Self { durability_level: DurabilityLevel::group_commit(), ..Default::default() }
    }

    pub fn for_logging() -> Self {
        Self { durability_level: DurabilityLevel::periodic(100), ..Default::default() }
    }

    pub fn for_testing() -> Self {
        Self { durability_level: DurabilityLevel::NoSync, ..Default::default() }
    }
}

/// Strategy for generating primary-key values when the caller omits one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IdGenerator {
    #[default]
    AutoIncrement,
    Timestamp,
    /// Indexes into a constructor-time registry of caller-supplied
    /// generators, replacing the teacher's global mutable generator cache
    /// (spec.md §9).
    Custom(u32),
}

/// How a single index field's key is projected before insertion, replacing
/// the source-string `process` field of the manifest format (spec.md §9):
/// source strings become enum variants plus an optional registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FieldProcess {
    #[default]
    None,
    Lowercase,
    Custom(u32),
}

/// Per-field ordering direction within a (possibly composite) index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Definition of one index on a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub fields: Vec<(String, SortDirection)>,
    pub unique: bool,
    pub sparse: bool,
    pub required: bool,
    pub ignore_case: bool,
    pub process: FieldProcess,
    pub separator: u8,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: vec![(field.into(), SortDirection::Asc)],
            unique: false,
            sparse: false,
            required: false,
            ignore_case: false,
            process: FieldProcess::None,
            separator: crate::types::DEFAULT_SEPARATOR,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// Declares every field of this index descending (spec.md §4.3's
    /// "direction desc inverts" comparator rule).
    pub fn desc(mut self) -> Self {
        for field in &mut self.fields {
            field.1 = SortDirection::Desc;
        }
        self
    }

    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }
}

/// Periodic rotation schedule for a collection (copies the collection into a
/// sibling archival snapshot on an interval rather than a full cron grammar,
/// matching spec.md §4.4's "scheduled task" wording without a cron parser).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RotationSchedule {
    pub interval_ms: u64,
}

impl RotationSchedule {
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms }
    }

    /// Whether a rotation is due: the interface the external rotation
    /// scheduler (spec.md §1) polls against, so the scheduler itself never
    /// needs to know the interval's meaning, only "due or not".
    pub fn is_due(&self, last_rotated_ms: Option<i64>, now_ms: i64) -> bool {
        match last_rotated_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms as i64,
            None => true,
        }
    }
}

/// Per-collection configuration, persisted in the database manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub primary_key_field: String,
    pub id_generator: IdGenerator,
    pub ttl_ms: Option<u64>,
    pub rotate: Option<RotationSchedule>,
    pub audit: bool,
    pub index_defs: Vec<IndexDef>,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key_field: "id".to_string(),
            id_generator: IdGenerator::default(),
            ttl_ms: None,
            rotate: None,
            audit: false,
            index_defs: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_rotation(mut self, interval_ms: u64) -> Self {
        self.rotate = Some(RotationSchedule::new(interval_ms));
        self
    }

    pub fn with_audit(mut self) -> Self {
        self.audit = true;
        self
    }

    pub fn with_index(mut self, def: IndexDef) -> Self {
        self.index_defs.push(def);
        self
    }
}

/// Top-level database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub wal_config: WalConfig,
    pub transaction_timeout_ms: u64,
    pub auto_recovery: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            wal_config: WalConfig::default(),
            transaction_timeout_ms: 30_000,
            auto_recovery: true,
        }
    }
}

impl DbConfig {
    pub fn for_financial() -> Self {
        Self { wal_config: WalConfig::for_financial(), ..Default::default() }
    }

    pub fn for_general() -> Self {
        Self { wal_config: WalConfig::for_general(), ..Default::default() }
    }

    pub fn for_testing() -> Self {
        Self { wal_config: WalConfig::for_testing(), ..Default::default() }
    }
}
