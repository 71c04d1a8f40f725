//! Durable storage backends.

pub mod adapter;
pub mod checksum;

pub use adapter::{FileAdapter, MemoryAdapter, Snapshot, StorageAdapter};
pub use checksum::{Checksum, ChecksumError, ChecksumType};
