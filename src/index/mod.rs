//! B+Tree-style ordered index over document primary keys.

pub mod btree;

pub use btree::{BTreeIndex, BTreeIndexConfig, RangeBound};
