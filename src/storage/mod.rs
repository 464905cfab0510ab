//! Storage subsystem
//!
//! Defines the adapter contract the executor consumes and an in-memory
//! implementation of it.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::{MemoryStore, StoreConfig, VecRowCursor};
pub use traits::{
    compare_keys, ColumnSelector, GroupCursor, IndexCursor, IndexOrdering, KeyBound, KeyRange,
    RowCursor, SortOption, Sorter, StoreAdapter,
};
