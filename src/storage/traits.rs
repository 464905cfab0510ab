//! Storage adapter contract consumed by the executor
//!
//! The executor never touches persisted data directly. Everything it needs
//! from storage goes through [`StoreAdapter`]: group cursors positioned by
//! hkey, index cursors over key ranges, one-shot sorters, row mutation and
//! sequence generation. All calls are synchronous and may block.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::catalog::Group;
use crate::executor::{Datum, HKey, Row, RowType};
use crate::storage::error::{StorageError, StorageResult};

/// Columns of a row that participate in a jump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSelector {
    /// Every field
    All,
    /// The first `n` fields
    Prefix(usize),
}

impl ColumnSelector {
    pub fn includes(&self, column: usize) -> bool {
        match self {
            ColumnSelector::All => true,
            ColumnSelector::Prefix(n) => column < *n,
        }
    }

    /// Number of leading fields selected out of `nfields`
    pub fn width(&self, nfields: usize) -> usize {
        match self {
            ColumnSelector::All => nfields,
            ColumnSelector::Prefix(n) => (*n).min(nfields),
        }
    }
}

/// One end of an index key range
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBound {
    /// Leading key values; shorter than the key means a prefix bound
    pub values: Vec<Datum>,
    pub inclusive: bool,
}

impl KeyBound {
    pub fn inclusive(values: Vec<Datum>) -> Self {
        Self {
            values,
            inclusive: true,
        }
    }

    pub fn exclusive(values: Vec<Datum>) -> Self {
        Self {
            values,
            inclusive: false,
        }
    }

    fn compare(&self, key: &[Datum]) -> Ordering {
        let n = self.values.len().min(key.len());
        key[..n].cmp(&self.values[..n])
    }
}

/// Index key range with optional bounds on each side
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyRange {
    pub lo: Option<KeyBound>,
    pub hi: Option<KeyBound>,
}

impl KeyRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(lo: Option<KeyBound>, hi: Option<KeyBound>) -> Self {
        Self { lo, hi }
    }

    /// Exact match on a key prefix
    pub fn point(values: Vec<Datum>) -> Self {
        Self {
            lo: Some(KeyBound::inclusive(values.clone())),
            hi: Some(KeyBound::inclusive(values)),
        }
    }

    /// True if `key` lies within the range
    pub fn contains(&self, key: &[Datum]) -> bool {
        if let Some(lo) = &self.lo {
            match lo.compare(key) {
                Ordering::Less => return false,
                Ordering::Equal if !lo.inclusive => return false,
                _ => {}
            }
        }
        if let Some(hi) = &self.hi {
            match hi.compare(key) {
                Ordering::Greater => return false,
                Ordering::Equal if !hi.inclusive => return false,
                _ => {}
            }
        }
        true
    }
}

/// Index scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrdering {
    Ascending,
    Descending,
}

/// Whether a sort keeps rows that compare equal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOption {
    PreserveDuplicates,
    SuppressDuplicates,
}

/// Compare sort keys field by field, reversing fields marked descending.
/// Fields beyond `ascending` sort ascending.
pub fn compare_keys(a: &[Datum], b: &[Datum], ascending: &[bool]) -> Ordering {
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        let mut ord = x.cmp(y);
        if !ascending.get(i).copied().unwrap_or(true) {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// A storage-level row iterator
pub trait RowCursor {
    fn open(&mut self) -> StorageResult<()>;

    /// Next row, or None once exhausted
    fn next(&mut self) -> StorageResult<Option<Row>>;

    /// Reposition at the first row whose selected fields are at or past
    /// those of `row` in scan order
    fn jump(&mut self, _row: &Row, _selector: ColumnSelector) -> StorageResult<()> {
        Err(StorageError::Unsupported("jump"))
    }

    fn close(&mut self);
}

/// Cursor over a clustered group
pub trait GroupCursor: RowCursor {
    /// Position at `hkey` for the next open. With `deep`, the cursor yields
    /// every row whose hkey has `hkey` as a prefix; otherwise it yields the
    /// first such row only (which may be a descendant if `hkey` itself is
    /// absent). An unbound cursor scans the whole group.
    fn rebind(&mut self, hkey: HKey, deep: bool);
}

/// Cursor over an index
pub trait IndexCursor: RowCursor {
    /// Restrict the next open to `range`
    fn rebind(&mut self, range: KeyRange);
}

/// One-shot sort session
pub trait Sorter {
    fn insert(&mut self, keys: Vec<Datum>, row: Row) -> StorageResult<()>;

    /// Finish loading and return a cursor over the sorted rows
    fn sort(self: Box<Self>) -> StorageResult<Box<dyn RowCursor>>;
}

/// Storage adapter interface
pub trait StoreAdapter: Send + Sync {
    fn new_group_cursor(&self, group: &Arc<Group>) -> StorageResult<Box<dyn GroupCursor>>;

    fn new_index_cursor(
        &self,
        index_type: &Arc<RowType>,
        ordering: IndexOrdering,
    ) -> StorageResult<Box<dyn IndexCursor>>;

    /// Sorter ordering rows by keys, one direction flag per key field
    fn create_sorter(&self, ascending: &[bool], option: SortOption) -> Box<dyn Sorter>;

    fn write_row(&self, row: &Row) -> StorageResult<()>;

    fn update_row(&self, old: &Row, new: &Row) -> StorageResult<()>;

    /// Delete `row`; with `cascade`, also delete its descendants
    fn delete_row(&self, row: &Row, cascade: bool) -> StorageResult<()>;

    fn sequence_next_value(&self, name: &str) -> StorageResult<i64>;

    fn sequence_current_value(&self, name: &str) -> StorageResult<i64>;
}
