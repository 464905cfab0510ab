//! Rows flowing between cursors
//!
//! A row is its values plus the row type that produced it; table rows also
//! carry their hkey. Two rows are equal only if they share a row type
//! instance.

use std::fmt;
use std::sync::Arc;

use crate::catalog::Table;

use super::datum::Datum;
use super::error::{ExecutorError, ExecutorResult};
use super::hkey::HKey;
use super::row_type::RowType;

#[derive(Debug, Clone)]
pub struct Row {
    /// Compared by identity
    row_type: Arc<RowType>,
    values: Vec<Datum>,
    /// Position within the group; table rows only
    hkey: Option<HKey>,
}

impl Row {
    pub fn new(row_type: Arc<RowType>, values: Vec<Datum>) -> Self {
        debug_assert_eq!(row_type.nfields(), values.len(), "row arity for {}", row_type);
        Row {
            row_type,
            values,
            hkey: None,
        }
    }

    pub fn with_hkey(row_type: Arc<RowType>, values: Vec<Datum>, hkey: HKey) -> Self {
        let mut row = Row::new(row_type, values);
        row.hkey = Some(hkey);
        row
    }

    pub fn row_type(&self) -> &Arc<RowType> {
        &self.row_type
    }

    /// True if this row's type is exactly `row_type`
    pub fn is_type(&self, row_type: &RowType) -> bool {
        std::ptr::eq(self.row_type.as_ref(), row_type)
    }

    pub fn hkey(&self) -> Option<&HKey> {
        self.hkey.as_ref()
    }

    pub fn set_hkey(&mut self, hkey: Option<HKey>) {
        self.hkey = hkey;
    }

    /// This row's hkey truncated to `table`'s level
    pub fn ancestor_hkey(&self, table: &Table) -> Option<HKey> {
        self.hkey.as_ref().map(|h| h.prefix(table.hkey_segments()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Field `index`, or an error past the end of the row
    pub fn get(&self, index: usize) -> ExecutorResult<&Datum> {
        self.values
            .get(index)
            .ok_or(ExecutorError::ColumnIndexOutOfBounds {
                index,
                row_len: self.values.len(),
            })
    }

    pub fn get_opt(&self, index: usize) -> Option<&Datum> {
        self.values.get(index)
    }

    /// Overwrite field `index`; the type and hkey are unchanged
    pub fn set(&mut self, index: usize, value: Datum) -> ExecutorResult<()> {
        let row_len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ExecutorError::ColumnIndexOutOfBounds { index, row_len })?;
        *slot = value;
        Ok(())
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Datum> {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = &Datum> {
        self.values.iter()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.row_type, &other.row_type)
            && self.values == other.values
            && self.hkey == other.hkey
    }
}

impl Eq for Row {}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "{}[{}]", self.row_type, values.join(", "))?;
        if let Some(hkey) = &self.hkey {
            write!(f, "@{}", hkey)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Datum;
    type IntoIter = std::slice::Iter<'a, Datum>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
