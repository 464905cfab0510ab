//! Pieces shared by the ordered two-input operators
//!
//! Each input is sorted on its trailing ordering fields. The fields before
//! them are fixed for the whole scan, and the first `n` ordering fields
//! are compared across inputs.

use std::sync::Arc;

use crate::storage::ColumnSelector;

use super::datum::Datum;
use super::error::{check_argument, ExecutorResult};
use super::row::Row;
use super::row_type::RowType;
use super::Cursor;

/// Check `ordering_fields` against `row_type` and the compared field count
pub(crate) fn check_ordering(
    row_type: &RowType,
    ordering_fields: usize,
    compared: usize,
) -> ExecutorResult<()> {
    check_argument(ordering_fields <= row_type.nfields(), || {
        format!(
            "{} ordering fields but {} has {}",
            ordering_fields,
            row_type,
            row_type.nfields()
        )
    })?;
    check_argument(compared <= ordering_fields, || {
        format!(
            "{} comparison fields exceed {} ordering fields",
            compared, ordering_fields
        )
    })
}

pub(crate) fn comparison_key(row: &Row, fixed_fields: usize, n: usize) -> Vec<Datum> {
    row.values()[fixed_fields..fixed_fields + n].to_vec()
}

/// One input of a merge: its row type, layout and the row it is on
pub(crate) struct MergeSide {
    row_type: Arc<RowType>,
    fixed_fields: usize,
    compared: usize,
    current: Option<(Row, Vec<Datum>)>,
}

impl MergeSide {
    pub(crate) fn new(row_type: Arc<RowType>, fixed_fields: usize, compared: usize) -> Self {
        Self {
            row_type,
            fixed_fields,
            compared,
            current: None,
        }
    }

    pub(crate) fn key(&self) -> Option<&[Datum]> {
        self.current.as_ref().map(|(_, key)| key.as_slice())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    pub(crate) fn clear(&mut self) {
        self.current = None;
    }

    /// The current row; the side must be advanced before it is read again
    pub(crate) fn take(&mut self) -> Option<Row> {
        self.current.take().map(|(row, _)| row)
    }

    /// Read the next row of this side's type from `input`
    pub(crate) fn advance(&mut self, input: &mut dyn Cursor) -> ExecutorResult<()> {
        let row = input.next()?;
        self.settle(input, row)
    }

    /// Jump `input` to the first row whose comparison fields reach `key`,
    /// keeping the fixed fields of the current row
    pub(crate) fn skip_to(&mut self, input: &mut dyn Cursor, key: &[Datum]) -> ExecutorResult<()> {
        let mut values = match &self.current {
            Some((row, _)) => row.values()[..self.fixed_fields].to_vec(),
            None => return Ok(()),
        };
        values.extend(key.iter().take(self.compared).cloned());
        values.resize(self.row_type.nfields(), Datum::Null);
        let width = self.fixed_fields + key.len().min(self.compared);
        let target = Row::new(self.row_type.clone(), values);
        input.jump(&target, ColumnSelector::Prefix(width))?;
        self.advance(input)
    }

    fn settle(&mut self, input: &mut dyn Cursor, mut row: Option<Row>) -> ExecutorResult<()> {
        loop {
            match row {
                None => {
                    self.current = None;
                    return Ok(());
                }
                Some(r) if r.is_type(&self.row_type) => {
                    let key = comparison_key(&r, self.fixed_fields, self.compared);
                    self.current = Some((r, key));
                    return Ok(());
                }
                Some(_) => row = input.next()?,
            }
        }
    }
}
