//! Except_Ordered
//!
//! Ordered set difference. Both inputs are sorted on their trailing
//! ordering fields; the first `ascending.len()` of those are compared, each
//! in its own direction. A left row is returned unless the right input has
//! a row with equal comparison fields. Each right row cancels at most one
//! left row.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::storage::compare_keys;

use super::chained::MultiChainedCursor;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::{check_argument, ExecutorResult};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::merge::{check_ordering, comparison_key};
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

#[derive(Debug)]
pub struct OrderedExcept {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    left_type: Arc<RowType>,
    right_type: Arc<RowType>,
    left_fixed_fields: usize,
    right_fixed_fields: usize,
    ascending: Vec<bool>,
    remove_duplicates: bool,
}

impl OrderedExcept {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Box<dyn Operator>,
        left_type: Arc<RowType>,
        left_ordering_fields: usize,
        right: Box<dyn Operator>,
        right_type: Arc<RowType>,
        right_ordering_fields: usize,
        ascending: Vec<bool>,
        remove_duplicates: bool,
    ) -> ExecutorResult<Self> {
        check_argument(!ascending.is_empty(), || "no comparison fields".to_string())?;
        check_ordering(&left_type, left_ordering_fields, ascending.len())?;
        check_ordering(&right_type, right_ordering_fields, ascending.len())?;
        let left_fixed_fields = left_type.nfields() - left_ordering_fields;
        let right_fixed_fields = right_type.nfields() - right_ordering_fields;
        Ok(Self {
            left,
            right,
            left_type,
            right_type,
            left_fixed_fields,
            right_fixed_fields,
            ascending,
            remove_duplicates,
        })
    }
}

impl Operator for OrderedExcept {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        Ok(Box::new(ExceptCursor {
            base: MultiChainedCursor::new(context, bindings, self.left.as_ref(), self.right.as_ref())?,
            left_type: self.left_type.clone(),
            right_type: self.right_type.clone(),
            left_fixed_fields: self.left_fixed_fields,
            right_fixed_fields: self.right_fixed_fields,
            ascending: self.ascending.clone(),
            remove_duplicates: self.remove_duplicates,
            right_key: None,
            right_done: false,
            previous_left: None,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.left_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Except_Ordered"
    }

    fn explain(&self) -> Explain {
        let directions: Vec<&str> = self
            .ascending
            .iter()
            .map(|&a| if a { "ASC" } else { "DESC" })
            .collect();
        explain_with_inputs(self)
            .attr("comparison", directions.join(", "))
            .attr("remove_duplicates", self.remove_duplicates)
    }
}

struct ExceptCursor {
    base: MultiChainedCursor,
    left_type: Arc<RowType>,
    right_type: Arc<RowType>,
    left_fixed_fields: usize,
    right_fixed_fields: usize,
    ascending: Vec<bool>,
    remove_duplicates: bool,
    /// Comparison fields of the unconsumed right row
    right_key: Option<Vec<Datum>>,
    right_done: bool,
    /// Comparison fields of the last left row read
    previous_left: Option<Vec<Datum>>,
}

impl ExceptCursor {
    fn next_left(&mut self) -> ExecutorResult<Option<(Row, Vec<Datum>)>> {
        while let Some(row) = self.base.left.next()? {
            if row.is_type(&self.left_type) {
                let key = comparison_key(&row, self.left_fixed_fields, self.ascending.len());
                return Ok(Some((row, key)));
            }
        }
        Ok(None)
    }

    fn fill_right(&mut self) -> ExecutorResult<()> {
        while self.right_key.is_none() && !self.right_done {
            match self.base.right.next()? {
                Some(row) if row.is_type(&self.right_type) => {
                    self.right_key = Some(comparison_key(
                        &row,
                        self.right_fixed_fields,
                        self.ascending.len(),
                    ));
                }
                Some(_) => {}
                None => self.right_done = true,
            }
        }
        Ok(())
    }

    /// Advance the right side past keys below `key`; true if a right row
    /// equal to `key` was found and consumed
    fn matched(&mut self, key: &[Datum]) -> ExecutorResult<bool> {
        loop {
            self.fill_right()?;
            let order = match &self.right_key {
                None => return Ok(false),
                Some(right) => compare_keys(right, key, &self.ascending),
            };
            match order {
                Ordering::Less => self.right_key = None,
                Ordering::Equal => {
                    self.right_key = None;
                    return Ok(true);
                }
                Ordering::Greater => return Ok(false),
            }
        }
    }

    fn next_output(&mut self) -> ExecutorResult<Option<Row>> {
        while let Some((row, key)) = self.next_left()? {
            let duplicate = self.remove_duplicates && self.previous_left.as_ref() == Some(&key);
            let found = self.matched(&key)?;
            self.previous_left = Some(key);
            if !found && !duplicate {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

impl Cursor for ExceptCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.right_key = None;
        self.right_done = false;
        self.previous_left = None;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = self.next_output()?;
        if row.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("Except_Ordered", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.right_key = None;
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(ExceptCursor, base);
