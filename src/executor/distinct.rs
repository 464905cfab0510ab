//! Distinct_Partial
//!
//! Drops a row of the distinct type when it equals the previous row of
//! that type. Only adjacent duplicates are caught; sorted input makes the
//! result fully distinct.

use std::sync::Arc;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::ExecutorResult;
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

#[derive(Debug)]
pub struct Distinct {
    input: Box<dyn Operator>,
    distinct_type: Arc<RowType>,
}

impl Distinct {
    pub fn new(input: Box<dyn Operator>, distinct_type: Arc<RowType>) -> Self {
        Self {
            input,
            distinct_type,
        }
    }
}

impl Operator for Distinct {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(DistinctCursor {
            base: ChainedCursor::new(context, input),
            distinct_type: self.distinct_type.clone(),
            previous: None,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.distinct_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Distinct_Partial"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self).attr("row_type", &self.distinct_type)
    }
}

struct DistinctCursor {
    base: ChainedCursor,
    distinct_type: Arc<RowType>,
    /// Values of the last emitted row of the distinct type
    previous: Option<Vec<Datum>>,
}

impl DistinctCursor {
    fn is_duplicate(&mut self, row: &Row) -> bool {
        if !row.is_type(&self.distinct_type) {
            return false;
        }
        if self.previous.as_deref() == Some(row.values()) {
            return true;
        }
        self.previous = Some(row.values().to_vec());
        false
    }
}

impl Cursor for DistinctCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.previous = None;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let mut output = None;
        while let Some(row) = self.base.input.next()? {
            if !self.is_duplicate(&row) {
                output = Some(row);
                break;
            }
        }
        if output.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("Distinct_Partial", &output);
        Ok(output)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.previous = None;
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(DistinctCursor, base);
