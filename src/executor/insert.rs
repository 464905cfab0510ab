//! Insert_Returning
//!
//! Writes every input row through the store adapter and returns it.

use std::sync::Arc;

use tracing::debug;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::error::ExecutorResult;
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

#[derive(Debug)]
pub struct Insert {
    input: Box<dyn Operator>,
}

impl Insert {
    pub fn new(input: Box<dyn Operator>) -> Self {
        Insert { input }
    }
}

impl Operator for Insert {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(InsertCursor {
            base: ChainedCursor::new(context, input),
            rows_inserted: 0,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.input.row_type()
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Insert_Returning"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
    }
}

struct InsertCursor {
    base: ChainedCursor,
    rows_inserted: u64,
}

impl Cursor for InsertCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.rows_inserted = 0;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = self.base.input.next()?;
        match &row {
            Some(row) => {
                self.base.context.adapter().write_row(row)?;
                self.rows_inserted += 1;
            }
            None => {
                debug!(rows = self.rows_inserted, "insert finished");
                self.base.exhaust();
            }
        }
        self.base.log_yield("Insert_Returning", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(InsertCursor, base);
