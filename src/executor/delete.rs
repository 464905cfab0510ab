//! Delete_Returning
//!
//! Deletes every input row through the store adapter and returns it. With
//! cascading, the row's descendants in its group go too.

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
pub struct Delete {
    input: Box<dyn Operator>,
    cascade: bool,
}

impl Delete {
    pub fn new(input: Box<dyn Operator>, cascade: bool) -> Self {
        Delete { input, cascade }
    }
}

impl Operator for Delete {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(DeleteCursor {
            base: ChainedCursor::new(context, input),
            cascade: self.cascade,
            rows_deleted: 0,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.input.row_type()
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Delete_Returning"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self).attr("cascade", self.cascade)
    }
}

struct DeleteCursor {
    base: ChainedCursor,
    cascade: bool,
    rows_deleted: u64,
}

impl Cursor for DeleteCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.rows_deleted = 0;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = self.base.input.next()?;
        match &row {
            Some(row) => {
                self.base.context.adapter().delete_row(row, self.cascade)?;
                self.rows_deleted += 1;
            }
            None => {
                debug!(rows = self.rows_deleted, cascade = self.cascade, "delete finished");
                self.base.exhaust();
            }
        }
        self.base.log_yield("Delete_Returning", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(DeleteCursor, base);
