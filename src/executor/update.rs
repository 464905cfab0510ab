//! Update_Returning
//!
//! Rewrites selected input rows through the store adapter and returns the
//! new version. Rows the update function does not select pass through.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::bindings::QueryBindings;
use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::error::{check_argument, ExecutorResult};
use super::eval::Expression;
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

/// Computes the new version of a row
pub trait UpdateFunction: fmt::Debug {
    fn row_is_selected(&self, row: &Row) -> bool;

    fn evaluate(
        &self,
        original: &Row,
        bindings: &QueryBindings,
        context: &QueryContext,
    ) -> ExecutorResult<Row>;
}

/// Assigns expression results to fields of rows of one type
#[derive(Debug, Clone)]
pub struct ExpressionUpdate {
    row_type: Arc<RowType>,
    assignments: Vec<(usize, Expression)>,
}

impl ExpressionUpdate {
    pub fn new(row_type: Arc<RowType>, assignments: Vec<(usize, Expression)>) -> ExecutorResult<Self> {
        for (field, _) in &assignments {
            check_argument(*field < row_type.nfields(), || {
                format!("field {} out of range for {}", field, row_type)
            })?;
        }
        Ok(Self {
            row_type,
            assignments,
        })
    }
}

impl UpdateFunction for ExpressionUpdate {
    fn row_is_selected(&self, row: &Row) -> bool {
        row.is_type(&self.row_type)
    }

    fn evaluate(
        &self,
        original: &Row,
        bindings: &QueryBindings,
        context: &QueryContext,
    ) -> ExecutorResult<Row> {
        let mut updated = original.clone();
        for (field, expr) in &self.assignments {
            // every assignment sees the original values
            let value = expr.evaluate(Some(original), bindings, context)?;
            updated.set(*field, value)?;
        }
        Ok(updated)
    }
}

#[derive(Debug)]
pub struct Update {
    input: Box<dyn Operator>,
    function: Arc<dyn UpdateFunction>,
}

impl Update {
    pub fn new(input: Box<dyn Operator>, function: Arc<dyn UpdateFunction>) -> Self {
        Update { input, function }
    }
}

impl Operator for Update {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(UpdateCursor {
            base: ChainedCursor::new(context, input),
            function: self.function.clone(),
            rows_updated: 0,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.input.row_type()
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Update_Returning"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self).attr("function", format!("{:?}", self.function))
    }
}

struct UpdateCursor {
    base: ChainedCursor,
    function: Arc<dyn UpdateFunction>,
    rows_updated: u64,
}

impl UpdateCursor {
    fn update(&mut self, row: Row) -> ExecutorResult<Row> {
        if !self.function.row_is_selected(&row) {
            return Ok(row);
        }
        let bindings = self.base.current_bindings()?;
        let updated = self.function.evaluate(&row, bindings, &self.base.context)?;
        self.base.context.adapter().update_row(&row, &updated)?;
        self.rows_updated += 1;
        Ok(updated)
    }
}

impl Cursor for UpdateCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.rows_updated = 0;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = match self.base.input.next()? {
            Some(row) => Some(self.update(row)?),
            None => {
                debug!(rows = self.rows_updated, "update finished");
                self.base.exhaust();
                None
            }
        };
        self.base.log_yield("Update_Returning", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(UpdateCursor, base);
