//! Count_Default
//!
//! Consumes the rows of one type and emits a single row holding their
//! count once the input runs out. Rows of other types pass through.

use std::sync::Arc;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::ExecutorResult;
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{add_derived_type, explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::{RowType, Schema};
use super::{delegate_bindings, BindingsCursor, Cursor};

#[derive(Debug)]
pub struct Count {
    input: Box<dyn Operator>,
    count_type: Arc<RowType>,
    result_type: Arc<RowType>,
}

impl Count {
    pub fn new(schema: &Schema, input: Box<dyn Operator>, count_type: Arc<RowType>) -> Self {
        Self {
            input,
            count_type,
            result_type: schema.new_count_type(),
        }
    }
}

impl Operator for Count {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(CountCursor {
            base: ChainedCursor::new(context, input),
            count_type: self.count_type.clone(),
            result_type: self.result_type.clone(),
            count: 0,
            emitted: false,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.result_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        add_derived_type(types, &self.result_type);
        self.input.find_derived_types(types);
    }

    fn name(&self) -> &'static str {
        "Count_Default"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self).attr("count_type", &self.count_type)
    }
}

struct CountCursor {
    base: ChainedCursor,
    count_type: Arc<RowType>,
    result_type: Arc<RowType>,
    count: i64,
    emitted: bool,
}

impl Cursor for CountCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.count = 0;
        self.emitted = false;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let mut output = None;
        while !self.emitted {
            match self.base.input.next()? {
                Some(row) if row.is_type(&self.count_type) => self.count += 1,
                Some(row) => {
                    output = Some(row);
                    break;
                }
                None => {
                    output = Some(Row::new(self.result_type.clone(), vec![Datum::Int(self.count)]));
                    self.emitted = true;
                }
            }
        }
        if output.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("Count_Default", &output);
        Ok(output)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(CountCursor, base);
