//! IfEmpty_Default
//!
//! Substitutes one row computed from expressions when the input yields no
//! rows in a scope.

use std::sync::Arc;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::error::{check_argument, ExecutorResult};
use super::eval::{evaluate_all, Expression};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{explain_with_inputs, InputPreservation, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

#[derive(Debug)]
pub struct IfEmpty {
    input: Box<dyn Operator>,
    row_type: Arc<RowType>,
    expressions: Vec<Expression>,
    preservation: InputPreservation,
}

impl IfEmpty {
    pub fn new(
        input: Box<dyn Operator>,
        row_type: Arc<RowType>,
        expressions: Vec<Expression>,
        preservation: InputPreservation,
    ) -> ExecutorResult<Self> {
        check_argument(expressions.len() == row_type.nfields(), || {
            format!(
                "{} expressions for {} fields of {}",
                expressions.len(),
                row_type.nfields(),
                row_type
            )
        })?;
        Ok(Self {
            input,
            row_type,
            expressions,
            preservation,
        })
    }
}

impl Operator for IfEmpty {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(IfEmptyCursor {
            base: ChainedCursor::new(context, input),
            row_type: self.row_type.clone(),
            expressions: self.expressions.clone(),
            preservation: self.preservation,
            input_state: InputState::Unknown,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.row_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "IfEmpty_Default"
    }

    fn explain(&self) -> Explain {
        let exprs: Vec<String> = self.expressions.iter().map(|e| e.to_string()).collect();
        explain_with_inputs(self)
            .attr("expressions", exprs.join(", "))
            .attr("preservation", format!("{:?}", self.preservation))
    }
}

/// What has been seen of the input in the current scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    Unknown,
    NonEmpty,
    Done,
}

struct IfEmptyCursor {
    base: ChainedCursor,
    row_type: Arc<RowType>,
    expressions: Vec<Expression>,
    preservation: InputPreservation,
    input_state: InputState,
}

impl IfEmptyCursor {
    fn substitute(&self) -> ExecutorResult<Row> {
        let bindings = self.base.current_bindings()?;
        let values = evaluate_all(&self.expressions, None, bindings, &self.base.context)?;
        Ok(Row::new(self.row_type.clone(), values))
    }

    fn advance(&mut self) -> ExecutorResult<Option<Row>> {
        match self.input_state {
            InputState::Done => Ok(None),
            InputState::Unknown => match self.base.input.next()? {
                None => {
                    self.input_state = InputState::Done;
                    self.substitute().map(Some)
                }
                Some(row) => {
                    self.input_state = InputState::NonEmpty;
                    if self.preservation == InputPreservation::KeepInput {
                        Ok(Some(row))
                    } else {
                        self.input_state = InputState::Done;
                        Ok(None)
                    }
                }
            },
            InputState::NonEmpty => {
                let row = self.base.input.next()?;
                if row.is_none() {
                    self.input_state = InputState::Done;
                }
                Ok(row)
            }
        }
    }
}

impl Cursor for IfEmptyCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.input_state = InputState::Unknown;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = self.advance()?;
        if row.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("IfEmpty_Default", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(IfEmptyCursor, base);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::executor::datum::Datum;
    use crate::executor::nested_loops::NestedLoops;
    use crate::executor::test_util::{int_type, ints, run, test_context, values};

    #[test]
    fn test_substitute_on_empty_input() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 2);
        let op = IfEmpty::new(
            values(&t, &[]),
            t.clone(),
            vec![Expression::literal(0i64), Expression::null()],
            InputPreservation::KeepInput,
        )
        .unwrap();
        let rows = run(&ctx, &op).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values(), &[Datum::Int(0), Datum::Null]);
    }

    #[test]
    fn test_nonempty_input() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let keep = IfEmpty::new(
            values(&t, &[&[1], &[2]]),
            t.clone(),
            vec![Expression::literal(0i64)],
            InputPreservation::KeepInput,
        )
        .unwrap();
        assert_eq!(ints(&run(&ctx, &keep).unwrap()), vec![vec![1], vec![2]]);

        let discard = IfEmpty::new(
            values(&t, &[&[1], &[2]]),
            t.clone(),
            vec![Expression::literal(0i64)],
            InputPreservation::DiscardInput,
        )
        .unwrap();
        assert!(run(&ctx, &discard).unwrap().is_empty());
        assert!(IfEmpty::new(values(&t, &[]), t, vec![], InputPreservation::KeepInput).is_err());
    }

    #[test]
    fn test_substitute_per_scope() {
        let ctx = test_context();
        let outer_type = int_type(ctx.schema(), 1);
        let inner_type = int_type(ctx.schema(), 1);
        // inner is empty in every scope; the substitute reads the outer row
        let inner = IfEmpty::new(
            values(&inner_type, &[]),
            inner_type.clone(),
            vec![Expression::bound_field(0, 0, DataType::BigInt)],
            InputPreservation::KeepInput,
        )
        .unwrap();
        let loops = NestedLoops::new(
            values(&outer_type, &[&[7], &[8]]),
            Box::new(inner),
            0,
            false,
            0,
        )
        .unwrap();
        assert_eq!(ints(&run(&ctx, &loops).unwrap()), vec![vec![7], vec![8]]);
    }
}
