//! Product_Nested
//!
//! Inner side of a nested-loop product. Each input row of the inner type
//! is joined with the outer row bound at a binding position, giving a row
//! of the product type. Rows of other types pass through.

use std::sync::Arc;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::error::{ExecutorError, ExecutorResult};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{add_derived_type, explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::{RowType, Schema};
use super::{delegate_bindings, BindingsCursor, Cursor};

#[derive(Debug)]
pub struct NestedProduct {
    input: Box<dyn Operator>,
    outer_type: Arc<RowType>,
    inner_type: Arc<RowType>,
    binding_position: usize,
    product_type: Arc<RowType>,
}

impl NestedProduct {
    pub fn new(
        schema: &Schema,
        input: Box<dyn Operator>,
        outer_type: Arc<RowType>,
        inner_type: Arc<RowType>,
        binding_position: usize,
    ) -> Self {
        let product_type = schema.new_product_type(&outer_type, &inner_type);
        Self {
            input,
            outer_type,
            inner_type,
            binding_position,
            product_type,
        }
    }
}

impl Operator for NestedProduct {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(ProductCursor {
            base: ChainedCursor::new(context, input),
            outer_type: self.outer_type.clone(),
            inner_type: self.inner_type.clone(),
            binding_position: self.binding_position,
            product_type: self.product_type.clone(),
            outer_row: None,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.product_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        add_derived_type(types, &self.product_type);
        self.input.find_derived_types(types);
    }

    fn name(&self) -> &'static str {
        "Product_Nested"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
            .attr("outer_type", &self.outer_type)
            .attr("inner_type", &self.inner_type)
            .attr("binding_position", self.binding_position)
    }
}

struct ProductCursor {
    base: ChainedCursor,
    outer_type: Arc<RowType>,
    inner_type: Arc<RowType>,
    binding_position: usize,
    product_type: Arc<RowType>,
    /// Outer row of the current scope, read on first use
    outer_row: Option<Row>,
}

impl ProductCursor {
    fn outer_row(&mut self) -> ExecutorResult<&Row> {
        if self.outer_row.is_none() {
            let row = self.base.current_bindings()?.get_row(self.binding_position)?;
            if !row.is_type(&self.outer_type) {
                return Err(ExecutorError::TypeMismatch {
                    expected: self.outer_type.to_string(),
                    got: row.row_type().to_string(),
                });
            }
            self.outer_row = Some(row);
        }
        self.outer_row
            .as_ref()
            .ok_or_else(|| ExecutorError::internal("outer row missing"))
    }

    fn combine(&mut self, inner: Row) -> ExecutorResult<Row> {
        let product_type = self.product_type.clone();
        let mut values = self.outer_row()?.values().to_vec();
        values.extend(inner.into_values());
        Ok(Row::new(product_type, values))
    }
}

impl Cursor for ProductCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.outer_row = None;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = match self.base.input.next()? {
            Some(row) if row.is_type(&self.inner_type) => Some(self.combine(row)?),
            Some(row) => Some(row),
            None => {
                self.base.exhaust();
                None
            }
        };
        self.base.log_yield("Product_Nested", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.outer_row = None;
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(ProductCursor, base);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::filter::Filter;
    use crate::executor::nested_loops::NestedLoops;
    use crate::executor::test_util::{int_type, ints, run, test_context, values};

    #[test]
    fn test_product_with_bound_outer_row() {
        let ctx = test_context();
        let outer = int_type(ctx.schema(), 1);
        let inner = int_type(ctx.schema(), 2);
        let product = NestedProduct::new(
            ctx.schema(),
            values(&inner, &[&[10, 11], &[20, 21]]),
            outer.clone(),
            inner.clone(),
            0,
        );
        let product_type = product.row_type().unwrap();
        assert_eq!(product_type.nfields(), 3);
        let loops = NestedLoops::new(values(&outer, &[&[1], &[2]]), Box::new(product), 0, false, 0)
            .unwrap();
        let rows = run(&ctx, &loops).unwrap();
        assert_eq!(
            ints(&rows),
            vec![vec![1, 10, 11], vec![1, 20, 21], vec![2, 10, 11], vec![2, 20, 21]]
        );
        assert!(rows.iter().all(|r| r.is_type(&product_type)));
    }

    #[test]
    fn test_outer_type_checked() {
        let ctx = test_context();
        let outer = int_type(ctx.schema(), 1);
        let wrong = int_type(ctx.schema(), 1);
        let inner = int_type(ctx.schema(), 1);
        let product = NestedProduct::new(ctx.schema(), values(&inner, &[&[5]]), outer, inner.clone(), 0);
        let loops = NestedLoops::new(values(&wrong, &[&[1]]), Box::new(product), 0, false, 0).unwrap();
        assert!(matches!(run(&ctx, &loops), Err(ExecutorError::TypeMismatch { .. })));

        // no inner rows reach the product, so the outer row is never read
        let empty = NestedProduct::new(
            ctx.schema(),
            Box::new(Filter::new(values(&inner, &[&[5]]), vec![wrong.clone()]).unwrap()),
            wrong.clone(),
            inner,
            0,
        );
        let loops = NestedLoops::new(values(&wrong, &[&[1]]), Box::new(empty), 0, false, 0).unwrap();
        assert!(run(&ctx, &loops).unwrap().is_empty());
    }
}
