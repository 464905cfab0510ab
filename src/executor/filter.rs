//! Row filters
//!
//! `Filter_Default` keeps rows of listed types. `Select_HKeyOrdered` tests a
//! predicate on rows of one type and drops the descendants of rejected
//! rows along with them; it relies on the input arriving in hkey order.

use std::sync::Arc;

use crate::catalog::Group;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::error::{check_argument, ExecutorResult};
use super::eval::{is_true, Expression};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

/// Filter_Default
#[derive(Debug)]
pub struct Filter {
    input: Box<dyn Operator>,
    keep_types: Vec<Arc<RowType>>,
}

impl Filter {
    pub fn new(input: Box<dyn Operator>, keep_types: Vec<Arc<RowType>>) -> ExecutorResult<Self> {
        check_argument(!keep_types.is_empty(), || {
            "filter needs at least one type to keep".to_string()
        })?;
        Ok(Self { input, keep_types })
    }
}

impl Operator for Filter {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(FilterCursor {
            base: ChainedCursor::new(context, input),
            keep_types: self.keep_types.clone(),
        }))
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Filter_Default"
    }

    fn explain(&self) -> Explain {
        let types: Vec<String> = self.keep_types.iter().map(|t| t.to_string()).collect();
        explain_with_inputs(self).attr("keep", types.join(", "))
    }
}

struct FilterCursor {
    base: ChainedCursor,
    keep_types: Vec<Arc<RowType>>,
}

impl Cursor for FilterCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = loop {
            match self.base.input.next()? {
                Some(row) if self.keep_types.iter().any(|t| row.is_type(t)) => break Some(row),
                Some(_) => continue,
                None => break None,
            }
        };
        if row.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("Filter_Default", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(FilterCursor, base);

/// Select_HKeyOrdered
#[derive(Debug)]
pub struct Select {
    input: Box<dyn Operator>,
    group: Option<Arc<Group>>,
    predicate_type: Arc<RowType>,
    predicate: Expression,
}

impl Select {
    pub fn new(
        input: Box<dyn Operator>,
        predicate_type: Arc<RowType>,
        predicate: Expression,
    ) -> Self {
        Self {
            input,
            group: None,
            predicate_type,
            predicate,
        }
    }

    /// Also drop rows of descendant tables under rejected rows; needs the
    /// group to tell descendants apart from unrelated rows
    #[must_use]
    pub fn with_group(mut self, group: Arc<Group>) -> Self {
        self.group = Some(group);
        self
    }
}

impl Operator for Select {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(SelectCursor {
            base: ChainedCursor::new(context, input),
            group: self.group.clone(),
            predicate_type: self.predicate_type.clone(),
            predicate: self.predicate.clone(),
            selected: None,
        }))
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Select_HKeyOrdered"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
            .attr("row_type", &self.predicate_type)
            .attr("predicate", &self.predicate)
    }
}

struct SelectCursor {
    base: ChainedCursor,
    group: Option<Arc<Group>>,
    predicate_type: Arc<RowType>,
    predicate: Expression,
    /// Most recent row of the predicate type that passed
    selected: Option<Row>,
}

impl SelectCursor {
    /// True if `row` lies below the predicate type's table
    fn is_descendant(&self, row: &Row) -> bool {
        let (group, table) = match (&self.group, self.predicate_type.table()) {
            (Some(g), Some(t)) => (g, t),
            _ => return false,
        };
        row.row_type()
            .table()
            .is_some_and(|t| group.is_ancestor(table, t))
    }

    fn accept(&mut self, row: &Row) -> ExecutorResult<bool> {
        if row.is_type(&self.predicate_type) {
            let bindings = self.base.current_bindings()?;
            let pass = is_true(&self.predicate.evaluate(Some(row), bindings, &self.base.context)?);
            self.selected = pass.then(|| row.clone());
            return Ok(pass);
        }
        if self.is_descendant(row) {
            let under_selected = match (&self.selected, row.hkey()) {
                (Some(selected), Some(hkey)) => selected.hkey().is_some_and(|s| s.is_prefix_of(hkey)),
                _ => false,
            };
            return Ok(under_selected);
        }
        Ok(true)
    }
}

impl Cursor for SelectCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.selected = None;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let mut output = None;
        while let Some(row) = self.base.input.next()? {
            if self.accept(&row)? {
                output = Some(row);
                break;
            }
        }
        if output.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("Select_HKeyOrdered", &output);
        Ok(output)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.selected = None;
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(SelectCursor, base);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scan::GroupScan;
    use crate::executor::test_util::{int_type, ints, keys, run, test_context, values, Coi};
    use crate::executor::ExecutionConfig;

    #[test]
    fn test_filter_keeps_listed_types() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let filter = Filter::new(
            Box::new(GroupScan::new(coi.group.clone())),
            vec![coi.customer_type(), coi.item_type()],
        )
        .unwrap();
        let rows = run(&ctx, &filter).unwrap();
        assert_eq!(keys(&rows), vec![1, 100, 101, 110, 2, 300, 4]);
        assert!(Filter::new(Box::new(GroupScan::new(coi.group.clone())), vec![]).is_err());
    }

    #[test]
    fn test_select_drops_descendants_of_rejected_rows() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        // orders with amount > 150, and everything not below an order
        let select = Select::new(
            Box::new(GroupScan::new(coi.group.clone())),
            coi.order_type(),
            Expression::gt(Expression::field(2), Expression::literal(150i64)),
        )
        .with_group(coi.group.clone());
        let rows = run(&ctx, &select).unwrap();
        // o10 (300) keeps its items, o11 (100) and o30 (50) lose theirs
        assert_eq!(keys(&rows), vec![1, 10, 100, 101, 2, 20, 4]);
    }

    #[test]
    fn test_select_without_group_passes_other_types() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let other = int_type(ctx.schema(), 1);
        let input = values(&t, &[&[1], &[5], &[3]]);
        let select = Select::new(
            input,
            t.clone(),
            Expression::lt(Expression::field(0), Expression::literal(4i64)),
        );
        assert_eq!(ints(&run(&ctx, &select).unwrap()), vec![vec![1], vec![3]]);
        let select = Select::new(
            values(&other, &[&[9]]),
            t,
            Expression::literal(false),
        );
        assert_eq!(ints(&run(&ctx, &select).unwrap()), vec![vec![9]]);
    }
}
