//! Nested-loop map
//!
//! For every outer row, run the inner pipeline with that row bound at a
//! binding position. Two executions are available:
//!
//! - non-pipelined: the inner cursor is reopened at top level for each outer
//!   row, on a child scope holding the row;
//! - pipelined: outer rows become child scopes of a bindings stream
//!   ([`RowToBindingsCursor`]) feeding the inner cursor, and
//!   [`CollapseBindingsCursor`] folds the inner cursor's per-row scopes back
//!   into the outer scopes. Lookahead cursors in the inner pipeline can then
//!   work ahead across outer rows.

use std::sync::Arc;

use tracing::{debug, trace};

use super::bindings::{QueryBindings, SingletonBindingsCursor, SingletonHandle};
use super::context::QueryContext;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::explain::Explain;
use super::lifecycle::{CursorState, Lifecycle};
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::{BindingsCursor, Cursor};

/// Decides, given the scope the input is open on, whether a row gets a
/// child scope
pub type RowFilter = Box<dyn FnMut(&Row, &QueryBindings) -> ExecutorResult<bool>>;

/// Bindings stream with one child scope per row of an input cursor
///
/// Scopes from the input's own stream pass through. When one arrives at
/// `depth - 1` the input is opened on it, and each row it yields becomes a
/// child scope at `depth` holding the row at `position`. With a filter, rows
/// it rejects are skipped.
pub struct RowToBindingsCursor {
    input: Box<dyn Cursor>,
    position: usize,
    depth: usize,
    base: Option<QueryBindings>,
    log_execution: bool,
    filter: Option<RowFilter>,
}

impl RowToBindingsCursor {
    pub fn new(input: Box<dyn Cursor>, position: usize, depth: usize, log_execution: bool) -> Self {
        Self {
            input,
            position,
            depth,
            base: None,
            log_execution,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl BindingsCursor for RowToBindingsCursor {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.base = None;
        self.input.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        if let Some(base) = &self.base {
            while let Some(row) = self.input.next()? {
                if let Some(filter) = self.filter.as_mut() {
                    if !filter(&row, base)? {
                        continue;
                    }
                }
                let bindings = base.create_bindings();
                debug_assert_eq!(bindings.depth(), self.depth);
                bindings.set_row(self.position, row);
                return Ok(Some(bindings));
            }
            self.base = None;
            self.input.close()?;
        }
        let bindings = self.input.next_bindings()?;
        if let Some(b) = &bindings {
            if b.depth() + 1 == self.depth {
                self.base = Some(b.clone());
                self.input.open()?;
            }
        }
        if self.log_execution {
            trace!(scope = ?bindings, "row to bindings");
        }
        Ok(bindings)
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        if self.base.take().is_some() {
            self.input.close()?;
        }
        self.input.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        if self
            .base
            .as_ref()
            .is_some_and(|b| b.is_descendant_of(bindings))
        {
            self.base = None;
            self.input.close()?;
            self.input.cancel_bindings(bindings)?;
        }
        Ok(())
    }
}

/// Row cursor that hides the child scopes of its input's bindings stream
///
/// Opened on an outer scope, it walks the input through every child scope
/// at `depth` and yields their rows. The first shallower scope ends the
/// iteration and is held back for the next `next_bindings`.
///
/// When recovering rows, a child scope whose input yields anything is
/// reported once, as the row bound in it at the recovery position.
pub struct CollapseBindingsCursor {
    context: Arc<QueryContext>,
    input: Box<dyn Cursor>,
    depth: usize,
    lifecycle: Lifecycle,
    current_bindings: Option<QueryBindings>,
    pending_bindings: Option<QueryBindings>,
    /// Outer scope this cursor is open on
    open_bindings: Option<QueryBindings>,
    /// Child scope the input is open on
    input_open_bindings: Option<QueryBindings>,
    recover_position: Option<usize>,
    name: &'static str,
}

impl CollapseBindingsCursor {
    pub fn new(context: &Arc<QueryContext>, input: Box<dyn Cursor>, depth: usize) -> Self {
        Self {
            context: context.clone(),
            input,
            depth,
            lifecycle: Lifecycle::for_context(context),
            current_bindings: None,
            pending_bindings: None,
            open_bindings: None,
            input_open_bindings: None,
            recover_position: None,
            name: "Map_NestedLoops",
        }
    }

    /// Yield the row bound at `position` of each child scope with output
    pub fn recovering_rows(mut self, name: &'static str, position: usize) -> Self {
        self.recover_position = Some(position);
        self.name = name;
        self
    }

    fn clear_if_descendant(slot: &mut Option<QueryBindings>, bindings: &QueryBindings) {
        if slot.as_ref().is_some_and(|b| b.is_descendant_of(bindings)) {
            *slot = None;
        }
    }
}

impl Cursor for CollapseBindingsCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.lifecycle.open()?;
        self.open_bindings = self.current_bindings.clone();
        self.input_open_bindings = None;
        Ok(())
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.lifecycle.begin_next(&self.context)? {
            return Ok(None);
        }
        let mut row = None;
        loop {
            if let Some(open) = self.input_open_bindings.clone() {
                row = self.input.next()?;
                if let (Some(_), Some(position)) = (&row, self.recover_position) {
                    self.input.close()?;
                    self.input_open_bindings = None;
                    row = Some(open.get_row(position)?);
                }
                if row.is_some() {
                    break;
                }
                self.input.close()?;
                self.input_open_bindings = None;
            }
            match self.input.next_bindings()? {
                None => {
                    self.open_bindings = None;
                    break;
                }
                Some(b) if b.depth() == self.depth => {
                    self.input.open()?;
                    self.input_open_bindings = Some(b);
                }
                Some(b) if b.depth() < self.depth => {
                    self.pending_bindings = Some(b);
                    self.open_bindings = None;
                    break;
                }
                Some(b) => {
                    return Err(ExecutorError::internal(format!(
                        "bindings {:?} deeper than {}",
                        b, self.depth
                    )));
                }
            }
        }
        if row.is_none() {
            self.lifecycle.exhaust();
        }
        if self.context.config().log_execution {
            match &row {
                Some(r) => trace!(operator = self.name, row = %r, "yield"),
                None => trace!(operator = self.name, "exhausted"),
            }
        }
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        if !self.input.is_closed() {
            self.input.close()?;
        }
        self.lifecycle.close()?;
        if let Some(open) = self.open_bindings.clone() {
            self.cancel_bindings(&open)?;
        }
        Ok(())
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }
}

impl BindingsCursor for CollapseBindingsCursor {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.pending_bindings = None;
        self.current_bindings = None;
        self.input.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        self.lifecycle.check_closed("next_bindings")?;
        if let Some(pending) = self.pending_bindings.take() {
            self.current_bindings = Some(pending.clone());
            return Ok(Some(pending));
        }
        loop {
            let bindings = self.input.next_bindings()?;
            match &bindings {
                Some(b) if b.depth() >= self.depth => continue,
                _ => {
                    self.current_bindings = bindings.clone();
                    return Ok(bindings);
                }
            }
        }
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        self.input.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.lifecycle.check_closed("cancel_bindings")?;
        self.input.cancel_bindings(bindings)?;
        Self::clear_if_descendant(&mut self.input_open_bindings, bindings);
        Self::clear_if_descendant(&mut self.open_bindings, bindings);
        Self::clear_if_descendant(&mut self.pending_bindings, bindings);
        Ok(())
    }
}

/// Map_NestedLoops
#[derive(Debug)]
pub struct NestedLoops {
    outer: Box<dyn Operator>,
    inner: Box<dyn Operator>,
    binding_position: usize,
    pipeline: bool,
    depth: usize,
}

impl NestedLoops {
    /// `depth` is the depth of the per-row scopes; it must be positive for a
    /// pipelined map
    pub fn new(
        outer: Box<dyn Operator>,
        inner: Box<dyn Operator>,
        binding_position: usize,
        pipeline: bool,
        depth: usize,
    ) -> ExecutorResult<Self> {
        if pipeline {
            check_argument(depth > 0, || format!("depth must be positive, got {}", depth))?;
        }
        Ok(Self {
            outer,
            inner,
            binding_position,
            pipeline,
            depth,
        })
    }
}

impl Operator for NestedLoops {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        if !self.pipeline {
            return Ok(Box::new(MapExecution::new(context, self, bindings)?));
        }
        let outer = self.outer.cursor(context, bindings)?;
        let to_bindings = RowToBindingsCursor::new(
            outer,
            self.binding_position,
            self.depth,
            context.config().log_execution,
        );
        let inner = self.inner.cursor(context, Box::new(to_bindings))?;
        Ok(Box::new(CollapseBindingsCursor::new(context, inner, self.depth)))
    }

    fn row_type(&self) -> Option<Arc<super::row_type::RowType>> {
        self.inner.row_type()
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.outer.as_ref(), self.inner.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Map_NestedLoops"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
            .attr("binding_position", self.binding_position)
            .attr("pipeline", self.pipeline)
            .attr("depth", self.depth)
    }
}

/// Non-pipelined map: reopen the inner cursor for each outer row
struct MapExecution {
    context: Arc<QueryContext>,
    outer: Box<dyn Cursor>,
    inner: Box<dyn Cursor>,
    inner_bindings: SingletonHandle,
    binding_position: usize,
    lifecycle: Lifecycle,
    outer_row: Option<Row>,
    outer_bindings: Option<QueryBindings>,
}

impl MapExecution {
    fn new(
        context: &Arc<QueryContext>,
        op: &NestedLoops,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Self> {
        let outer = op.outer.cursor(context, bindings)?;
        let singleton = SingletonBindingsCursor::new(None);
        let inner_bindings = singleton.handle();
        let inner = op.inner.cursor(context, Box::new(singleton))?;
        Ok(Self {
            context: context.clone(),
            outer,
            inner,
            inner_bindings,
            binding_position: op.binding_position,
            lifecycle: Lifecycle::for_context(context),
            outer_row: None,
            outer_bindings: None,
        })
    }

    fn next_output_row(&mut self) -> ExecutorResult<Option<Row>> {
        if self.outer_row.is_none() {
            return Ok(None);
        }
        let row = self.inner.next()?;
        if row.is_none() {
            self.outer_row = None;
        }
        Ok(row)
    }

    fn start_inner_loop(&mut self, row: Row) -> ExecutorResult<()> {
        if !self.inner.is_closed() {
            self.inner.close_top_level()?;
        }
        let outer_bindings = self
            .outer_bindings
            .as_ref()
            .ok_or_else(|| ExecutorError::internal("nested loop opened without bindings"))?;
        let scope = outer_bindings.create_bindings();
        scope.set_row(self.binding_position, row);
        self.inner_bindings.reset(scope);
        self.inner.open_top_level()
    }
}

impl Cursor for MapExecution {
    fn open(&mut self) -> ExecutorResult<()> {
        self.lifecycle.open()?;
        debug!(operator = "Map_NestedLoops", "open");
        self.outer.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.lifecycle.begin_next(&self.context)? {
            return Ok(None);
        }
        let mut output = None;
        while output.is_none() && self.outer.is_active() {
            output = self.next_output_row()?;
            if output.is_none() {
                if let Some(row) = self.outer.next()? {
                    self.outer_row = Some(row.clone());
                    self.start_inner_loop(row)?;
                }
            }
        }
        if output.is_none() {
            self.lifecycle.exhaust();
        }
        if self.context.config().log_execution {
            match &output {
                Some(r) => trace!(operator = "Map_NestedLoops", row = %r, "yield"),
                None => trace!(operator = "Map_NestedLoops", "exhausted"),
            }
        }
        Ok(output)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        if self.lifecycle.state().is_open() {
            debug!(operator = "Map_NestedLoops", "close");
        }
        self.lifecycle.close()?;
        if !self.inner.is_closed() {
            self.inner.close_top_level()?;
        }
        self.outer_row = None;
        self.outer.close()
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }
}

impl BindingsCursor for MapExecution {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.outer.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        self.lifecycle.check_closed("next_bindings")?;
        self.outer_bindings = self.outer.next_bindings()?;
        Ok(self.outer_bindings.clone())
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        self.outer.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.lifecycle.check_closed("cancel_bindings")?;
        self.inner.close()?;
        self.outer.cancel_bindings(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::executor::eval::{BinaryOp, Expression};
    use crate::executor::scan::ValuesScan;
    use crate::executor::test_util::{int_type, ints, run, test_context, values};

    fn inner_op(ctx: &Arc<QueryContext>) -> Box<dyn Operator> {
        let t = int_type(ctx.schema(), 2);
        let outer_key = Expression::bound_field(0, 0, DataType::BigInt);
        Box::new(
            ValuesScan::from_expressions(
                t,
                vec![
                    vec![outer_key.clone(), Expression::literal(1i64)],
                    vec![
                        outer_key.clone(),
                        Expression::binary(BinaryOp::Mul, outer_key, Expression::literal(10i64)),
                    ],
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_nested_loops_both_modes_agree() {
        let ctx = test_context();
        let outer_t = int_type(ctx.schema(), 1);
        let expected = vec![
            vec![1, 1],
            vec![1, 10],
            vec![2, 1],
            vec![2, 20],
            vec![3, 1],
            vec![3, 30],
        ];
        for pipeline in [false, true] {
            let map = NestedLoops::new(
                values(&outer_t, &[&[1], &[2], &[3]]),
                inner_op(&ctx),
                0,
                pipeline,
                1,
            )
            .unwrap();
            assert_eq!(ints(&run(&ctx, &map).unwrap()), expected, "pipeline {}", pipeline);
        }
    }

    #[test]
    fn test_nested_loops_empty_outer() {
        let ctx = test_context();
        let outer_t = int_type(ctx.schema(), 1);
        for pipeline in [false, true] {
            let map = NestedLoops::new(values(&outer_t, &[]), inner_op(&ctx), 0, pipeline, 1).unwrap();
            assert!(run(&ctx, &map).unwrap().is_empty());
        }
    }

    #[test]
    fn test_nested_loops_two_levels_pipelined() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        // inner map binds rows of a second values scan at depth 2
        let innermost = Box::new(
            ValuesScan::from_expressions(
                int_type(ctx.schema(), 2),
                vec![vec![
                    Expression::bound_field(0, 0, DataType::BigInt),
                    Expression::bound_field(1, 0, DataType::BigInt),
                ]],
            )
            .unwrap(),
        );
        let middle = NestedLoops::new(values(&t, &[&[7], &[8]]), innermost, 1, true, 2).unwrap();
        let map = NestedLoops::new(values(&t, &[&[1], &[2]]), Box::new(middle), 0, true, 1).unwrap();
        assert_eq!(
            ints(&run(&ctx, &map).unwrap()),
            vec![vec![1, 7], vec![1, 8], vec![2, 7], vec![2, 8]]
        );
    }

    #[test]
    fn test_pipelined_requires_depth() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        assert!(NestedLoops::new(values(&t, &[]), values(&t, &[]), 0, true, 0).is_err());
        assert!(NestedLoops::new(values(&t, &[]), values(&t, &[]), 0, false, 0).is_ok());
    }

    #[test]
    fn test_explain_lists_inputs() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let map = NestedLoops::new(values(&t, &[]), values(&t, &[]), 3, true, 1).unwrap();
        let e = map.explain();
        assert_eq!(e.name, "Map_NestedLoops");
        assert_eq!(e.get("binding_position"), Some("3"));
        assert_eq!(e.inputs.len(), 2);
    }
}
