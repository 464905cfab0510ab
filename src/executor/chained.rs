//! Composition bases for cursors
//!
//! - [`ChainedCursor`]: one input cursor; forwards the bindings stream.
//! - [`MultiChainedCursor`]: two inputs opened against the same scope.
//! - [`LeafCursor`]: no input cursor; drives the bindings stream itself
//!   and reopens a storage-level source per scope.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::storage::ColumnSelector;

use super::bindings::{MultipleBindingsCursor, QueryBindings};
use super::context::QueryContext;
use super::error::{ExecutorError, ExecutorResult};
use super::lifecycle::{CursorState, Lifecycle};
use super::operator::Operator;
use super::row::Row;
use super::{BindingsCursor, Cursor};

/// State shared by single-input cursors
pub struct ChainedCursor {
    pub context: Arc<QueryContext>,
    pub input: Box<dyn Cursor>,
    pub lifecycle: Lifecycle,
    /// Scope most recently returned by `next_bindings`
    pub bindings: Option<QueryBindings>,
}

impl ChainedCursor {
    pub fn new(context: &Arc<QueryContext>, input: Box<dyn Cursor>) -> Self {
        Self {
            lifecycle: Lifecycle::for_context(context),
            context: context.clone(),
            input,
            bindings: None,
        }
    }

    pub fn open(&mut self) -> ExecutorResult<()> {
        self.lifecycle.open()?;
        self.input.open()
    }

    /// Shared `next()` prologue; false means the cursor is idle
    pub fn begin_next(&self) -> ExecutorResult<bool> {
        self.lifecycle.begin_next(&self.context)
    }

    pub fn exhaust(&mut self) {
        self.lifecycle.exhaust();
    }

    pub fn close(&mut self) -> ExecutorResult<()> {
        let was_open = !self.lifecycle.is_closed();
        self.lifecycle.close()?;
        if was_open {
            self.input.close()?;
        }
        Ok(())
    }

    pub fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    /// The current scope, or an error if no scope has been taken yet
    pub fn current_bindings(&self) -> ExecutorResult<&QueryBindings> {
        self.bindings
            .as_ref()
            .ok_or_else(|| ExecutorError::internal("cursor opened without bindings"))
    }

    /// Trace a row on its way out, when execution logging is on
    pub fn log_yield(&self, operator: &'static str, row: &Option<Row>) {
        if self.context.config().log_execution {
            match row {
                Some(r) => trace!(operator, row = %r, "yield"),
                None => trace!(operator, "exhausted"),
            }
        }
    }
}

impl BindingsCursor for ChainedCursor {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.bindings = None;
        self.input.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        self.lifecycle.check_closed("next_bindings")?;
        let bindings = self.input.next_bindings()?;
        self.bindings = bindings.clone();
        Ok(bindings)
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        self.bindings = None;
        self.input.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.lifecycle.check_closed("cancel_bindings")?;
        self.input.cancel_bindings(bindings)
    }
}

/// State shared by two-input cursors
///
/// Both inputs read the same scopes through a shared
/// [`MultipleBindingsCursor`]; this cursor owns the underlying stream.
pub struct MultiChainedCursor {
    pub context: Arc<QueryContext>,
    pub left: Box<dyn Cursor>,
    pub right: Box<dyn Cursor>,
    bindings_cursor: MultipleBindingsCursor,
    pub lifecycle: Lifecycle,
    pub bindings: Option<QueryBindings>,
}

impl MultiChainedCursor {
    /// Build both input cursors over one shared bindings stream
    pub fn new(
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
        left: &dyn Operator,
        right: &dyn Operator,
    ) -> ExecutorResult<Self> {
        let bindings_cursor = MultipleBindingsCursor::new(bindings);
        let left = left.cursor(context, Box::new(bindings_cursor.new_consumer()))?;
        let right = right.cursor(context, Box::new(bindings_cursor.new_consumer()))?;
        Ok(Self {
            context: context.clone(),
            left,
            right,
            bindings_cursor,
            lifecycle: Lifecycle::for_context(context),
            bindings: None,
        })
    }

    /// Open both inputs
    pub fn open(&mut self) -> ExecutorResult<()> {
        self.lifecycle.open()?;
        self.left.open()?;
        self.right.open()
    }

    pub fn begin_next(&self) -> ExecutorResult<bool> {
        self.lifecycle.begin_next(&self.context)
    }

    pub fn exhaust(&mut self) {
        self.lifecycle.exhaust();
    }

    pub fn close(&mut self) -> ExecutorResult<()> {
        let was_open = !self.lifecycle.is_closed();
        self.lifecycle.close()?;
        if was_open {
            let left = self.left.close();
            self.right.close()?;
            left?;
        }
        Ok(())
    }

    pub fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    pub fn log_yield(&self, operator: &'static str, row: &Option<Row>) {
        if self.context.config().log_execution {
            match row {
                Some(r) => trace!(operator, row = %r, "yield"),
                None => trace!(operator, "exhausted"),
            }
        }
    }
}

impl BindingsCursor for MultiChainedCursor {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.bindings = None;
        self.bindings_cursor.open_bindings()?;
        self.left.open_bindings()?;
        self.right.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        self.lifecycle.check_closed("next_bindings")?;
        let bindings = self.bindings_cursor.next_bindings()?;
        let left = self.left.next_bindings()?;
        let right = self.right.next_bindings()?;
        if left != bindings || right != bindings {
            return Err(ExecutorError::internal(
                "inputs of a two-input cursor diverged in their bindings",
            ));
        }
        self.bindings = bindings.clone();
        Ok(bindings)
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        self.bindings = None;
        self.bindings_cursor.close_bindings()?;
        self.left.close_bindings()?;
        self.right.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.lifecycle.check_closed("cancel_bindings")?;
        self.left.cancel_bindings(bindings)?;
        self.right.cancel_bindings(bindings)?;
        self.bindings_cursor.cancel_bindings(bindings)
    }
}

/// A storage-level row source that is re-pointed at each scope
pub trait BindableCursor {
    /// Prepare for the scope `bindings`; called before each `open`
    fn rebind(&mut self, context: &QueryContext, bindings: &QueryBindings) -> ExecutorResult<()>;

    fn open(&mut self) -> ExecutorResult<()>;

    fn next(&mut self) -> ExecutorResult<Option<Row>>;

    fn jump(&mut self, _row: &Row, _selector: ColumnSelector) -> ExecutorResult<()> {
        Err(ExecutorError::Unsupported("jump"))
    }

    fn close(&mut self);
}

/// Leaf cursor over a single [`BindableCursor`]
pub struct LeafCursor<S> {
    name: &'static str,
    context: Arc<QueryContext>,
    bindings_cursor: Box<dyn BindingsCursor>,
    source: S,
    lifecycle: Lifecycle,
    bindings: Option<QueryBindings>,
}

impl<S: BindableCursor> LeafCursor<S> {
    pub fn new(
        name: &'static str,
        context: &Arc<QueryContext>,
        bindings_cursor: Box<dyn BindingsCursor>,
        source: S,
    ) -> Self {
        Self {
            name,
            context: context.clone(),
            bindings_cursor,
            source,
            lifecycle: Lifecycle::for_context(context),
            bindings: None,
        }
    }
}

impl<S: BindableCursor> BindingsCursor for LeafCursor<S> {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.bindings = None;
        self.bindings_cursor.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        self.lifecycle.check_closed("next_bindings")?;
        let bindings = self.bindings_cursor.next_bindings()?;
        self.bindings = bindings.clone();
        Ok(bindings)
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        self.bindings = None;
        self.bindings_cursor.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.lifecycle.check_closed("cancel_bindings")?;
        self.bindings_cursor.cancel_bindings(bindings)
    }
}

impl<S: BindableCursor> Cursor for LeafCursor<S> {
    fn open(&mut self) -> ExecutorResult<()> {
        let bindings = self
            .bindings
            .clone()
            .ok_or_else(|| ExecutorError::internal("leaf cursor opened without bindings"))?;
        self.lifecycle.open()?;
        debug!(operator = self.name, scope = ?bindings, "open");
        self.source.rebind(&self.context, &bindings)?;
        self.source.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.lifecycle.begin_next(&self.context)? {
            return Ok(None);
        }
        let row = self.source.next()?;
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

    fn jump(&mut self, row: &Row, selector: ColumnSelector) -> ExecutorResult<()> {
        self.lifecycle.jump()?;
        self.source.jump(row, selector)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        if self.lifecycle.state().is_open() {
            self.source.close();
            debug!(operator = self.name, "close");
        }
        self.lifecycle.close()
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }
}
