//! Lookahead pipelining for leaf cursors
//!
//! A [`LookaheadLeafCursor`] owns a fixed pool of sources. When opened on
//! a scope it also pulls further scopes from its bindings stream and opens
//! a pooled source on each one at the same depth, so the storage layer can
//! start fetching before the consumer asks. Everything stays synchronous:
//! the pulled scopes are queued and handed out by `next_bindings` in order.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::storage::ColumnSelector;

use super::bindings::QueryBindings;
use super::chained::BindableCursor;
use super::context::QueryContext;
use super::error::{ExecutorError, ExecutorResult};
use super::lifecycle::{CursorEvent, CursorState, Lifecycle};
use super::row::Row;
use super::{BindingsCursor, Cursor};

/// A pool slot: a source plus its own lifecycle state
struct PooledCursor<S> {
    source: S,
    state: CursorState,
}

impl<S: BindableCursor> PooledCursor<S> {
    fn open_on(&mut self, context: &QueryContext, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.source.rebind(context, bindings)?;
        self.source.open()?;
        self.state = self.state.transition(CursorEvent::Open)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.state.is_open() {
            self.source.close();
        }
        if self.state != CursorState::Destroyed {
            self.state = CursorState::Closed;
        }
    }
}

/// Leaf cursor that keeps up to `quantum` sources open ahead of the consumer
pub struct LookaheadLeafCursor<S: BindableCursor> {
    name: &'static str,
    context: Arc<QueryContext>,
    bindings_cursor: Box<dyn BindingsCursor>,
    lifecycle: Lifecycle,
    pool: Vec<PooledCursor<S>>,
    /// Scopes pulled ahead, with a source already opened on those at the
    /// current depth
    pending: VecDeque<(QueryBindings, Option<PooledCursor<S>>)>,
    current: Option<PooledCursor<S>>,
    current_bindings: Option<QueryBindings>,
    bindings_exhausted: bool,
}

impl<S: BindableCursor> LookaheadLeafCursor<S> {
    /// `sources` is the pool; its length is the quantum
    pub fn new(
        name: &'static str,
        context: &Arc<QueryContext>,
        bindings_cursor: Box<dyn BindingsCursor>,
        sources: Vec<S>,
    ) -> ExecutorResult<Self> {
        if sources.is_empty() {
            return Err(ExecutorError::validation("lookahead pool must not be empty"));
        }
        Ok(Self {
            name,
            context: context.clone(),
            bindings_cursor,
            lifecycle: Lifecycle::for_context(context),
            pool: sources
                .into_iter()
                .map(|source| PooledCursor {
                    source,
                    state: CursorState::Closed,
                })
                .collect(),
            pending: VecDeque::new(),
            current: None,
            current_bindings: None,
            bindings_exhausted: false,
        })
    }

    pub fn quantum(&self) -> usize {
        self.pool.len()
            + self.pending.iter().filter(|(_, c)| c.is_some()).count()
            + usize::from(self.current.is_some())
    }

    fn recycle(&mut self, mut cursor: PooledCursor<S>) {
        cursor.close();
        self.pool.push(cursor);
    }

    fn recycle_current(&mut self) {
        if let Some(cursor) = self.current.take() {
            self.recycle(cursor);
        }
    }

    fn clear_pending(&mut self) {
        while let Some((_, cursor)) = self.pending.pop_front() {
            if let Some(cursor) = cursor {
                self.recycle(cursor);
            }
        }
    }

    fn take_pooled(&mut self) -> ExecutorResult<PooledCursor<S>> {
        self.pool
            .pop()
            .ok_or_else(|| ExecutorError::internal("lookahead pool exhausted"))
    }

    /// Pull scopes ahead until the pool is empty or the stream runs out
    fn fill_pipeline(&mut self, depth: usize) -> ExecutorResult<()> {
        while !self.pool.is_empty() && !self.bindings_exhausted {
            let Some(bindings) = self.bindings_cursor.next_bindings()? else {
                self.bindings_exhausted = true;
                break;
            };
            let cursor = if bindings.depth() == depth {
                let mut cursor = self.take_pooled()?;
                if let Err(e) = cursor.open_on(&self.context, &bindings) {
                    self.recycle(cursor);
                    return Err(e);
                }
                trace!(operator = self.name, scope = ?bindings, "lookahead open");
                Some(cursor)
            } else {
                None
            };
            self.pending.push_back((bindings, cursor));
        }
        Ok(())
    }
}

impl<S: BindableCursor> BindingsCursor for LookaheadLeafCursor<S> {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.recycle_current();
        self.clear_pending();
        self.current_bindings = None;
        self.bindings_exhausted = false;
        self.bindings_cursor.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        self.lifecycle.check_closed("next_bindings")?;
        self.recycle_current();
        let bindings = match self.pending.pop_front() {
            Some((bindings, cursor)) => {
                self.current = cursor;
                Some(bindings)
            }
            None => {
                let bindings = self.bindings_cursor.next_bindings()?;
                if bindings.is_none() {
                    self.bindings_exhausted = true;
                }
                bindings
            }
        };
        self.current_bindings = bindings.clone();
        Ok(bindings)
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        self.recycle_current();
        self.clear_pending();
        self.current_bindings = None;
        self.bindings_cursor.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.lifecycle.check_closed("cancel_bindings")?;
        self.recycle_current();
        while self
            .pending
            .front()
            .is_some_and(|(b, _)| b.is_descendant_of(bindings))
        {
            if let Some((_, Some(cursor))) = self.pending.pop_front() {
                self.recycle(cursor);
            }
        }
        if self
            .current_bindings
            .as_ref()
            .is_some_and(|b| b.is_descendant_of(bindings))
        {
            self.current_bindings = None;
        }
        self.bindings_cursor.cancel_bindings(bindings)
    }
}

impl<S: BindableCursor> Cursor for LookaheadLeafCursor<S> {
    fn open(&mut self) -> ExecutorResult<()> {
        let bindings = self
            .current_bindings
            .clone()
            .ok_or_else(|| ExecutorError::internal("lookahead cursor opened without bindings"))?;
        self.lifecycle.open()?;
        debug!(operator = self.name, scope = ?bindings, "open");
        let mut cursor = match self.current.take() {
            Some(cursor) => cursor,
            None => self.take_pooled()?,
        };
        if !cursor.state.is_open() {
            if let Err(e) = cursor.open_on(&self.context, &bindings) {
                self.recycle(cursor);
                return Err(e);
            }
        }
        self.current = Some(cursor);
        self.fill_pipeline(bindings.depth())
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.lifecycle.begin_next(&self.context)? {
            return Ok(None);
        }
        let row = match self.current.as_mut() {
            Some(cursor) => {
                let row = cursor.source.next()?;
                if row.is_none() {
                    cursor.state = CursorState::Idle;
                }
                row
            }
            None => None,
        };
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
        let cursor = self
            .current
            .as_mut()
            .ok_or_else(|| ExecutorError::internal("jump without a current cursor"))?;
        cursor.source.jump(row, selector)?;
        cursor.state = CursorState::Active;
        Ok(())
    }

    fn close(&mut self) -> ExecutorResult<()> {
        if let Some(cursor) = self.current.as_mut() {
            cursor.close();
        }
        if self.lifecycle.state().is_open() {
            debug!(operator = self.name, "close");
        }
        self.lifecycle.close()
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }
}

impl<S: BindableCursor> Drop for LookaheadLeafCursor<S> {
    fn drop(&mut self) {
        let slots = self
            .pool
            .iter_mut()
            .chain(self.current.iter_mut())
            .chain(self.pending.iter_mut().filter_map(|(_, c)| c.as_mut()));
        for slot in slots {
            slot.close();
            slot.state = CursorState::Destroyed;
        }
        self.lifecycle.destroy();
    }
}
