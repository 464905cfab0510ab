//! Query executor - Volcano iterator model
//!
//! An operator tree is an immutable description of a query pipeline. Each
//! [`Operator`] compiles into a [`Cursor`]: a stateful iterator with an
//! open/next/close protocol that wraps the cursors of its inputs.
//!
//! Alongside rows, cursors pass a second stream of [`QueryBindings`]
//! scopes through the [`BindingsCursor`] protocol. A scope carries the
//! parameter values and bound rows of one nested-loop iteration; leaf
//! cursors drive the scope stream and every wrapper forwards it.

pub mod aggregate;
pub mod bindings;
pub mod bloom;
pub mod chained;
pub mod config;
pub mod context;
pub mod count;
pub mod datum;
pub mod delete;
pub mod distinct;
pub mod engine;
pub mod error;
pub mod eval;
pub mod except;
pub mod explain;
pub mod filter;
pub mod flatten;
pub mod hash_table;
pub mod hkey;
pub mod if_empty;
pub mod insert;
pub mod intersect;
pub mod lifecycle;
pub mod limit;
pub mod lookahead;
pub mod lookup;
pub(crate) mod merge;
pub mod nested_loops;
pub mod nested_lookup;
pub mod operator;
pub mod product;
pub mod project;
pub mod row;
pub mod row_type;
pub mod scan;
pub mod sort;
#[cfg(test)]
pub(crate) mod test_util;
pub mod union;
pub mod update;

pub use bindings::{
    Binding, MultipleBindingsCursor, QueryBindings, SingletonBindingsCursor, SingletonHandle,
};
pub use config::ExecutionConfig;
pub use context::{CancelHandle, QueryContext};
pub use datum::Datum;
pub use engine::ExecutorEngine;
pub use error::{ExecutorError, ExecutorResult, FaultClass};
pub use eval::Expression;
pub use explain::Explain;
pub use hash_table::HashTable;
pub use hkey::{HKey, HKeySegment};
pub use lifecycle::{CursorEvent, CursorState, Lifecycle};
pub use operator::{InputPreservation, JoinType, Operator};
pub use row::Row;
pub use row_type::{RowType, RowTypeKind, Schema};

use crate::storage::ColumnSelector;

/// The bindings-stream half of the cursor protocol
///
/// - `open_bindings()`: arm the stream
/// - `next_bindings()`: advance to the next scope, or None once exhausted
/// - `close_bindings()`: disarm the stream
/// - `cancel_bindings(scope)`: skip any buffered scope that descends from
///   `scope`
///
/// Callers never advance or cancel the stream while the row cursor it
/// feeds is open.
pub trait BindingsCursor {
    fn open_bindings(&mut self) -> ExecutorResult<()>;

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>>;

    fn close_bindings(&mut self) -> ExecutorResult<()>;

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()>;
}

/// Row cursor
///
/// `open()` requires a closed cursor and runs against the scope most
/// recently returned by `next_bindings()`. `next()` yields rows until it
/// returns None, which leaves the cursor idle; further calls keep
/// returning None. `close()` may be called in any open state and again
/// on a closed cursor.
pub trait Cursor: BindingsCursor {
    fn open(&mut self) -> ExecutorResult<()>;

    fn next(&mut self) -> ExecutorResult<Option<Row>>;

    /// Reposition at `row`; the cursor becomes active again
    fn jump(&mut self, _row: &Row, _selector: ColumnSelector) -> ExecutorResult<()> {
        Err(ExecutorError::Unsupported("jump"))
    }

    fn close(&mut self) -> ExecutorResult<()>;

    fn state(&self) -> CursorState;

    fn is_active(&self) -> bool {
        self.state() == CursorState::Active
    }

    fn is_idle(&self) -> bool {
        self.state() == CursorState::Idle
    }

    fn is_closed(&self) -> bool {
        self.state() == CursorState::Closed
    }

    /// Open the bindings stream, take its first scope and open on it
    fn open_top_level(&mut self) -> ExecutorResult<()> {
        self.open_bindings()?;
        self.next_bindings()?;
        self.open()
    }

    fn close_top_level(&mut self) -> ExecutorResult<()> {
        self.close()?;
        self.close_bindings()
    }
}

/// Implement [`BindingsCursor`] for a cursor by forwarding to a field that
/// already implements it
macro_rules! delegate_bindings {
    ($cursor:ty, $field:ident) => {
        impl $crate::executor::BindingsCursor for $cursor {
            fn open_bindings(&mut self) -> $crate::executor::ExecutorResult<()> {
                self.$field.open_bindings()
            }

            fn next_bindings(
                &mut self,
            ) -> $crate::executor::ExecutorResult<Option<$crate::executor::QueryBindings>> {
                self.$field.next_bindings()
            }

            fn close_bindings(&mut self) -> $crate::executor::ExecutorResult<()> {
                self.$field.close_bindings()
            }

            fn cancel_bindings(
                &mut self,
                bindings: &$crate::executor::QueryBindings,
            ) -> $crate::executor::ExecutorResult<()> {
                self.$field.cancel_bindings(bindings)
            }
        }
    };
}

pub(crate) use delegate_bindings;
