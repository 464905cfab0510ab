//! Executor engine
//!
//! Drives an operator tree to completion. The top cursor gets a bindings
//! stream holding one fresh scope from the query context; the engine opens
//! the cursor once per scope the stream yields, drains it, and closes it.

use std::sync::Arc;

use tracing::{debug, warn};

use super::bindings::SingletonBindingsCursor;
use super::context::QueryContext;
use super::error::ExecutorResult;
use super::operator::Operator;
use super::row::Row;
use super::Cursor;

/// Executor engine - runs operator trees against a query context
pub struct ExecutorEngine {
    context: Arc<QueryContext>,
}

impl ExecutorEngine {
    pub fn new(context: Arc<QueryContext>) -> Self {
        ExecutorEngine { context }
    }

    pub fn context(&self) -> &Arc<QueryContext> {
        &self.context
    }

    /// Top cursor of `operator` over a single top-level scope; the caller
    /// drives it, typically with `open_top_level` and `close_top_level`
    pub fn cursor(&self, operator: &dyn Operator) -> ExecutorResult<Box<dyn Cursor>> {
        let bindings = SingletonBindingsCursor::new(Some(self.context.create_bindings()));
        operator.cursor(&self.context, Box::new(bindings))
    }

    /// Run `operator` and collect every row it returns
    pub fn execute(&self, operator: &dyn Operator) -> ExecutorResult<Vec<Row>> {
        debug!(
            operator = operator.name(),
            session = self.context.session_id(),
            "executing"
        );
        let mut cursor = self.cursor(operator)?;
        let mut rows = Vec::new();
        let result = Self::drive(cursor.as_mut(), &mut rows);
        // always release the cursor, keeping the first error
        let closed = cursor.close().and_then(|_| cursor.close_bindings());
        match (result, closed) {
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "close failed after execution error");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                debug!(operator = operator.name(), rows = rows.len(), "execution complete");
                Ok(rows)
            }
        }
    }

    fn drive(cursor: &mut dyn Cursor, rows: &mut Vec<Row>) -> ExecutorResult<()> {
        cursor.open_bindings()?;
        while cursor.next_bindings()?.is_some() {
            cursor.open()?;
            while let Some(row) = cursor.next()? {
                rows.push(row);
            }
            cursor.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::error::ExecutorError;
    use crate::executor::test_util::{int_type, ints, test_context, values};

    #[test]
    fn test_execute_collects_rows() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let op = values(&t, &[&[1], &[2]]);
        let engine = ExecutorEngine::new(ctx);
        assert_eq!(ints(&engine.execute(op.as_ref()).unwrap()), vec![vec![1], vec![2]]);
        // the same operator runs again from scratch
        assert_eq!(engine.execute(op.as_ref()).unwrap().len(), 2);
    }

    #[test]
    fn test_manual_cursor_protocol() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let op = values(&t, &[&[1]]);
        let engine = ExecutorEngine::new(ctx);
        let mut cursor = engine.cursor(op.as_ref()).unwrap();
        assert!(cursor.is_closed());
        assert!(matches!(cursor.next(), Err(ExecutorError::Lifecycle { .. })));
        cursor.open_top_level().unwrap();
        assert!(cursor.is_active());
        assert!(matches!(cursor.open(), Err(ExecutorError::Lifecycle { .. })));
        assert!(cursor.next().unwrap().is_some());
        assert!(cursor.next().unwrap().is_none());
        assert!(cursor.is_idle());
        assert!(cursor.next().unwrap().is_none());
        cursor.close_top_level().unwrap();
        cursor.close().unwrap();
        assert!(cursor.is_closed());
    }

    #[test]
    fn test_canceled_query() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let op = values(&t, &[&[1]]);
        ctx.cancel_handle().cancel();
        let err = ExecutorEngine::new(ctx).execute(op.as_ref()).unwrap_err();
        assert!(matches!(err, ExecutorError::QueryCanceled));
    }
}
