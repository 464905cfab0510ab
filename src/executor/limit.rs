//! Limit_Default
//!
//! Implements OFFSET and LIMIT. Counts are fixed or read from the scope at
//! open time, so both are resolved before the input is opened.

use std::fmt;
use std::sync::Arc;

use super::bindings::QueryBindings;
use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

/// Where a skip or limit count comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCount {
    Fixed(u64),
    /// Value bound at this position; null means no skip or no limit
    Binding(usize),
}

impl LimitCount {
    /// None for a null binding
    fn resolve(self, bindings: &QueryBindings, clause: &'static str) -> ExecutorResult<Option<u64>> {
        let position = match self {
            LimitCount::Fixed(n) => return Ok(Some(n)),
            LimitCount::Binding(p) => p,
        };
        match bindings.get_value(position)? {
            Datum::Null => Ok(None),
            Datum::Int(v) if v < 0 => Err(ExecutorError::NegativeLimit { clause, value: v }),
            Datum::Int(v) => Ok(Some(v as u64)),
            other => Err(ExecutorError::TypeMismatch {
                expected: "integer".to_string(),
                got: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for LimitCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitCount::Fixed(n) => write!(f, "{}", n),
            LimitCount::Binding(p) => write!(f, "?{}", p),
        }
    }
}

/// Limit_Default
#[derive(Debug)]
pub struct Limit {
    input: Box<dyn Operator>,
    skip: LimitCount,
    /// None = unlimited
    limit: Option<LimitCount>,
}

impl Limit {
    pub fn new(input: Box<dyn Operator>, skip: LimitCount, limit: Option<LimitCount>) -> Self {
        Limit { input, skip, limit }
    }

    /// Fixed counts given as signed values, as the planner folds them
    pub fn fixed(input: Box<dyn Operator>, skip: i64, limit: Option<i64>) -> ExecutorResult<Self> {
        check_argument(skip >= 0, || format!("negative skip {}", skip))?;
        if let Some(limit) = limit {
            check_argument(limit >= 0, || format!("negative limit {}", limit))?;
        }
        Ok(Self::new(
            input,
            LimitCount::Fixed(skip as u64),
            limit.map(|l| LimitCount::Fixed(l as u64)),
        ))
    }
}

impl Operator for Limit {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(LimitCursor {
            base: ChainedCursor::new(context, input),
            skip_count: self.skip,
            limit_count: self.limit,
            skip: 0,
            limit: None,
            skipped: 0,
            returned: 0,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.input.row_type()
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Limit_Default"
    }

    fn explain(&self) -> Explain {
        let e = explain_with_inputs(self).attr("skip", self.skip);
        match &self.limit {
            Some(limit) => e.attr("limit", limit),
            None => e,
        }
    }
}

struct LimitCursor {
    base: ChainedCursor,
    skip_count: LimitCount,
    limit_count: Option<LimitCount>,
    /// Rows to skip in this scope
    skip: u64,
    /// Rows to return in this scope (None = unlimited)
    limit: Option<u64>,
    skipped: u64,
    returned: u64,
}

impl Cursor for LimitCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        // resolve first: a failure leaves the cursor closed
        let bindings = self.base.current_bindings()?;
        let skip = self.skip_count.resolve(bindings, "OFFSET")?;
        let limit = match self.limit_count {
            Some(count) => count.resolve(bindings, "LIMIT")?,
            None => None,
        };
        self.skip = skip.unwrap_or(0);
        self.limit = limit;
        self.skipped = 0;
        self.returned = 0;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        if self.limit.is_some_and(|l| self.returned >= l) {
            self.base.exhaust();
            self.base.log_yield("Limit_Default", &None);
            return Ok(None);
        }
        while self.skipped < self.skip {
            if self.base.input.next()?.is_none() {
                self.base.exhaust();
                return Ok(None);
            }
            self.skipped += 1;
        }
        let row = self.base.input.next()?;
        match row {
            Some(_) => self.returned += 1,
            None => self.base.exhaust(),
        }
        self.base.log_yield("Limit_Default", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(LimitCursor, base);
