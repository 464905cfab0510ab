//! Intersect_Ordered
//!
//! Ordered intersection of two streams sorted on their trailing ordering
//! fields. The first `ascending.len()` ordering fields are compared, each in
//! its own direction. Rows of one side (the output side) are returned when
//! the other side has a row with equal comparison fields. A left or right
//! join also returns the unmatched rows of the side it keeps.
//!
//! With [`IntersectScan::Skip`], a side that falls behind is repositioned
//! with [`Cursor::jump`] at the other side's key instead of being read row by
//! row, so both inputs must support jumping.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::storage::compare_keys;

use super::chained::MultiChainedCursor;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::{check_argument, ExecutorResult};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::merge::{check_ordering, MergeSide};
use super::operator::{explain_with_inputs, JoinType, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

/// Side whose rows are returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntersectOutput {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntersectScan {
    #[default]
    Sequential,
    Skip,
}

impl fmt::Display for IntersectScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntersectScan::Sequential => f.write_str("SEQUENTIAL"),
            IntersectScan::Skip => f.write_str("SKIP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntersectOptions {
    pub output: IntersectOutput,
    /// Return every output row of a run of equal keys; when false, each
    /// match consumes one row from both sides
    pub output_equal: bool,
    pub scan: IntersectScan,
}

impl Default for IntersectOptions {
    fn default() -> Self {
        Self {
            output: IntersectOutput::Left,
            output_equal: true,
            scan: IntersectScan::Sequential,
        }
    }
}

#[derive(Debug)]
pub struct OrderedIntersect {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    left_type: Arc<RowType>,
    right_type: Arc<RowType>,
    left_fixed_fields: usize,
    right_fixed_fields: usize,
    ascending: Vec<bool>,
    join: JoinType,
    options: IntersectOptions,
}

impl OrderedIntersect {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Box<dyn Operator>,
        left_type: Arc<RowType>,
        left_ordering_fields: usize,
        right: Box<dyn Operator>,
        right_type: Arc<RowType>,
        right_ordering_fields: usize,
        ascending: Vec<bool>,
        join: JoinType,
        options: IntersectOptions,
    ) -> ExecutorResult<Self> {
        check_argument(!ascending.is_empty(), || "no comparison fields".to_string())?;
        check_ordering(&left_type, left_ordering_fields, ascending.len())?;
        check_ordering(&right_type, right_ordering_fields, ascending.len())?;
        check_argument(join != JoinType::Full, || "full join is not an intersection".to_string())?;
        let output_kept = match options.output {
            IntersectOutput::Left => join != JoinType::Right,
            IntersectOutput::Right => join != JoinType::Left,
        };
        check_argument(output_kept, || {
            format!("{} join cannot return {:?} rows", join, options.output)
        })?;
        if !options.output_equal {
            check_argument(
                left_ordering_fields == right_ordering_fields
                    && left_type.nfields() == right_type.nfields(),
                || format!("{} and {} are not ordered alike", left_type, right_type),
            )?;
        }
        if options.scan == IntersectScan::Skip {
            check_argument(ascending.iter().all(|&a| a == ascending[0]), || {
                "skip scan needs one comparison direction".to_string()
            })?;
        }
        let left_fixed_fields = left_type.nfields() - left_ordering_fields;
        let right_fixed_fields = right_type.nfields() - right_ordering_fields;
        Ok(Self {
            left,
            right,
            left_type,
            right_type,
            left_fixed_fields,
            right_fixed_fields,
            ascending,
            join,
            options,
        })
    }
}

impl Operator for OrderedIntersect {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let n = self.ascending.len();
        Ok(Box::new(IntersectCursor {
            base: MultiChainedCursor::new(context, bindings, self.left.as_ref(), self.right.as_ref())?,
            left: MergeSide::new(self.left_type.clone(), self.left_fixed_fields, n),
            right: MergeSide::new(self.right_type.clone(), self.right_fixed_fields, n),
            ascending: self.ascending.clone(),
            join: self.join,
            options: self.options,
            started: false,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        match self.options.output {
            IntersectOutput::Left => Some(self.left_type.clone()),
            IntersectOutput::Right => Some(self.right_type.clone()),
        }
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Intersect_Ordered"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
            .attr("join", self.join)
            .attr("output", format!("{:?}", self.options.output))
            .attr("output_equal", self.options.output_equal)
            .attr("scan", self.options.scan)
    }
}

struct IntersectCursor {
    base: MultiChainedCursor,
    left: MergeSide,
    right: MergeSide,
    ascending: Vec<bool>,
    join: JoinType,
    options: IntersectOptions,
    started: bool,
}

impl IntersectCursor {
    /// Move the left side up to the right side's key
    fn catch_up_left(&mut self) -> ExecutorResult<()> {
        match (self.options.scan, self.right.key()) {
            (IntersectScan::Skip, Some(key)) => {
                let key: Vec<Datum> = key.to_vec();
                self.left.skip_to(self.base.left.as_mut(), &key)
            }
            _ => self.left.advance(self.base.left.as_mut()),
        }
    }

    fn catch_up_right(&mut self) -> ExecutorResult<()> {
        match (self.options.scan, self.left.key()) {
            (IntersectScan::Skip, Some(key)) => {
                let key: Vec<Datum> = key.to_vec();
                self.right.skip_to(self.base.right.as_mut(), &key)
            }
            _ => self.right.advance(self.base.right.as_mut()),
        }
    }

    fn take_left(&mut self) -> ExecutorResult<Option<Row>> {
        let row = self.left.take();
        self.left.advance(self.base.left.as_mut())?;
        Ok(row)
    }

    fn take_right(&mut self) -> ExecutorResult<Option<Row>> {
        let row = self.right.take();
        self.right.advance(self.base.right.as_mut())?;
        Ok(row)
    }

    fn next_output(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.started {
            self.started = true;
            self.left.advance(self.base.left.as_mut())?;
            self.right.advance(self.base.right.as_mut())?;
        }
        loop {
            // an exhausted side sorts after everything on the other side
            let order = match (self.left.key(), self.right.key()) {
                (None, None) => return Ok(None),
                (Some(_), None) if self.join.keeps_left() => Ordering::Less,
                (None, Some(_)) if self.join.keeps_right() => Ordering::Greater,
                (Some(_), None) | (None, Some(_)) => return Ok(None),
                (Some(l), Some(r)) => compare_keys(l, r, &self.ascending),
            };
            match order {
                Ordering::Less if self.join.keeps_left() => return self.take_left(),
                Ordering::Less => self.catch_up_left()?,
                Ordering::Greater if self.join.keeps_right() => return self.take_right(),
                Ordering::Greater => self.catch_up_right()?,
                Ordering::Equal => {
                    let row = match self.options.output {
                        IntersectOutput::Left => self.take_left()?,
                        IntersectOutput::Right => self.take_right()?,
                    };
                    if !self.options.output_equal {
                        match self.options.output {
                            IntersectOutput::Left => self.right.advance(self.base.right.as_mut())?,
                            IntersectOutput::Right => self.left.advance(self.base.left.as_mut())?,
                        }
                    }
                    return Ok(row);
                }
            }
        }
    }
}

impl Cursor for IntersectCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.left.clear();
        self.right.clear();
        self.started = false;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = self.next_output()?;
        if row.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("Intersect_Ordered", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.left.clear();
        self.right.clear();
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(IntersectCursor, base);
