//! Aggregate_Partial
//!
//! Streaming aggregation over rows whose leading fields form the grouping
//! key and whose trailing fields each feed one aggregate function. A group
//! is emitted as soon as the key changes, so input that is not sorted by
//! the key produces one partial group per run of equal keys.

use std::fmt;
use std::sync::Arc;

use crate::catalog::DataType;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{add_derived_type, explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::{RowType, Schema};
use super::{delegate_bindings, BindingsCursor, Cursor};

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// Result type given the type of the aggregated field
    pub fn result_type(&self, input: DataType) -> DataType {
        match self {
            AggregateFunction::Count => DataType::BigInt,
            AggregateFunction::Avg => DataType::Double,
            AggregateFunction::Sum if input.is_integer() => DataType::BigInt,
            AggregateFunction::Sum => DataType::Double,
            AggregateFunction::Min | AggregateFunction::Max => input,
        }
    }

    fn accumulator(&self) -> Accumulator {
        match self {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::Sum(None),
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        };
        f.write_str(name)
    }
}

/// Running state of one aggregate function. Nulls are ignored.
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum(Option<Datum>),
    Avg { sum: f64, count: i64 },
    Min(Option<Datum>),
    Max(Option<Datum>),
}

impl Accumulator {
    fn accumulate(&mut self, value: &Datum) -> ExecutorResult<()> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum(sum) => {
                let total = match sum.take() {
                    None => value.clone(),
                    Some(s) => match s.checked_add(value) {
                        Some(total) => total,
                        None if matches!((&s, value), (Datum::Int(_), Datum::Int(_))) => {
                            return Err(ExecutorError::Overflow("SUM"));
                        }
                        None => {
                            return Err(ExecutorError::TypeMismatch {
                                expected: "numeric".to_string(),
                                got: value.to_string(),
                            })
                        }
                    },
                };
                *sum = Some(total);
            }
            Accumulator::Avg { sum, count } => {
                let v = value.as_float().ok_or_else(|| ExecutorError::TypeMismatch {
                    expected: "numeric".to_string(),
                    got: value.to_string(),
                })?;
                *sum += v;
                *count += 1;
            }
            Accumulator::Min(min) => {
                if min.as_ref().map_or(true, |m| value < m) {
                    *min = Some(value.clone());
                }
            }
            Accumulator::Max(max) => {
                if max.as_ref().map_or(true, |m| value > m) {
                    *max = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    /// Extract the result and reset for the next group
    fn finish(&mut self) -> Datum {
        match self {
            Accumulator::Count(n) => Datum::Int(std::mem::take(n)),
            Accumulator::Sum(sum) => sum.take().unwrap_or(Datum::Null),
            Accumulator::Avg { sum, count } => {
                let result = if *count == 0 {
                    Datum::Null
                } else {
                    Datum::Float(*sum / *count as f64)
                };
                *sum = 0.0;
                *count = 0;
                result
            }
            Accumulator::Min(v) | Accumulator::Max(v) => v.take().unwrap_or(Datum::Null),
        }
    }
}

/// Aggregate_Partial
#[derive(Debug)]
pub struct Aggregate {
    input: Box<dyn Operator>,
    input_type: Arc<RowType>,
    grouping_fields: usize,
    functions: Vec<AggregateFunction>,
    output_type: Arc<RowType>,
}

impl Aggregate {
    pub fn new(
        schema: &Schema,
        input: Box<dyn Operator>,
        input_type: Arc<RowType>,
        grouping_fields: usize,
        functions: Vec<AggregateFunction>,
    ) -> ExecutorResult<Self> {
        let nfields = input_type.nfields();
        check_argument(grouping_fields <= nfields, || {
            format!("{} grouping fields but input has {}", grouping_fields, nfields)
        })?;
        check_argument(nfields - grouping_fields == functions.len(), || {
            format!(
                "{} aggregate functions for {} aggregated fields",
                functions.len(),
                nfields - grouping_fields
            )
        })?;
        let aggregate_types = functions
            .iter()
            .zip(&input_type.fields()[grouping_fields..])
            .map(|(f, t)| f.result_type(*t))
            .collect();
        let output_type = schema.new_aggregate_type(&input_type, grouping_fields, aggregate_types);
        Ok(Self {
            input,
            input_type,
            grouping_fields,
            functions,
            output_type,
        })
    }
}

impl Operator for Aggregate {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(AggregateCursor {
            base: ChainedCursor::new(context, input),
            input_type: self.input_type.clone(),
            output_type: self.output_type.clone(),
            grouping_fields: self.grouping_fields,
            accumulators: self.functions.iter().map(|f| f.accumulator()).collect(),
            phase: AggregatePhase::Empty,
            pending: None,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.output_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        add_derived_type(types, &self.output_type);
        self.input.find_derived_types(types);
    }

    fn name(&self) -> &'static str {
        "Aggregate_Partial"
    }

    fn explain(&self) -> Explain {
        let functions: Vec<String> = self.functions.iter().map(|f| f.to_string()).collect();
        explain_with_inputs(self)
            .attr("grouping_fields", self.grouping_fields)
            .attr("functions", functions.join(", "))
    }
}

/// Where the cursor is within the current scope
#[derive(Debug, Clone, PartialEq)]
enum AggregatePhase {
    /// No input row aggregated yet
    Empty,
    /// Accumulating the group with this key
    Grouping(Vec<Datum>),
    /// A group was emitted and no new one has started
    Between,
    /// Input exhausted and the last row emitted
    Done,
}

struct AggregateCursor {
    base: ChainedCursor,
    input_type: Arc<RowType>,
    output_type: Arc<RowType>,
    grouping_fields: usize,
    accumulators: Vec<Accumulator>,
    phase: AggregatePhase,
    /// Row read ahead that starts the next group
    pending: Option<Row>,
}

impl AggregateCursor {
    fn finish_group(&mut self, key: Vec<Datum>) -> Row {
        let mut values = key;
        values.extend(self.accumulators.iter_mut().map(Accumulator::finish));
        Row::new(self.output_type.clone(), values)
    }

    /// Result of a grouped aggregation over no rows
    fn empty_row(&mut self) -> Row {
        self.finish_group(vec![Datum::Null; self.grouping_fields])
    }

    fn fold(&mut self, row: &Row) -> ExecutorResult<()> {
        for (acc, value) in self
            .accumulators
            .iter_mut()
            .zip(&row.values()[self.grouping_fields..])
        {
            acc.accumulate(value)?;
        }
        Ok(())
    }

    fn next_output(&mut self) -> ExecutorResult<Option<Row>> {
        loop {
            if self.phase == AggregatePhase::Done {
                return Ok(None);
            }
            let row = match self.pending.take() {
                Some(row) => Some(row),
                None => self.base.input.next()?,
            };
            let row = match row {
                Some(row) => row,
                None => {
                    let phase = std::mem::replace(&mut self.phase, AggregatePhase::Done);
                    return Ok(match phase {
                        AggregatePhase::Grouping(key) => Some(self.finish_group(key)),
                        AggregatePhase::Empty if self.grouping_fields > 0 => Some(self.empty_row()),
                        _ => None,
                    });
                }
            };
            if !row.is_type(&self.input_type) {
                return Ok(Some(row));
            }
            let key = &row.values()[..self.grouping_fields];
            match std::mem::replace(&mut self.phase, AggregatePhase::Between) {
                AggregatePhase::Grouping(current) if current.as_slice() != key => {
                    self.pending = Some(row);
                    return Ok(Some(self.finish_group(current)));
                }
                AggregatePhase::Grouping(current) => self.phase = AggregatePhase::Grouping(current),
                _ => self.phase = AggregatePhase::Grouping(key.to_vec()),
            }
            self.fold(&row)?;
        }
    }
}

impl Cursor for AggregateCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.phase = AggregatePhase::Empty;
        self.pending = None;
        for acc in &mut self.accumulators {
            acc.finish();
        }
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
        self.base.log_yield("Aggregate_Partial", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.pending = None;
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(AggregateCursor, base);
