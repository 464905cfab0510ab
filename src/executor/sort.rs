//! Sort-backed operators
//!
//! Both operators drain their whole input into a storage sorter when
//! opened and then read the sorted rows back.
//!
//! - `Sort_General` orders rows by a list of expressions, each ascending or
//!   descending, optionally dropping duplicates.
//! - `Buffer_Default` keys each row by its arrival number, so rows come back
//!   in input order. The input is fully consumed before the first row is
//!   returned.
//!
//! `Sort_InsertionLimited` keeps only the first `limit` rows of the sort
//! order in memory, inserting each input row into a bounded sorted list.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::storage::{compare_keys, RowCursor, SortOption};

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::eval::{evaluate_all, Expression};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{add_derived_type, explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::{RowType, Schema};
use super::{delegate_bindings, BindingsCursor, Cursor};

/// One sort key
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expression: Expression,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(expression: Expression) -> Self {
        Self {
            expression,
            ascending: true,
        }
    }

    pub fn desc(expression: Expression) -> Self {
        Self {
            expression,
            ascending: false,
        }
    }
}

/// Sort_General
#[derive(Debug)]
pub struct Sort {
    input: Box<dyn Operator>,
    sort_type: Arc<RowType>,
    ordering: Vec<SortKey>,
    option: SortOption,
}

impl Sort {
    pub fn new(
        input: Box<dyn Operator>,
        sort_type: Arc<RowType>,
        ordering: Vec<SortKey>,
        option: SortOption,
    ) -> ExecutorResult<Self> {
        check_argument(!ordering.is_empty(), || "sort needs at least one key".to_string())?;
        Ok(Self {
            input,
            sort_type,
            ordering,
            option,
        })
    }
}

impl Operator for Sort {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(SortCursor {
            base: ChainedCursor::new(context, input),
            input_type: self.sort_type.clone(),
            keys: SortKeys::Expressions {
                expressions: self.ordering.iter().map(|o| o.expression.clone()).collect(),
                ascending: self.ordering.iter().map(|o| o.ascending).collect(),
                option: self.option,
            },
            output: None,
            name: "Sort_General",
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.sort_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Sort_General"
    }

    fn explain(&self) -> Explain {
        let keys: Vec<String> = self
            .ordering
            .iter()
            .map(|o| format!("{} {}", o.expression, if o.ascending { "ASC" } else { "DESC" }))
            .collect();
        let e = explain_with_inputs(self)
            .attr("row_type", &self.sort_type)
            .attr("ordering", keys.join(", "));
        match self.option {
            SortOption::SuppressDuplicates => e.attr("distinct", true),
            SortOption::PreserveDuplicates => e,
        }
    }
}

/// Sort_InsertionLimited
#[derive(Debug)]
pub struct SortInsertionLimited {
    input: Box<dyn Operator>,
    sort_type: Arc<RowType>,
    ordering: Vec<SortKey>,
    option: SortOption,
    limit: usize,
}

impl SortInsertionLimited {
    pub fn new(
        input: Box<dyn Operator>,
        sort_type: Arc<RowType>,
        ordering: Vec<SortKey>,
        option: SortOption,
        limit: usize,
    ) -> ExecutorResult<Self> {
        check_argument(!ordering.is_empty(), || "sort needs at least one key".to_string())?;
        Ok(Self {
            input,
            sort_type,
            ordering,
            option,
            limit,
        })
    }
}

impl Operator for SortInsertionLimited {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(InsertionSortCursor {
            base: ChainedCursor::new(context, input),
            sort_type: self.sort_type.clone(),
            expressions: self.ordering.iter().map(|o| o.expression.clone()).collect(),
            ascending: self.ordering.iter().map(|o| o.ascending).collect(),
            preserve_duplicates: self.option == SortOption::PreserveDuplicates,
            limit: self.limit,
            output: None,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.sort_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Sort_InsertionLimited"
    }

    fn explain(&self) -> Explain {
        let keys: Vec<String> = self
            .ordering
            .iter()
            .map(|o| format!("{} {}", o.expression, if o.ascending { "ASC" } else { "DESC" }))
            .collect();
        let e = explain_with_inputs(self)
            .attr("row_type", &self.sort_type)
            .attr("ordering", keys.join(", "))
            .attr("limit", self.limit);
        match self.option {
            SortOption::SuppressDuplicates => e.attr("distinct", true),
            SortOption::PreserveDuplicates => e,
        }
    }
}

/// A kept row; `label` orders rows with equal keys by arrival
struct Held {
    keys: Vec<Datum>,
    label: u64,
    row: Row,
}

struct InsertionSortCursor {
    base: ChainedCursor,
    sort_type: Arc<RowType>,
    expressions: Vec<Expression>,
    ascending: Vec<bool>,
    preserve_duplicates: bool,
    limit: usize,
    /// Kept rows once the input is drained
    output: Option<VecDeque<Row>>,
}

impl InsertionSortCursor {
    fn order(&self, a: &Held, keys: &[Datum], label: u64) -> Ordering {
        compare_keys(&a.keys, keys, &self.ascending).then(a.label.cmp(&label))
    }

    fn fill(&mut self) -> ExecutorResult<VecDeque<Row>> {
        let mut sorted: Vec<Held> = Vec::with_capacity(self.limit + 1);
        let mut label = 0u64;
        while let Some(row) = self.base.input.next()? {
            if !row.is_type(&self.sort_type) {
                return Err(ExecutorError::TypeMismatch {
                    expected: self.sort_type.to_string(),
                    got: row.row_type().to_string(),
                });
            }
            let bindings = self.base.current_bindings()?;
            let keys = evaluate_all(&self.expressions, Some(&row), bindings, &self.base.context)?;
            let at = sorted.partition_point(|h| self.order(h, &keys, label) == Ordering::Less);
            let duplicate = sorted
                .get(at)
                .is_some_and(|h| self.order(h, &keys, label) == Ordering::Equal);
            if !duplicate && at < self.limit {
                sorted.insert(at, Held { keys, label, row });
                sorted.truncate(self.limit);
            }
            if self.preserve_duplicates {
                label += 1;
            }
        }
        Ok(sorted.into_iter().map(|h| h.row).collect())
    }
}

impl Cursor for InsertionSortCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.output = None;
        if self.limit == 0 {
            // nothing can be returned, so the input stays closed
            return self.base.lifecycle.open();
        }
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        if self.output.is_none() && self.limit > 0 {
            self.output = Some(self.fill()?);
        }
        let row = self.output.as_mut().and_then(VecDeque::pop_front);
        if row.is_none() {
            self.output = None;
            self.base.exhaust();
        }
        self.base.log_yield("Sort_InsertionLimited", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.output = None;
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(InsertionSortCursor, base);

/// Buffer_Default
#[derive(Debug)]
pub struct Buffer {
    input: Box<dyn Operator>,
    input_type: Arc<RowType>,
    buffer_type: Arc<RowType>,
}

impl Buffer {
    pub fn new(schema: &Schema, input: Box<dyn Operator>, input_type: Arc<RowType>) -> Self {
        let buffer_type = schema.new_buffer_type(&input_type);
        Self {
            input,
            input_type,
            buffer_type,
        }
    }
}

impl Operator for Buffer {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(SortCursor {
            base: ChainedCursor::new(context, input),
            input_type: self.input_type.clone(),
            keys: SortKeys::Arrival {
                buffer_type: self.buffer_type.clone(),
            },
            output: None,
            name: "Buffer_Default",
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.input_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        add_derived_type(types, &self.buffer_type);
        self.input.find_derived_types(types);
    }

    fn name(&self) -> &'static str {
        "Buffer_Default"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self).attr("row_type", &self.input_type)
    }
}

/// How rows are keyed for the sorter
enum SortKeys {
    Expressions {
        expressions: Vec<Expression>,
        ascending: Vec<bool>,
        option: SortOption,
    },
    /// Rows wrapped in the buffer type with a trailing sequence number
    Arrival { buffer_type: Arc<RowType> },
}

struct SortCursor {
    base: ChainedCursor,
    input_type: Arc<RowType>,
    keys: SortKeys,
    /// Sorted rows of the current scope
    output: Option<Box<dyn RowCursor>>,
    name: &'static str,
}

impl SortCursor {
    fn load(&mut self) -> ExecutorResult<Box<dyn RowCursor>> {
        let adapter = self.base.context.adapter().clone();
        let mut sorter = match &self.keys {
            SortKeys::Expressions {
                ascending, option, ..
            } => adapter.create_sorter(ascending, *option),
            SortKeys::Arrival { .. } => adapter.create_sorter(&[true], SortOption::PreserveDuplicates),
        };
        let mut sequence = 0i64;
        while let Some(row) = self.base.input.next()? {
            if !row.is_type(&self.input_type) {
                return Err(ExecutorError::TypeMismatch {
                    expected: self.input_type.to_string(),
                    got: row.row_type().to_string(),
                });
            }
            match &self.keys {
                SortKeys::Expressions { expressions, .. } => {
                    let bindings = self.base.current_bindings()?;
                    let keys = evaluate_all(expressions, Some(&row), bindings, &self.base.context)?;
                    sorter.insert(keys, row)?;
                }
                SortKeys::Arrival { buffer_type } => {
                    let hkey = row.hkey().cloned();
                    let mut values = row.into_values();
                    values.push(Datum::Int(sequence));
                    let mut wrapped = Row::new(buffer_type.clone(), values);
                    wrapped.set_hkey(hkey);
                    sorter.insert(vec![Datum::Int(sequence)], wrapped)?;
                    sequence += 1;
                }
            }
        }
        Ok(sorter.sort()?)
    }

    /// Strip the sequence number from a buffered row
    fn unwrap_row(&self, row: Row) -> Row {
        match self.keys {
            SortKeys::Expressions { .. } => row,
            SortKeys::Arrival { .. } => {
                let hkey = row.hkey().cloned();
                let mut values = row.into_values();
                values.pop();
                let mut original = Row::new(self.input_type.clone(), values);
                original.set_hkey(hkey);
                original
            }
        }
    }

    fn close_output(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.close();
        }
    }
}

impl Cursor for SortCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.base.open()?;
        let mut output = self.load()?;
        output.open()?;
        self.output = Some(output);
        Ok(())
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = match self.output.as_mut() {
            Some(output) => output.next()?,
            None => None,
        };
        let row = row.map(|r| self.unwrap_row(r));
        if row.is_none() {
            self.close_output();
            self.base.exhaust();
        }
        self.base.log_yield(self.name, &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.close_output();
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(SortCursor, base);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::filter::Filter;
    use crate::executor::scan::GroupScan;
    use crate::executor::test_util::{int_type, ints, keys, run, test_context, values, Coi};
    use crate::executor::ExecutionConfig;

    #[test]
    fn test_sort_by_expressions() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 2);
        let sort = Sort::new(
            values(&t, &[&[1, 5], &[2, 3], &[1, 9], &[0, 3]]),
            t.clone(),
            vec![SortKey::asc(Expression::field(1)), SortKey::desc(Expression::field(0))],
            SortOption::PreserveDuplicates,
        )
        .unwrap();
        assert_eq!(
            ints(&run(&ctx, &sort).unwrap()),
            vec![vec![2, 3], vec![0, 3], vec![1, 5], vec![1, 9]]
        );
    }

    #[test]
    fn test_sort_suppresses_duplicates() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let sort = Sort::new(
            values(&t, &[&[3], &[1], &[3], &[2], &[1]]),
            t.clone(),
            vec![SortKey::asc(Expression::field(0))],
            SortOption::SuppressDuplicates,
        )
        .unwrap();
        assert_eq!(ints(&run(&ctx, &sort).unwrap()), vec![vec![1], vec![2], vec![3]]);
        assert!(Sort::new(values(&t, &[]), t.clone(), vec![], SortOption::PreserveDuplicates).is_err());
    }

    fn limited(rows: &[&[i64]], ordering: Vec<SortKey>, option: SortOption, limit: usize) -> Vec<Vec<i64>> {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 2);
        let sort = SortInsertionLimited::new(values(&t, rows), t.clone(), ordering, option, limit).unwrap();
        ints(&run(&ctx, &sort).unwrap())
    }

    // second field tags the row's arrival
    const UNSORTED: &[&[i64]] = &[&[5, 0], &[3, 1], &[9, 2], &[1, 3], &[3, 4], &[7, 5]];

    #[test]
    fn test_insertion_limited_keeps_lowest() {
        let asc = || vec![SortKey::asc(Expression::field(0))];
        assert_eq!(
            limited(UNSORTED, asc(), SortOption::PreserveDuplicates, 3),
            vec![vec![1, 3], vec![3, 1], vec![3, 4]]
        );
        assert_eq!(
            limited(UNSORTED, asc(), SortOption::SuppressDuplicates, 3),
            vec![vec![1, 3], vec![3, 1], vec![5, 0]]
        );
        assert_eq!(
            limited(UNSORTED, vec![SortKey::desc(Expression::field(0))], SortOption::PreserveDuplicates, 2),
            vec![vec![9, 2], vec![7, 5]]
        );
    }

    #[test]
    fn test_insertion_limited_above_input_size() {
        let rows = limited(UNSORTED, vec![SortKey::asc(Expression::field(0))], SortOption::PreserveDuplicates, 100);
        let firsts: Vec<i64> = rows.iter().map(|r| r[0]).collect();
        assert_eq!(firsts, vec![1, 3, 3, 5, 7, 9]);
        assert!(limited(&[], vec![SortKey::asc(Expression::field(0))], SortOption::PreserveDuplicates, 3).is_empty());
    }

    #[test]
    fn test_insertion_limited_zero_never_reads_input() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let other = int_type(ctx.schema(), 1);
        let build = |limit: usize| {
            SortInsertionLimited::new(
                values(&other, &[&[1]]),
                t.clone(),
                vec![SortKey::asc(Expression::field(0))],
                SortOption::PreserveDuplicates,
                limit,
            )
            .unwrap()
        };
        assert!(run(&ctx, &build(0)).unwrap().is_empty());
        assert!(matches!(run(&ctx, &build(1)), Err(ExecutorError::TypeMismatch { .. })));
    }

    #[test]
    fn test_buffer_keeps_input_order() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let scan = GroupScan::new(coi.group.clone());
        let expected = run(&ctx, &scan).unwrap();
        let customers = Filter::new(
            Box::new(GroupScan::new(coi.group.clone())),
            vec![coi.customer_type()],
        )
        .unwrap();
        let buffer = Buffer::new(&coi.schema, Box::new(customers), coi.customer_type());
        let rows = run(&ctx, &buffer).unwrap();
        let expected: Vec<&Row> = expected
            .iter()
            .filter(|r| r.is_type(&coi.customer_type()))
            .collect();
        assert_eq!(rows.len(), expected.len());
        for (row, original) in rows.iter().zip(expected) {
            assert!(row.is_type(&coi.customer_type()));
            assert_eq!(row.values(), original.values());
            assert_eq!(row.hkey(), original.hkey());
        }
        assert_eq!(keys(&rows), vec![1, 2, 4]);
    }

    #[test]
    fn test_buffer_rejects_other_types() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let other = int_type(ctx.schema(), 1);
        let buffer = Buffer::new(ctx.schema(), values(&other, &[&[1]]), t);
        assert!(matches!(run(&ctx, &buffer), Err(ExecutorError::TypeMismatch { .. })));
    }

    #[test]
    fn test_buffer_derived_type() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 2);
        let buffer = Buffer::new(ctx.schema(), values(&t, &[&[1, 2]]), t.clone());
        let mut types = Vec::new();
        buffer.find_derived_types(&mut types);
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].nfields(), 3);
        assert_eq!(ints(&run(&ctx, &buffer).unwrap()), vec![vec![1, 2]]);
    }
}
