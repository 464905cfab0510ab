//! Two-input unions
//!
//! Both inputs run against the same scope and are opened together.
//!
//! - `UnionAll_Default` returns every left row, then every right row.
//! - `Union_Ordered` merges two streams of one row type sorted on the same
//!   trailing fields; rows with equal comparison fields come out once
//!   unless `output_equal` is set.
//! - `HKeyUnion_Ordered` merges two streams in hkey order into hkey rows of
//!   a target table, truncating each key to the target's length and
//!   dropping keys already covered by the previous output.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::catalog::Table;
use crate::storage::{compare_keys, ColumnSelector};

use super::chained::MultiChainedCursor;
use super::context::QueryContext;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::explain::Explain;
use super::hkey::HKey;
use super::lifecycle::CursorState;
use super::merge::{check_ordering, MergeSide};
use super::operator::{add_derived_type, explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::{RowType, Schema};
use super::{delegate_bindings, BindingsCursor, Cursor};

/// UnionAll_Default
#[derive(Debug)]
pub struct UnionAll {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    row_type: Arc<RowType>,
}

impl UnionAll {
    pub fn new(
        left: Box<dyn Operator>,
        left_type: Arc<RowType>,
        right: Box<dyn Operator>,
        right_type: &RowType,
    ) -> ExecutorResult<Self> {
        check_argument(left_type.fields() == right_type.fields(), || {
            format!("union of {} and {} with different fields", left_type, right_type)
        })?;
        Ok(Self {
            left,
            right,
            row_type: left_type,
        })
    }
}

impl Operator for UnionAll {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        Ok(Box::new(UnionAllCursor {
            base: MultiChainedCursor::new(context, bindings, self.left.as_ref(), self.right.as_ref())?,
            left_done: false,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.row_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn name(&self) -> &'static str {
        "UnionAll_Default"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self).attr("row_type", &self.row_type)
    }
}

struct UnionAllCursor {
    base: MultiChainedCursor,
    left_done: bool,
}

impl Cursor for UnionAllCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.left_done = false;
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let mut row = None;
        if !self.left_done {
            row = self.base.left.next()?;
            self.left_done = row.is_none();
        }
        if self.left_done {
            row = self.base.right.next()?;
        }
        if row.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("UnionAll_Default", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(UnionAllCursor, base);

/// Union_Ordered
#[derive(Debug)]
pub struct OrderedUnion {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    row_type: Arc<RowType>,
    ordering_fields: usize,
    ascending: Vec<bool>,
    output_equal: bool,
}

impl OrderedUnion {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        row_type: Arc<RowType>,
        ordering_fields: usize,
        ascending: Vec<bool>,
        output_equal: bool,
    ) -> ExecutorResult<Self> {
        check_argument(!ascending.is_empty(), || "no comparison fields".to_string())?;
        check_ordering(&row_type, ordering_fields, ascending.len())?;
        Ok(Self {
            left,
            right,
            row_type,
            ordering_fields,
            ascending,
            output_equal,
        })
    }
}

impl Operator for OrderedUnion {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let fixed_fields = self.row_type.nfields() - self.ordering_fields;
        let side = || MergeSide::new(self.row_type.clone(), fixed_fields, self.ascending.len());
        Ok(Box::new(OrderedUnionCursor {
            base: MultiChainedCursor::new(context, bindings, self.left.as_ref(), self.right.as_ref())?,
            left: side(),
            right: side(),
            ascending: self.ascending.clone(),
            output_equal: self.output_equal,
            started: false,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.row_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Union_Ordered"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
            .attr("ordering_fields", self.ordering_fields)
            .attr("output_equal", self.output_equal)
    }
}

struct OrderedUnionCursor {
    base: MultiChainedCursor,
    left: MergeSide,
    right: MergeSide,
    ascending: Vec<bool>,
    output_equal: bool,
    started: bool,
}

impl OrderedUnionCursor {
    fn fill(&mut self) -> ExecutorResult<()> {
        self.started = true;
        self.left.advance(self.base.left.as_mut())?;
        self.right.advance(self.base.right.as_mut())
    }

    fn next_output(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.started {
            self.fill()?;
        }
        let order = match (self.left.key(), self.right.key()) {
            (None, None) => return Ok(None),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(l), Some(r)) => compare_keys(l, r, &self.ascending),
        };
        let row = if order == Ordering::Greater {
            let row = self.right.take();
            self.right.advance(self.base.right.as_mut())?;
            row
        } else {
            let row = self.left.take();
            self.left.advance(self.base.left.as_mut())?;
            if order == Ordering::Equal && !self.output_equal {
                self.right.advance(self.base.right.as_mut())?;
            }
            row
        };
        Ok(row)
    }
}

impl Cursor for OrderedUnionCursor {
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
        self.base.log_yield("Union_Ordered", &row);
        Ok(row)
    }

    /// Reposition both inputs at `row`
    fn jump(&mut self, row: &Row, selector: ColumnSelector) -> ExecutorResult<()> {
        self.base.lifecycle.jump()?;
        self.base.left.jump(row, selector)?;
        self.base.right.jump(row, selector)?;
        self.fill()
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

delegate_bindings!(OrderedUnionCursor, base);

/// HKeyUnion_Ordered
#[derive(Debug)]
pub struct HKeyUnion {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    left_type: Arc<RowType>,
    right_type: Arc<RowType>,
    left_ordering_fields: usize,
    right_ordering_fields: usize,
    target: Arc<Table>,
    output_type: Arc<RowType>,
}

impl HKeyUnion {
    /// `*_ordering_fields` count the fields each input is ordered on; on a
    /// key tie, the side with at least as many advances
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema: &Schema,
        left: Box<dyn Operator>,
        left_type: Arc<RowType>,
        left_ordering_fields: usize,
        right: Box<dyn Operator>,
        right_type: Arc<RowType>,
        right_ordering_fields: usize,
        target: Arc<Table>,
    ) -> ExecutorResult<Self> {
        let inputs = [(&left_type, left_ordering_fields), (&right_type, right_ordering_fields)];
        for (row_type, ordering_fields) in inputs {
            check_argument(ordering_fields <= row_type.nfields(), || {
                format!(
                    "{} ordering fields but {} has {}",
                    ordering_fields,
                    row_type,
                    row_type.nfields()
                )
            })?;
            let segments = row_type.hkey_table().map(|t| t.hkey_segments());
            check_argument(segments.is_some_and(|n| n >= target.hkey_segments()), || {
                format!("{} rows do not carry hkeys of {}", row_type, target.name())
            })?;
        }
        let output_type = schema.hkey_row_type(&target);
        Ok(Self {
            left,
            right,
            left_type,
            right_type,
            left_ordering_fields,
            right_ordering_fields,
            target,
            output_type,
        })
    }
}

impl Operator for HKeyUnion {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        Ok(Box::new(HKeyUnionCursor {
            base: MultiChainedCursor::new(context, bindings, self.left.as_ref(), self.right.as_ref())?,
            left_type: self.left_type.clone(),
            right_type: self.right_type.clone(),
            advance_left_on_tie: self.left_ordering_fields >= self.right_ordering_fields,
            advance_right_on_tie: self.right_ordering_fields >= self.left_ordering_fields,
            segments: self.target.hkey_segments(),
            output_type: self.output_type.clone(),
            left_key: None,
            right_key: None,
            left_done: false,
            right_done: false,
            previous: None,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.output_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        add_derived_type(types, &self.output_type);
        self.left.find_derived_types(types);
        self.right.find_derived_types(types);
    }

    fn name(&self) -> &'static str {
        "HKeyUnion_Ordered"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
            .attr("target", self.target.name())
            .attr("left_ordering_fields", self.left_ordering_fields)
            .attr("right_ordering_fields", self.right_ordering_fields)
    }
}

struct HKeyUnionCursor {
    base: MultiChainedCursor,
    left_type: Arc<RowType>,
    right_type: Arc<RowType>,
    advance_left_on_tie: bool,
    advance_right_on_tie: bool,
    /// Segments kept from each input hkey
    segments: usize,
    output_type: Arc<RowType>,
    /// Truncated key of the unconsumed row on each side
    left_key: Option<HKey>,
    right_key: Option<HKey>,
    left_done: bool,
    right_done: bool,
    previous: Option<HKey>,
}

/// Next truncated hkey of rows of `row_type` from `input`
fn next_key(
    input: &mut dyn Cursor,
    row_type: &RowType,
    segments: usize,
) -> ExecutorResult<Option<HKey>> {
    while let Some(row) = input.next()? {
        if !row.is_type(row_type) {
            continue;
        }
        let hkey = row
            .hkey()
            .ok_or_else(|| ExecutorError::internal(format!("{} row without an hkey", row_type)))?;
        return Ok(Some(hkey.prefix(segments)));
    }
    Ok(None)
}

impl HKeyUnionCursor {
    fn fill(&mut self) -> ExecutorResult<()> {
        if self.left_key.is_none() && !self.left_done {
            self.left_key = next_key(self.base.left.as_mut(), &self.left_type, self.segments)?;
            self.left_done = self.left_key.is_none();
        }
        if self.right_key.is_none() && !self.right_done {
            self.right_key = next_key(self.base.right.as_mut(), &self.right_type, self.segments)?;
            self.right_done = self.right_key.is_none();
        }
        Ok(())
    }

    /// Smallest pending key, consuming the side(s) it came from
    fn take_next(&mut self) -> ExecutorResult<Option<HKey>> {
        self.fill()?;
        let order = match (&self.left_key, &self.right_key) {
            (None, None) => return Ok(None),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(l), Some(r)) => l.cmp(r),
        };
        let key = match order {
            Ordering::Less => self.left_key.take(),
            Ordering::Greater => self.right_key.take(),
            Ordering::Equal => {
                let key = if self.advance_left_on_tie {
                    self.left_key.take()
                } else {
                    self.left_key.clone()
                };
                if self.advance_right_on_tie {
                    self.right_key.take();
                }
                key
            }
        };
        Ok(key)
    }

    fn next_output(&mut self) -> ExecutorResult<Option<Row>> {
        while let Some(key) = self.take_next()? {
            if self.previous.as_ref().is_some_and(|p| p.is_prefix_of(&key)) {
                continue;
            }
            self.previous = Some(key.clone());
            return Ok(Some(Row::with_hkey(self.output_type.clone(), Vec::new(), key)));
        }
        Ok(None)
    }
}

impl Cursor for HKeyUnionCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.left_key = None;
        self.right_key = None;
        self.left_done = false;
        self.right_done = false;
        self.previous = None;
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
        self.base.log_yield("HKeyUnion_Ordered", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.left_key = None;
        self.right_key = None;
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(HKeyUnionCursor, base);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::eval::Expression;
    use crate::executor::filter::Select;
    use crate::executor::scan::{GroupScan, IndexBound, IndexScan};
    use crate::executor::test_util::{int_type, ints, keys, run, test_context, values, Coi};
    use crate::executor::{Datum, ExecutionConfig, QueryBindings, SingletonBindingsCursor};
    use crate::storage::IndexOrdering;

    #[test]
    fn test_union_all_concatenates() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let u = int_type(ctx.schema(), 1);
        let union = UnionAll::new(values(&t, &[&[1], &[2]]), t.clone(), values(&u, &[&[3]]), &u).unwrap();
        assert_eq!(ints(&run(&ctx, &union).unwrap()), vec![vec![1], vec![2], vec![3]]);

        let wide = int_type(ctx.schema(), 2);
        assert!(UnionAll::new(values(&t, &[]), t.clone(), values(&wide, &[]), &wide).is_err());
    }

    #[test]
    fn test_union_all_empty_left() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let union = UnionAll::new(values(&t, &[]), t.clone(), values(&t, &[&[5]]), &t).unwrap();
        assert_eq!(ints(&run(&ctx, &union).unwrap()), vec![vec![5]]);
    }

    fn ordered_union(left: &[&[i64]], right: &[&[i64]], ascending: bool, output_equal: bool) -> Vec<Vec<i64>> {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 2);
        let union =
            OrderedUnion::new(values(&t, left), values(&t, right), t.clone(), 1, vec![ascending], output_equal)
                .unwrap();
        ints(&run(&ctx, &union).unwrap())
    }

    #[test]
    fn test_ordered_union_merges() {
        // first field tags the side, second is the ordering field
        let left: &[&[i64]] = &[&[0, 1], &[0, 3], &[0, 3], &[0, 8]];
        let right: &[&[i64]] = &[&[1, 2], &[1, 3], &[1, 9]];
        assert_eq!(
            ordered_union(left, right, true, false),
            vec![vec![0, 1], vec![1, 2], vec![0, 3], vec![0, 3], vec![0, 8], vec![1, 9]]
        );
        assert_eq!(
            ordered_union(left, right, true, true),
            vec![vec![0, 1], vec![1, 2], vec![0, 3], vec![0, 3], vec![1, 3], vec![0, 8], vec![1, 9]]
        );
        assert_eq!(
            ordered_union(&[], right, true, false),
            vec![vec![1, 2], vec![1, 3], vec![1, 9]]
        );
    }

    #[test]
    fn test_ordered_union_descending() {
        let left: &[&[i64]] = &[&[0, 9], &[0, 4]];
        let right: &[&[i64]] = &[&[1, 7], &[1, 4], &[1, 1]];
        assert_eq!(
            ordered_union(left, right, false, false),
            vec![vec![0, 9], vec![1, 7], vec![0, 4], vec![1, 1]]
        );
    }

    fn amounts(coi: &Coi, lo: Option<i64>, hi: Option<i64>) -> Box<dyn Operator> {
        let bound = |v: Option<i64>| v.map(|v| IndexBound::inclusive(vec![Expression::literal(v)]));
        Box::new(
            IndexScan::new(
                coi.schema.index_row_type(&coi.order_amount),
                bound(lo),
                bound(hi),
                IndexOrdering::Ascending,
                1,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_ordered_union_of_index_ranges() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let index_type = coi.schema.index_row_type(&coi.order_amount);
        for (output_equal, expected) in [(false, vec![50, 100, 200, 300]), (true, vec![50, 100, 100, 200, 300])] {
            let union = OrderedUnion::new(
                amounts(&coi, None, Some(100)),
                amounts(&coi, Some(100), None),
                index_type.clone(),
                1,
                vec![true],
                output_equal,
            )
            .unwrap();
            assert_eq!(keys(&run(&ctx, &union).unwrap()), expected);
        }
    }

    #[test]
    fn test_ordered_union_jump() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let index_type = coi.schema.index_row_type(&coi.order_amount);
        let union = OrderedUnion::new(
            amounts(&coi, None, Some(100)),
            amounts(&coi, Some(200), None),
            index_type.clone(),
            1,
            vec![true],
            false,
        )
        .unwrap();
        let mut cursor = union
            .cursor(&ctx, Box::new(SingletonBindingsCursor::new(Some(QueryBindings::new()))))
            .unwrap();
        cursor.open_top_level().unwrap();
        assert_eq!(cursor.next().unwrap().unwrap().get(0).unwrap(), &Datum::Int(50));
        cursor
            .jump(&Row::new(index_type, vec![Datum::Int(200)]), ColumnSelector::All)
            .unwrap();
        let rest: Vec<Row> = std::iter::from_fn(|| cursor.next().unwrap()).collect();
        assert_eq!(keys(&rest), vec![200, 300]);
        cursor.close_top_level().unwrap();
    }

    #[test]
    fn test_ordered_union_validation() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 2);
        let build = |ordering: usize, asc: Vec<bool>| {
            OrderedUnion::new(values(&t, &[]), values(&t, &[]), t.clone(), ordering, asc, false)
        };
        assert!(build(1, vec![true]).is_ok());
        assert!(build(2, vec![true, false]).is_ok());
        assert!(build(3, vec![true]).is_err());
        assert!(build(1, vec![true, true]).is_err());
        assert!(build(1, vec![]).is_err());
    }

    fn customer_ids(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .map(|r| {
                let hkey = r.hkey().unwrap();
                assert_eq!(hkey.len(), 1);
                hkey.segments()[0].values[0].as_int().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_hkey_union_to_customers() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        // orders over 150 (o10 under c1, o20 under c2) union items (c1, c3)
        let big_orders = Select::new(
            Box::new(GroupScan::new(coi.group.clone())),
            coi.order_type(),
            Expression::gt(Expression::field(2), Expression::literal(150i64)),
        );
        let union = HKeyUnion::new(
            &coi.schema,
            Box::new(big_orders),
            coi.order_type(),
            1,
            Box::new(GroupScan::new(coi.group.clone())),
            coi.item_type(),
            1,
            coi.customer.clone(),
        )
        .unwrap();
        let rows = run(&ctx, &union).unwrap();
        assert_eq!(customer_ids(&rows), vec![1, 2, 3]);
        assert!(rows.iter().all(|r| r.is_type(&union.row_type().unwrap())));
    }

    #[test]
    fn test_hkey_union_same_rows_on_both_sides() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        for (left_fields, right_fields) in [(1, 1), (2, 1), (1, 2)] {
            let union = HKeyUnion::new(
                &coi.schema,
                Box::new(GroupScan::new(coi.group.clone())),
                coi.order_type(),
                left_fields,
                Box::new(GroupScan::new(coi.group.clone())),
                coi.order_type(),
                right_fields,
                coi.order.clone(),
            )
            .unwrap();
            let rows = run(&ctx, &union).unwrap();
            let orders: Vec<i64> = rows
                .iter()
                .map(|r| r.hkey().unwrap().segments()[1].values[0].as_int().unwrap())
                .collect();
            assert_eq!(orders, vec![10, 11, 20, 30], "ordering fields {left_fields}/{right_fields}");
        }
    }

    #[test]
    fn test_hkey_union_validation() {
        let coi = Coi::new();
        let scan = || -> Box<dyn Operator> { Box::new(GroupScan::new(coi.group.clone())) };
        // customers carry no item hkeys
        assert!(HKeyUnion::new(
            &coi.schema,
            scan(),
            coi.customer_type(),
            0,
            scan(),
            coi.item_type(),
            0,
            coi.item.clone(),
        )
        .is_err());
        assert!(HKeyUnion::new(
            &coi.schema,
            scan(),
            coi.order_type(),
            9,
            scan(),
            coi.item_type(),
            0,
            coi.customer.clone(),
        )
        .is_err());
    }
}
