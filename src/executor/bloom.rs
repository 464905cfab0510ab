//! Bloom filter semi-joins
//!
//! `Using_BloomFilter` hashes every row of a filter input into a
//! [`BloomFilter`], publishes it in a binding slot and then runs its stream
//! input. Inside that input, `Select_BloomFilter` keeps the rows whose key
//! may be in the filter and for which a check pipeline, run with the row
//! bound at the filter's position, yields at least one row.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use super::bindings::{QueryBindings, SingletonBindingsCursor, SingletonHandle};
use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::eval::{evaluate_all, Expression};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::nested_loops::{CollapseBindingsCursor, RowFilter, RowToBindingsCursor};
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

const BITS_PER_KEY: usize = 10;

/// Set membership with false positives and no false negatives
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    nbits: usize,
    hash_count: usize,
}

impl BloomFilter {
    /// Sized for about 1% false positives at `estimated_items` keys
    pub fn new(estimated_items: usize) -> Self {
        let words = (estimated_items.max(1) * BITS_PER_KEY).div_ceil(64);
        Self {
            bits: vec![0; words],
            nbits: words * 64,
            hash_count: (BITS_PER_KEY as f64 * 0.693).ceil() as usize,
        }
    }

    pub fn add<T: Hash + ?Sized>(&mut self, item: &T) {
        let (h1, h2) = Self::hashes(item);
        for i in 0..self.hash_count {
            let bit = self.bit(h1, h2, i);
            self.bits[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    /// False only if `item` was never added
    pub fn might_contain<T: Hash + ?Sized>(&self, item: &T) -> bool {
        let (h1, h2) = Self::hashes(item);
        (0..self.hash_count).all(|i| {
            let bit = self.bit(h1, h2, i);
            self.bits[bit / 64] & (1u64 << (bit % 64)) != 0
        })
    }

    fn hashes<T: Hash + ?Sized>(item: &T) -> (u64, u64) {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        let h1 = hasher.finish();
        (h1, h1.rotate_left(32) | 1)
    }

    fn bit(&self, h1: u64, h2: u64, i: usize) -> usize {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.nbits as u64) as usize
    }
}

/// Using_BloomFilter
#[derive(Debug)]
pub struct UsingBloomFilter {
    filter_input: Box<dyn Operator>,
    filter_type: Arc<RowType>,
    estimated_rows: usize,
    binding_position: usize,
    stream: Box<dyn Operator>,
}

impl UsingBloomFilter {
    /// Every field of each `filter_type` row forms its key
    pub fn new(
        filter_input: Box<dyn Operator>,
        filter_type: Arc<RowType>,
        estimated_rows: usize,
        binding_position: usize,
        stream: Box<dyn Operator>,
    ) -> Self {
        Self {
            filter_input,
            filter_type,
            estimated_rows,
            binding_position,
            stream,
        }
    }
}

impl Operator for UsingBloomFilter {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let singleton = SingletonBindingsCursor::new(None);
        let filter_bindings = singleton.handle();
        let filter_input = self.filter_input.cursor(context, Box::new(singleton))?;
        let stream = self.stream.cursor(context, bindings)?;
        Ok(Box::new(UsingBloomFilterCursor {
            base: ChainedCursor::new(context, stream),
            filter_input,
            filter_bindings,
            filter_type: self.filter_type.clone(),
            estimated_rows: self.estimated_rows,
            binding_position: self.binding_position,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.stream.row_type()
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.filter_input.as_ref(), self.stream.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Using_BloomFilter"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
            .attr("filter_type", &self.filter_type)
            .attr("estimated_rows", self.estimated_rows)
            .attr("binding_position", self.binding_position)
    }
}

struct UsingBloomFilterCursor {
    base: ChainedCursor,
    filter_input: Box<dyn Cursor>,
    filter_bindings: SingletonHandle,
    filter_type: Arc<RowType>,
    estimated_rows: usize,
    binding_position: usize,
}

impl UsingBloomFilterCursor {
    fn build_filter(&mut self, bindings: &QueryBindings) -> ExecutorResult<(BloomFilter, usize)> {
        let mut filter = BloomFilter::new(self.estimated_rows);
        self.filter_bindings.reset(bindings.clone());
        self.filter_input.open_top_level()?;
        let added = self.fill(&mut filter);
        let closed = self.filter_input.close_top_level();
        let added = added?;
        closed?;
        Ok((filter, added))
    }

    fn fill(&mut self, filter: &mut BloomFilter) -> ExecutorResult<usize> {
        let mut added = 0;
        while let Some(row) = self.filter_input.next()? {
            if row.is_type(&self.filter_type) {
                filter.add(row.values());
                added += 1;
            }
        }
        Ok(added)
    }
}

impl Cursor for UsingBloomFilterCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        let bindings = self.base.current_bindings()?.clone();
        let (filter, rows) = self.build_filter(&bindings)?;
        debug!(
            operator = "Using_BloomFilter",
            rows,
            position = self.binding_position,
            "bloom filter built"
        );
        bindings.set_bloom_filter(self.binding_position, Rc::new(filter));
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = self.base.input.next()?;
        if row.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("Using_BloomFilter", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(UsingBloomFilterCursor, base);

/// Select_BloomFilter
///
/// The check pipeline sees each candidate row at `binding_position` of a
/// child scope, shadowing the filter. Pipelined, candidates become child
/// scopes at `depth` of one bindings stream.
#[derive(Debug)]
pub struct SelectBloomFilter {
    input: Box<dyn Operator>,
    on_positive: Box<dyn Operator>,
    key_exprs: Vec<Expression>,
    binding_position: usize,
    pipeline: bool,
    depth: usize,
}

impl SelectBloomFilter {
    pub fn new(
        input: Box<dyn Operator>,
        on_positive: Box<dyn Operator>,
        key_exprs: Vec<Expression>,
        binding_position: usize,
        pipeline: bool,
        depth: usize,
    ) -> ExecutorResult<Self> {
        check_argument(!key_exprs.is_empty(), || {
            "bloom filter selection needs at least one key expression".to_string()
        })?;
        check_argument(depth > 0, || format!("depth must be positive, got {}", depth))?;
        Ok(Self {
            input,
            on_positive,
            key_exprs,
            binding_position,
            pipeline,
            depth,
        })
    }

    fn key_filter(&self, context: &Arc<QueryContext>) -> RowFilter {
        let exprs = self.key_exprs.clone();
        let context = context.clone();
        let position = self.binding_position;
        Box::new(move |row: &Row, bindings: &QueryBindings| {
            let filter = bindings.get_bloom_filter(position)?;
            let key = evaluate_all(&exprs, Some(row), bindings, &context)?;
            Ok(filter.might_contain(key.as_slice()))
        })
    }
}

impl Operator for SelectBloomFilter {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        if self.pipeline {
            let candidates = RowToBindingsCursor::new(
                input,
                self.binding_position,
                self.depth,
                context.config().log_execution,
            )
            .with_filter(self.key_filter(context));
            let check = self.on_positive.cursor(context, Box::new(candidates))?;
            let collapse = CollapseBindingsCursor::new(context, check, self.depth)
                .recovering_rows(self.name(), self.binding_position);
            return Ok(Box::new(collapse));
        }
        let singleton = SingletonBindingsCursor::new(None);
        let check_bindings = singleton.handle();
        let check = self.on_positive.cursor(context, Box::new(singleton))?;
        Ok(Box::new(SelectBloomFilterCursor {
            base: ChainedCursor::new(context, input),
            check,
            check_bindings,
            key_exprs: self.key_exprs.clone(),
            binding_position: self.binding_position,
            filter: None,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.input.row_type()
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref(), self.on_positive.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Select_BloomFilter"
    }

    fn explain(&self) -> Explain {
        let keys: Vec<String> = self.key_exprs.iter().map(ToString::to_string).collect();
        explain_with_inputs(self)
            .attr("keys", keys.join(", "))
            .attr("binding_position", self.binding_position)
            .attr("pipeline", self.pipeline)
    }
}

/// Non-pipelined selection: reopen the check pipeline per candidate
struct SelectBloomFilterCursor {
    base: ChainedCursor,
    check: Box<dyn Cursor>,
    check_bindings: SingletonHandle,
    key_exprs: Vec<Expression>,
    binding_position: usize,
    filter: Option<Rc<BloomFilter>>,
}

impl SelectBloomFilterCursor {
    fn has_match(&mut self, bindings: &QueryBindings, row: &Row) -> ExecutorResult<bool> {
        let scope = bindings.create_bindings();
        scope.set_row(self.binding_position, row.clone());
        self.check_bindings.reset(scope);
        self.check.open_top_level()?;
        let found = self.check.next().map(|r| r.is_some());
        let closed = self.check.close_top_level();
        let found = found?;
        closed?;
        Ok(found)
    }

    fn next_match(&mut self) -> ExecutorResult<Option<Row>> {
        let filter = self
            .filter
            .clone()
            .ok_or_else(|| ExecutorError::internal("bloom filter selection not open"))?;
        let bindings = self.base.current_bindings()?.clone();
        while let Some(row) = self.base.input.next()? {
            let key = evaluate_all(&self.key_exprs, Some(&row), &bindings, &self.base.context)?;
            if filter.might_contain(key.as_slice()) && self.has_match(&bindings, &row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

impl Cursor for SelectBloomFilterCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        let filter = self
            .base
            .current_bindings()?
            .get_bloom_filter(self.binding_position)?;
        self.filter = Some(filter);
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = self.next_match()?;
        if row.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("Select_BloomFilter", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.filter = None;
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(SelectBloomFilterCursor, base);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::executor::datum::Datum;
    use crate::executor::filter::Select;
    use crate::executor::test_util::{int_type, ints, run, test_context, values};

    #[test]
    fn test_filter_has_no_false_negatives() {
        let mut filter = BloomFilter::new(1000);
        for i in 0..1000i64 {
            filter.add([Datum::Int(i)].as_slice());
        }
        assert!((0..1000i64).all(|i| filter.might_contain([Datum::Int(i)].as_slice())));
        let false_positives = (1000..2000i64)
            .filter(|&i| filter.might_contain([Datum::Int(i)].as_slice()))
            .count();
        assert!(false_positives < 50, "{false_positives} false positives");
        // integral floats are the same key as integers
        assert!(filter.might_contain([Datum::Float(7.0)].as_slice()));
    }

    #[test]
    fn test_empty_filter_rejects() {
        let filter = BloomFilter::new(0);
        assert!(!filter.might_contain([Datum::Int(1)].as_slice()));
    }

    /// Rows of `[k, v]` whose `k` is in `filter_keys` and passes `check`
    fn semi_join(
        ctx: &Arc<QueryContext>,
        filter_keys: &[&[i64]],
        check: Box<dyn Operator>,
        pipeline: bool,
    ) -> ExecutorResult<Vec<Row>> {
        let key_t = int_type(ctx.schema(), 1);
        let row_t = int_type(ctx.schema(), 2);
        let select = SelectBloomFilter::new(
            values(&row_t, &[&[1, 10], &[2, 20], &[3, 30], &[4, 40], &[3, 31]]),
            check,
            vec![Expression::field(0)],
            0,
            pipeline,
            1,
        )?;
        let using = UsingBloomFilter::new(values(&key_t, filter_keys), key_t, filter_keys.len(), 0, Box::new(select));
        run(ctx, &using)
    }

    #[test]
    fn test_semi_join_checks_candidates() {
        let ctx = test_context();
        let key_t = int_type(ctx.schema(), 1);
        for pipeline in [false, true] {
            // the check pipeline only finds keys 3 and 5
            let check = Select::new(
                values(&key_t, &[&[3], &[5]]),
                key_t.clone(),
                Expression::eq(Expression::field(0), Expression::bound_field(0, 0, DataType::BigInt)),
            );
            let rows = semi_join(&ctx, &[&[1], &[3], &[5]], Box::new(check), pipeline).unwrap();
            assert_eq!(ints(&rows), vec![vec![3, 30], vec![3, 31]], "pipeline {pipeline}");
        }
    }

    #[test]
    fn test_semi_join_drops_keys_outside_filter() {
        let ctx = test_context();
        let key_t = int_type(ctx.schema(), 1);
        for pipeline in [false, true] {
            // a check that always succeeds leaves only the filter at work
            let rows = semi_join(&ctx, &[&[2], &[4]], values(&key_t, &[&[0]]), pipeline).unwrap();
            assert_eq!(ints(&rows), vec![vec![2, 20], vec![4, 40]], "pipeline {pipeline}");
            let rows = semi_join(&ctx, &[], values(&key_t, &[&[0]]), pipeline).unwrap();
            assert!(rows.is_empty());
        }
    }

    #[test]
    fn test_select_without_filter_fails() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        for pipeline in [false, true] {
            let select =
                SelectBloomFilter::new(values(&t, &[&[1]]), values(&t, &[&[1]]), vec![Expression::field(0)], 3, pipeline, 1)
                    .unwrap();
            assert!(run(&ctx, &select).is_err());
        }
    }

    #[test]
    fn test_validation() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        assert!(SelectBloomFilter::new(values(&t, &[]), values(&t, &[]), vec![], 0, false, 1).is_err());
        assert!(
            SelectBloomFilter::new(values(&t, &[]), values(&t, &[]), vec![Expression::field(0)], 0, true, 0).is_err()
        );
    }
}
