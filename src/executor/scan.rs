//! Leaf scans: literal rows, whole groups and index ranges

use std::sync::Arc;

use crate::catalog::Group;
use crate::storage::{ColumnSelector, GroupCursor, IndexCursor, IndexOrdering, KeyBound, KeyRange};

use super::bindings::QueryBindings;
use super::chained::{BindableCursor, LeafCursor};
use super::context::QueryContext;
use super::error::{check_argument, ExecutorResult};
use super::eval::{evaluate_all, Expression};
use super::explain::Explain;
use super::lookahead::LookaheadLeafCursor;
use super::operator::{add_derived_type, Operator};
use super::row::Row;
use super::row_type::{RowType, RowTypeKind};
use super::{BindingsCursor, Cursor};

/// A literal row, fixed or computed per scope
#[derive(Debug, Clone)]
pub enum BindableRow {
    Fixed(Row),
    Expressions(Vec<Expression>),
}

/// Emit a fixed list of rows for every scope
#[derive(Debug)]
pub struct ValuesScan {
    row_type: Arc<RowType>,
    rows: Arc<Vec<BindableRow>>,
}

impl ValuesScan {
    pub fn new(row_type: Arc<RowType>, rows: Vec<Row>) -> Self {
        Self {
            row_type,
            rows: Arc::new(rows.into_iter().map(BindableRow::Fixed).collect()),
        }
    }

    /// Rows computed from expressions in each scope
    pub fn from_expressions(
        row_type: Arc<RowType>,
        rows: Vec<Vec<Expression>>,
    ) -> ExecutorResult<Self> {
        for row in &rows {
            check_argument(row.len() == row_type.nfields(), || {
                format!(
                    "values row has {} expressions, {} expects {}",
                    row.len(),
                    row_type,
                    row_type.nfields()
                )
            })?;
        }
        Ok(Self {
            row_type,
            rows: Arc::new(rows.into_iter().map(BindableRow::Expressions).collect()),
        })
    }
}

struct ValuesSource {
    row_type: Arc<RowType>,
    rows: Arc<Vec<BindableRow>>,
    bound: Vec<Row>,
    position: usize,
}

impl BindableCursor for ValuesSource {
    fn rebind(&mut self, context: &QueryContext, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.bound.clear();
        for row in self.rows.iter() {
            let row = match row {
                BindableRow::Fixed(r) => r.clone(),
                BindableRow::Expressions(exprs) => Row::new(
                    self.row_type.clone(),
                    evaluate_all(exprs, None, bindings, context)?,
                ),
            };
            self.bound.push(row);
        }
        Ok(())
    }

    fn open(&mut self) -> ExecutorResult<()> {
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        let row = self.bound.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    fn close(&mut self) {
        self.position = self.bound.len();
    }
}

impl Operator for ValuesScan {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let source = ValuesSource {
            row_type: self.row_type.clone(),
            rows: self.rows.clone(),
            bound: Vec::new(),
            position: 0,
        };
        Ok(Box::new(LeafCursor::new(self.name(), context, bindings, source)))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.row_type.clone())
    }

    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        add_derived_type(types, &self.row_type);
    }

    fn name(&self) -> &'static str {
        "ValuesScan_Default"
    }

    fn explain(&self) -> Explain {
        Explain::new(self.name())
            .attr("row_type", &self.row_type)
            .attr("rows", self.rows.len())
    }
}

/// Scan every row of a group in hkey order
#[derive(Debug)]
pub struct GroupScan {
    group: Arc<Group>,
}

impl GroupScan {
    pub fn new(group: Arc<Group>) -> Self {
        Self { group }
    }
}

struct GroupSource {
    cursor: Box<dyn GroupCursor>,
}

impl BindableCursor for GroupSource {
    fn rebind(&mut self, _context: &QueryContext, _bindings: &QueryBindings) -> ExecutorResult<()> {
        Ok(())
    }

    fn open(&mut self) -> ExecutorResult<()> {
        Ok(self.cursor.open()?)
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        Ok(self.cursor.next()?)
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}

impl Operator for GroupScan {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let source = GroupSource {
            cursor: context.adapter().new_group_cursor(&self.group)?,
        };
        Ok(Box::new(LeafCursor::new(self.name(), context, bindings, source)))
    }

    fn name(&self) -> &'static str {
        "GroupScan_Default"
    }

    fn explain(&self) -> Explain {
        Explain::new(self.name()).attr("group", self.group.name())
    }
}

/// One end of an index scan; values are computed per scope
#[derive(Debug, Clone)]
pub struct IndexBound {
    pub values: Vec<Expression>,
    pub inclusive: bool,
}

impl IndexBound {
    pub fn inclusive(values: Vec<Expression>) -> Self {
        Self {
            values,
            inclusive: true,
        }
    }

    pub fn exclusive(values: Vec<Expression>) -> Self {
        Self {
            values,
            inclusive: false,
        }
    }

    fn bind(&self, context: &QueryContext, bindings: &QueryBindings) -> ExecutorResult<KeyBound> {
        Ok(KeyBound {
            values: evaluate_all(&self.values, None, bindings, context)?,
            inclusive: self.inclusive,
        })
    }
}

/// Scan an index over a key range
#[derive(Debug)]
pub struct IndexScan {
    index_type: Arc<RowType>,
    lo: Option<IndexBound>,
    hi: Option<IndexBound>,
    ordering: IndexOrdering,
    lookahead_quantum: usize,
}

impl IndexScan {
    pub fn new(
        index_type: Arc<RowType>,
        lo: Option<IndexBound>,
        hi: Option<IndexBound>,
        ordering: IndexOrdering,
        lookahead_quantum: usize,
    ) -> ExecutorResult<Self> {
        check_argument(matches!(index_type.kind(), RowTypeKind::Index(_)), || {
            format!("{} is not an index row type", index_type)
        })?;
        for bound in lo.iter().chain(hi.iter()) {
            check_argument(bound.values.len() <= index_type.nfields(), || {
                format!(
                    "bound has {} values, index {} has {} fields",
                    bound.values.len(),
                    index_type,
                    index_type.nfields()
                )
            })?;
        }
        Ok(Self {
            index_type,
            lo,
            hi,
            ordering,
            lookahead_quantum,
        })
    }

    /// Full ascending scan
    pub fn full(index_type: Arc<RowType>) -> ExecutorResult<Self> {
        Self::new(index_type, None, None, IndexOrdering::Ascending, 1)
    }

    /// Rows whose leading key fields equal `values`
    pub fn point(index_type: Arc<RowType>, values: Vec<Expression>) -> ExecutorResult<Self> {
        Self::new(
            index_type,
            Some(IndexBound::inclusive(values.clone())),
            Some(IndexBound::inclusive(values)),
            IndexOrdering::Ascending,
            1,
        )
    }

    #[must_use]
    pub fn with_lookahead(mut self, quantum: usize) -> Self {
        self.lookahead_quantum = quantum;
        self
    }

    fn source(&self, context: &QueryContext) -> ExecutorResult<IndexSource> {
        Ok(IndexSource {
            cursor: context
                .adapter()
                .new_index_cursor(&self.index_type, self.ordering)?,
            lo: self.lo.clone(),
            hi: self.hi.clone(),
        })
    }
}

struct IndexSource {
    cursor: Box<dyn IndexCursor>,
    lo: Option<IndexBound>,
    hi: Option<IndexBound>,
}

impl BindableCursor for IndexSource {
    fn rebind(&mut self, context: &QueryContext, bindings: &QueryBindings) -> ExecutorResult<()> {
        let lo = self.lo.as_ref().map(|b| b.bind(context, bindings)).transpose()?;
        let hi = self.hi.as_ref().map(|b| b.bind(context, bindings)).transpose()?;
        self.cursor.rebind(KeyRange::new(lo, hi));
        Ok(())
    }

    fn open(&mut self) -> ExecutorResult<()> {
        Ok(self.cursor.open()?)
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        Ok(self.cursor.next()?)
    }

    fn jump(&mut self, row: &Row, selector: ColumnSelector) -> ExecutorResult<()> {
        Ok(self.cursor.jump(row, selector)?)
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}

impl Operator for IndexScan {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        if self.lookahead_quantum <= 1 {
            let source = self.source(context)?;
            return Ok(Box::new(LeafCursor::new(self.name(), context, bindings, source)));
        }
        let sources = (0..self.lookahead_quantum)
            .map(|_| self.source(context))
            .collect::<ExecutorResult<Vec<_>>>()?;
        Ok(Box::new(LookaheadLeafCursor::new(
            self.name(),
            context,
            bindings,
            sources,
        )?))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.index_type.clone())
    }

    fn name(&self) -> &'static str {
        "IndexScan_Default"
    }

    fn explain(&self) -> Explain {
        let describe = |b: &Option<IndexBound>| match b {
            None => "unbounded".to_string(),
            Some(b) => {
                let values: Vec<String> = b.values.iter().map(|e| e.to_string()).collect();
                format!(
                    "{}{}",
                    if b.inclusive { "=" } else { "" },
                    values.join(", ")
                )
            }
        };
        Explain::new(self.name())
            .attr("index", &self.index_type)
            .attr("lo", describe(&self.lo))
            .attr("hi", describe(&self.hi))
            .attr("ordering", format!("{:?}", self.ordering))
            .attr("pipeline", self.lookahead_quantum)
    }
}
