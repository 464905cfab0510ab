//! Flatten_HKeyOrdered
//!
//! Joins each parent row with its children as they stream past in hkey
//! order. A parent is held until the next row shows whether it has any
//! children; an outer join then emits the childless parent (left) or the
//! orphan child (right) padded with nulls. Rows of other types pass
//! through, and the joined rows may keep their inputs next to them.

use std::collections::VecDeque;
use std::sync::Arc;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::explain::Explain;
use super::hkey::{HKey, HKeySegment};
use super::lifecycle::CursorState;
use super::operator::{add_derived_type, explain_with_inputs, JoinType, Operator};
use super::row::Row;
use super::row_type::{RowType, Schema};
use super::{delegate_bindings, BindingsCursor, Cursor};

/// Input rows re-emitted next to the joined rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlattenOptions {
    pub keep_parent: bool,
    pub keep_child: bool,
}

/// Flatten_HKeyOrdered
#[derive(Debug)]
pub struct Flatten {
    input: Box<dyn Operator>,
    parent_type: Arc<RowType>,
    child_type: Arc<RowType>,
    flatten_type: Arc<RowType>,
    join: JoinType,
    options: FlattenOptions,
    /// Ordinal of the child's table, for left-join hkeys
    child_ordinal: u32,
}

impl Flatten {
    /// `child_type`'s table must be a direct child of the table whose
    /// hkeys `parent_type` rows carry
    pub fn new(
        schema: &Schema,
        input: Box<dyn Operator>,
        parent_type: Arc<RowType>,
        child_type: Arc<RowType>,
        join: JoinType,
        options: FlattenOptions,
    ) -> ExecutorResult<Self> {
        let (parent_table, child_table) = match (parent_type.hkey_table(), child_type.hkey_table()) {
            (Some(p), Some(c)) => (p.clone(), c.clone()),
            _ => {
                return Err(ExecutorError::validation(format!(
                    "cannot flatten {} and {}: rows carry no hkeys",
                    parent_type, child_type
                )))
            }
        };
        check_argument(child_table.parent() == Some(parent_table.id()), || {
            format!("{} is not the parent of {}", parent_table.name(), child_table.name())
        })?;
        let flatten_type = schema.new_flatten_type(&parent_type, &child_type);
        Ok(Self {
            input,
            parent_type,
            child_type,
            flatten_type,
            join,
            options,
            child_ordinal: child_table.ordinal(),
        })
    }
}

impl Operator for Flatten {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(FlattenCursor {
            base: ChainedCursor::new(context, input),
            parent_type: self.parent_type.clone(),
            child_type: self.child_type.clone(),
            flatten_type: self.flatten_type.clone(),
            join: self.join,
            options: self.options,
            child_ordinal: self.child_ordinal,
            parent: None,
            childless: false,
            input_done: false,
            pending: VecDeque::new(),
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.flatten_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        self.input.find_derived_types(types);
        add_derived_type(types, &self.flatten_type);
    }

    fn name(&self) -> &'static str {
        "Flatten_HKeyOrdered"
    }

    fn explain(&self) -> Explain {
        let mut e = explain_with_inputs(self)
            .attr("parent_type", &self.parent_type)
            .attr("child_type", &self.child_type)
            .attr("join", self.join);
        if self.options.keep_parent {
            e = e.attr("keep_parent", true);
        }
        if self.options.keep_child {
            e = e.attr("keep_child", true);
        }
        e
    }
}

struct FlattenCursor {
    base: ChainedCursor,
    parent_type: Arc<RowType>,
    child_type: Arc<RowType>,
    flatten_type: Arc<RowType>,
    join: JoinType,
    options: FlattenOptions,
    child_ordinal: u32,
    /// Latest parent row whose children may still follow
    parent: Option<Row>,
    /// No child of `parent` seen yet
    childless: bool,
    input_done: bool,
    pending: VecDeque<Row>,
}

impl FlattenCursor {
    fn joined(&self, parent: Option<&Row>, child: Option<&Row>, hkey: Option<HKey>) -> Row {
        let mut values = match parent {
            Some(p) => p.values().to_vec(),
            None => vec![Datum::Null; self.parent_type.nfields()],
        };
        match child {
            Some(c) => values.extend_from_slice(c.values()),
            None => values.extend(std::iter::repeat(Datum::Null).take(self.child_type.nfields())),
        }
        let mut row = Row::new(self.flatten_type.clone(), values);
        row.set_hkey(hkey);
        row
    }

    /// Where a child of `parent` would sort before any real child: the
    /// parent's hkey extended by a null child segment
    fn left_join_hkey(&self, parent: &Row) -> Option<HKey> {
        parent.hkey().map(|h| {
            let mut segments = h.segments().to_vec();
            segments.push(HKeySegment::new(self.child_ordinal, vec![Datum::Null]));
            HKey::new(segments)
        })
    }

    fn is_under_parent(parent: &Row, row: &Row) -> bool {
        match (parent.hkey(), row.hkey()) {
            (Some(p), Some(r)) => p.is_prefix_of(r),
            _ => false,
        }
    }

    /// True once `next` (None at end of input) shows the held parent has
    /// no children
    fn childless_parent_done(&self, next: Option<&Row>) -> bool {
        let parent = match &self.parent {
            Some(p) if self.join.keeps_left() && self.childless => p,
            _ => return false,
        };
        let row = match next {
            None => return true,
            Some(r) => r,
        };
        if row.is_type(&self.parent_type) || !Self::is_under_parent(parent, row) {
            return true;
        }
        if row.is_type(&self.child_type) {
            return false;
        }
        // a descendant of another type: done once past where children sort
        match (self.left_join_hkey(parent), row.hkey()) {
            (Some(bound), Some(hkey)) => bound < *hkey,
            _ => false,
        }
    }

    fn emit_left_join(&mut self) {
        if let Some(parent) = self.parent.take() {
            let hkey = self.left_join_hkey(&parent);
            let row = self.joined(Some(&parent), None, hkey);
            self.pending.push_back(row);
            self.parent = Some(parent);
            self.childless = false;
        }
    }

    fn set_parent(&mut self, parent: Option<Row>) {
        self.childless = parent.is_some();
        self.parent = parent;
    }

    fn consume(&mut self, row: Row) {
        if row.is_type(&self.parent_type) {
            if self.options.keep_parent {
                self.pending.push_back(row.clone());
            }
            self.set_parent(Some(row));
        } else if row.is_type(&self.child_type) {
            if self.options.keep_child {
                self.pending.push_back(row.clone());
            }
            let parent = self.parent.clone().filter(|p| Self::is_under_parent(p, &row));
            match parent {
                Some(parent) => {
                    let joined = self.joined(Some(&parent), Some(&row), row.hkey().cloned());
                    self.pending.push_back(joined);
                    self.childless = false;
                }
                None => {
                    self.set_parent(None);
                    if self.join.keeps_right() {
                        let joined = self.joined(None, Some(&row), row.hkey().cloned());
                        self.pending.push_back(joined);
                    }
                }
            }
        } else {
            self.pending.push_back(row);
        }
    }

    fn next_output(&mut self) -> ExecutorResult<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if self.input_done {
                return Ok(None);
            }
            let row = self.base.input.next()?;
            if self.childless_parent_done(row.as_ref()) {
                self.emit_left_join();
            }
            match row {
                Some(row) => self.consume(row),
                None => {
                    self.input_done = true;
                    self.set_parent(None);
                }
            }
        }
    }
}

impl Cursor for FlattenCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.set_parent(None);
        self.input_done = false;
        self.pending.clear();
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
        self.base.log_yield("Flatten_HKeyOrdered", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.set_parent(None);
        self.pending.clear();
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(FlattenCursor, base);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scan::GroupScan;
    use crate::executor::test_util::{run, Coi};
    use crate::executor::ExecutionConfig;

    fn flatten(coi: &Coi, join: JoinType, options: FlattenOptions) -> Flatten {
        Flatten::new(
            &coi.schema,
            Box::new(GroupScan::new(coi.group.clone())),
            coi.customer_type(),
            coi.order_type(),
            join,
            options,
        )
        .unwrap()
    }

    /// Flattened rows as (cid, oid), nulls as -1; other rows by type label
    fn describe(rows: &[Row], flatten_type: &RowType) -> Vec<String> {
        rows.iter()
            .map(|r| {
                if r.is_type(flatten_type) {
                    let v = |i: usize| r.values()[i].as_int().unwrap_or(-1);
                    format!("{}/{}", v(0), v(2))
                } else {
                    format!("{}:{}", r.row_type().table().map_or("?", |t| t.name()), r.values()[0])
                }
            })
            .collect()
    }

    #[test]
    fn test_inner_join_passes_other_rows() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let op = flatten(&coi, JoinType::Inner, FlattenOptions::default());
        let rows = run(&ctx, &op).unwrap();
        let flatten_type = op.row_type().unwrap();
        assert_eq!(
            describe(&rows, &flatten_type),
            vec!["1/10", "item:100", "item:101", "1/11", "item:110", "2/20", "item:300"]
        );
        // joined rows carry the child's hkey
        assert_eq!(rows[0].hkey(), coi.order_row(1, 10, 300).hkey());
        assert_eq!(rows[0].values()[1], Datum::from("alice"));
    }

    #[test]
    fn test_outer_joins() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());

        let left = flatten(&coi, JoinType::Left, FlattenOptions::default());
        let rows = run(&ctx, &left).unwrap();
        let names = describe(&rows, &left.row_type().unwrap());
        assert_eq!(names.last().map(String::as_str), Some("4/-1"));
        assert!(!names.contains(&"-1/30".to_string()));
        let childless = rows.last().unwrap();
        let hkey = childless.hkey().unwrap();
        assert_eq!(hkey.len(), 2);
        assert!(coi.customer_row(4, "dave").hkey().unwrap().is_prefix_of(hkey));

        let right = flatten(&coi, JoinType::Right, FlattenOptions::default());
        let names = describe(&run(&ctx, &right).unwrap(), &right.row_type().unwrap());
        assert!(names.contains(&"-1/30".to_string()));
        assert!(!names.contains(&"4/-1".to_string()));

        let full = flatten(&coi, JoinType::Full, FlattenOptions::default());
        let names = describe(&run(&ctx, &full).unwrap(), &full.row_type().unwrap());
        assert_eq!(
            names,
            vec![
                "1/10", "item:100", "item:101", "1/11", "item:110", "2/20", "-1/30", "item:300",
                "4/-1"
            ]
        );
    }

    #[test]
    fn test_childless_parent_emitted_before_next_parent() {
        let coi = Coi::new();
        coi.store.load(vec![coi.customer_row(3, "carol")]).unwrap();
        let ctx = coi.context(ExecutionConfig::default());
        let op = flatten(&coi, JoinType::Left, FlattenOptions::default());
        let names = describe(&run(&ctx, &op).unwrap(), &op.row_type().unwrap());
        // customer 3 now owns order 30
        assert_eq!(
            names,
            vec![
                "1/10", "item:100", "item:101", "1/11", "item:110", "2/20", "3/30", "item:300",
                "4/-1"
            ]
        );
    }

    #[test]
    fn test_keep_inputs() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let options = FlattenOptions {
            keep_parent: true,
            keep_child: true,
        };
        let op = flatten(&coi, JoinType::Inner, options);
        let names = describe(&run(&ctx, &op).unwrap(), &op.row_type().unwrap());
        assert_eq!(&names[..4], &["customer:1", "order:10", "1/10", "item:100"]);
        assert!(names.contains(&"order:30".to_string()));
        assert!(names.contains(&"customer:4".to_string()));
    }

    #[test]
    fn test_requires_parent_and_child() {
        let coi = Coi::new();
        let build = |parent: Arc<RowType>, child: Arc<RowType>| {
            Flatten::new(
                &coi.schema,
                Box::new(GroupScan::new(coi.group.clone())),
                parent,
                child,
                JoinType::Inner,
                FlattenOptions::default(),
            )
        };
        assert!(build(coi.customer_type(), coi.item_type()).is_err());
        assert!(build(coi.order_type(), coi.customer_type()).is_err());
        assert!(build(coi.order_type(), coi.item_type()).is_ok());
    }

    #[test]
    fn test_flatten_chain() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let co = flatten(&coi, JoinType::Inner, FlattenOptions::default());
        let co_type = co.row_type().unwrap();
        let coi_op = Flatten::new(
            &coi.schema,
            Box::new(co),
            co_type,
            coi.item_type(),
            JoinType::Inner,
            FlattenOptions::default(),
        )
        .unwrap();
        let rows = run(&ctx, &coi_op).unwrap();
        let ids: Vec<(i64, i64, i64)> = rows
            .iter()
            .map(|r| {
                let v = |i: usize| r.values()[i].as_int().unwrap_or(-1);
                (v(0), v(2), v(5))
            })
            .collect();
        assert_eq!(ids, vec![(1, 10, 100), (1, 10, 101), (1, 11, 110)]);
        let mut types = Vec::new();
        coi_op.find_derived_types(&mut types);
        assert_eq!(types.len(), 2);
    }
}
