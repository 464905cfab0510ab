//! Lookups driven by a row bound in the current scope
//!
//! Both operators are leaves: the row to look up from sits at a binding
//! position, typically placed there by an enclosing `Map_NestedLoops`.
//! With a lookahead quantum above one they run under
//! [`LookaheadLeafCursor`], opening lookups for upcoming scopes early.

use std::sync::Arc;

use crate::catalog::{Group, Table};

use super::bindings::QueryBindings;
use super::chained::{BindableCursor, LeafCursor};
use super::context::QueryContext;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::explain::Explain;
use super::hkey::HKey;
use super::lookahead::LookaheadLeafCursor;
use super::lookup::{lookup_table, row_hkey, table_of, GroupProbe};
use super::operator::{InputPreservation, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{BindingsCursor, Cursor};

/// The bound row at `position`, checked against `row_type`
fn bound_row(bindings: &QueryBindings, position: usize, row_type: &RowType) -> ExecutorResult<Row> {
    let row = bindings.get_row(position)?;
    if !row.is_type(row_type) {
        return Err(ExecutorError::internal(format!(
            "bound row {} is not a {}",
            row, row_type
        )));
    }
    Ok(row)
}

/// Build one source per pooled cursor, or a plain leaf when `quantum` is 1
fn leaf_cursor<S, F>(
    name: &'static str,
    context: &Arc<QueryContext>,
    bindings: Box<dyn BindingsCursor>,
    pool_size: usize,
    lookahead: bool,
    mut source: F,
) -> ExecutorResult<Box<dyn Cursor>>
where
    S: BindableCursor + 'static,
    F: FnMut() -> ExecutorResult<S>,
{
    if !lookahead {
        return Ok(Box::new(LeafCursor::new(name, context, bindings, source()?)));
    }
    let sources = (0..pool_size.max(1))
        .map(|_| source())
        .collect::<ExecutorResult<Vec<_>>>()?;
    Ok(Box::new(LookaheadLeafCursor::new(name, context, bindings, sources)?))
}

/// AncestorLookup_Nested
///
/// Point lookups of the ancestors of the bound row, root first. Ancestors
/// missing from the group are skipped.
#[derive(Debug)]
pub struct AncestorLookupNested {
    group: Arc<Group>,
    row_type: Arc<RowType>,
    ancestors: Arc<Vec<Arc<Table>>>,
    binding_position: usize,
    lookahead_quantum: usize,
}

impl AncestorLookupNested {
    /// `ancestor_types` are table types at or above the bound row's table
    pub fn new(
        group: Arc<Group>,
        row_type: Arc<RowType>,
        ancestor_types: Vec<Arc<RowType>>,
        binding_position: usize,
        lookahead_quantum: usize,
    ) -> ExecutorResult<Self> {
        check_argument(!ancestor_types.is_empty(), || {
            "ancestor lookup needs at least one ancestor type".to_string()
        })?;
        let row_table = lookup_table(&group, &row_type)?;
        let mut ancestors = Vec::with_capacity(ancestor_types.len());
        for ancestor_type in &ancestor_types {
            let table = table_of(ancestor_type)?;
            check_argument(
                table.id() == row_table.id() || group.is_ancestor(&table, &row_table),
                || format!("{} is not an ancestor of {}", table.name(), row_table.name()),
            )?;
            ancestors.push(table);
        }
        ancestors.sort_by_key(|t| t.depth());
        Ok(Self {
            group,
            row_type,
            ancestors: Arc::new(ancestors),
            binding_position,
            lookahead_quantum,
        })
    }
}

struct AncestorSource {
    probe: GroupProbe,
    row_type: Arc<RowType>,
    ancestors: Arc<Vec<Arc<Table>>>,
    binding_position: usize,
    hkey: Option<HKey>,
    next_ancestor: usize,
}

impl BindableCursor for AncestorSource {
    fn rebind(&mut self, _context: &QueryContext, bindings: &QueryBindings) -> ExecutorResult<()> {
        let row = bound_row(bindings, self.binding_position, &self.row_type)?;
        self.hkey = Some(row_hkey(&row)?.clone());
        Ok(())
    }

    fn open(&mut self) -> ExecutorResult<()> {
        self.next_ancestor = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        let hkey = match &self.hkey {
            Some(h) => h,
            None => return Ok(None),
        };
        while let Some(table) = self.ancestors.get(self.next_ancestor) {
            self.next_ancestor += 1;
            self.probe.open_ancestor(hkey.prefix(table.hkey_segments()))?;
            let found = self.probe.next();
            self.probe.close();
            if let Some(row) = found? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.probe.close();
        self.hkey = None;
    }
}

impl Operator for AncestorLookupNested {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let n = self.ancestors.len();
        let pool_size = (self.lookahead_quantum + n - 1) / n;
        leaf_cursor(
            self.name(),
            context,
            bindings,
            pool_size,
            self.lookahead_quantum > 1,
            || {
                Ok(AncestorSource {
                    probe: GroupProbe::new(context, &self.group)?,
                    row_type: self.row_type.clone(),
                    ancestors: self.ancestors.clone(),
                    binding_position: self.binding_position,
                    hkey: None,
                    next_ancestor: 0,
                })
            },
        )
    }

    fn name(&self) -> &'static str {
        "AncestorLookup_Nested"
    }

    fn explain(&self) -> Explain {
        let ancestors: Vec<&str> = self.ancestors.iter().map(|t| t.name()).collect();
        Explain::new(self.name())
            .attr("row_type", &self.row_type)
            .attr("ancestors", ancestors.join(", "))
            .attr("binding_position", self.binding_position)
            .attr("lookahead_quantum", self.lookahead_quantum)
    }
}

/// Deepest table that is `a` or `b` or an ancestor of both
fn common_ancestor(group: &Group, a: &Arc<Table>, b: &Arc<Table>) -> Option<Arc<Table>> {
    let mut path_a = group.ancestors_of(a);
    path_a.push(a.clone());
    let mut path_b = group.ancestors_of(b);
    path_b.push(b.clone());
    path_a
        .into_iter()
        .zip(path_b)
        .take_while(|(x, y)| x.id() == y.id())
        .last()
        .map(|(x, _)| x)
}

#[derive(Debug)]
struct BranchPlan {
    row_type: Arc<RowType>,
    common_ancestor: Arc<Table>,
    /// Sorted by depth
    output_types: Vec<Arc<RowType>>,
    branch_root_ordinal: Option<u32>,
    keep_input: bool,
    /// Kept input row comes before the branch rather than after it
    input_precedes_branch: bool,
    binding_position: usize,
}

/// BranchLookup_Nested
///
/// Scans the subtree under the bound row's ancestor at the common-ancestor
/// level, keeping rows of the output types.
#[derive(Debug)]
pub struct BranchLookupNested {
    group: Arc<Group>,
    plan: Arc<BranchPlan>,
    lookahead_quantum: usize,
}

impl BranchLookupNested {
    /// With no `ancestor_type`, the scan starts at the deepest table above
    /// both the bound row's table and every output table.
    pub fn new(
        group: Arc<Group>,
        row_type: Arc<RowType>,
        ancestor_type: Option<Arc<RowType>>,
        output_types: Vec<Arc<RowType>>,
        flag: InputPreservation,
        binding_position: usize,
        lookahead_quantum: usize,
    ) -> ExecutorResult<Self> {
        check_argument(!output_types.is_empty(), || {
            "branch lookup needs at least one output type".to_string()
        })?;
        let keep_input = flag == InputPreservation::KeepInput;
        check_argument(!keep_input || row_type.is_table_type(), || {
            format!("cannot keep input rows of {}", row_type)
        })?;
        let input_table = lookup_table(&group, &row_type)?;
        let mut common = match &ancestor_type {
            Some(t) => {
                let table = table_of(t)?;
                check_argument(
                    table.id() == input_table.id() || group.is_ancestor(&table, &input_table),
                    || format!("{} is not an ancestor of {}", table.name(), input_table.name()),
                )?;
                table
            }
            None => input_table.clone(),
        };
        let mut outputs = Vec::with_capacity(output_types.len());
        for output_type in output_types {
            let table = table_of(&output_type)?;
            check_argument(group.contains(&table), || {
                format!("{} is not in group {}", table.name(), group.name())
            })?;
            if ancestor_type.is_some() {
                check_argument(
                    table.id() == common.id() || group.is_ancestor(&common, &table),
                    || format!("{} is not below {}", table.name(), common.name()),
                )?;
            } else {
                common = common_ancestor(&group, &common, &table).ok_or_else(|| {
                    ExecutorError::validation(format!(
                        "{} and {} share no ancestor",
                        common.name(),
                        table.name()
                    ))
                })?;
            }
            outputs.push((table, output_type));
        }
        outputs.sort_by_key(|(t, _)| t.depth());

        // a single subtree under the common ancestor holding every output
        let top = &outputs[0].0;
        let branch_root = if top.id() == common.id() {
            None
        } else {
            group
                .child_toward(&common, top)
                .filter(|root| {
                    outputs
                        .iter()
                        .all(|(t, _)| t.id() == root.id() || group.is_ancestor(root, t))
                })
        };
        let input_precedes_branch = match &branch_root {
            None => false,
            Some(_) if input_table.id() == common.id() => true,
            Some(root) => group
                .child_toward(&common, &input_table)
                .is_some_and(|t| t.ordinal() < root.ordinal()),
        };
        Ok(Self {
            group,
            plan: Arc::new(BranchPlan {
                row_type,
                common_ancestor: common,
                output_types: outputs.into_iter().map(|(_, t)| t).collect(),
                branch_root_ordinal: branch_root.map(|t| t.ordinal()),
                keep_input,
                input_precedes_branch,
                binding_position,
            }),
            lookahead_quantum,
        })
    }
}

struct BranchSource {
    probe: GroupProbe,
    plan: Arc<BranchPlan>,
    hkey: Option<HKey>,
    input_row: Option<Row>,
}

impl BindableCursor for BranchSource {
    fn rebind(&mut self, _context: &QueryContext, bindings: &QueryBindings) -> ExecutorResult<()> {
        let row = bound_row(bindings, self.plan.binding_position, &self.plan.row_type)?;
        let mut hkey = row_hkey(&row)?.prefix(self.plan.common_ancestor.hkey_segments());
        if let Some(ordinal) = self.plan.branch_root_ordinal {
            hkey.extend_with_ordinal(ordinal);
        }
        self.hkey = Some(hkey);
        self.input_row = self.plan.keep_input.then_some(row);
        Ok(())
    }

    fn open(&mut self) -> ExecutorResult<()> {
        let hkey = self
            .hkey
            .clone()
            .ok_or_else(|| ExecutorError::internal("branch lookup opened before rebind"))?;
        self.probe.open_branch(hkey)
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if self.plan.input_precedes_branch && self.input_row.is_some() {
            return Ok(self.input_row.take());
        }
        while let Some(row) = self.probe.next()? {
            if self.plan.output_types.iter().any(|t| row.is_type(t)) {
                return Ok(Some(row));
            }
        }
        self.probe.close();
        Ok(self.input_row.take())
    }

    fn close(&mut self) {
        self.probe.close();
        self.input_row = None;
    }
}

impl Operator for BranchLookupNested {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        leaf_cursor(
            self.name(),
            context,
            bindings,
            self.lookahead_quantum,
            self.lookahead_quantum > 1,
            || {
                Ok(BranchSource {
                    probe: GroupProbe::new(context, &self.group)?,
                    plan: self.plan.clone(),
                    hkey: None,
                    input_row: None,
                })
            },
        )
    }

    fn name(&self) -> &'static str {
        "BranchLookup_Nested"
    }

    fn explain(&self) -> Explain {
        let outputs: Vec<String> = self.plan.output_types.iter().map(|t| t.to_string()).collect();
        Explain::new(self.name())
            .attr("row_type", &self.plan.row_type)
            .attr("common_ancestor", self.plan.common_ancestor.name())
            .attr("outputs", outputs.join(", "))
            .attr("keep_input", self.plan.keep_input)
            .attr("binding_position", self.plan.binding_position)
            .attr("lookahead_quantum", self.lookahead_quantum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::nested_loops::NestedLoops;
    use crate::executor::scan::{GroupScan, ValuesScan};
    use crate::executor::test_util::{keys, run, Coi};
    use crate::executor::ExecutionConfig;

    fn values(rows: Vec<Row>) -> Box<dyn Operator> {
        let row_type = rows[0].row_type().clone();
        Box::new(ValuesScan::new(row_type, rows))
    }

    fn map(outer: Box<dyn Operator>, inner: impl Operator + 'static, pipeline: bool) -> NestedLoops {
        NestedLoops::new(outer, Box::new(inner), 0, pipeline, 1).unwrap()
    }

    #[test]
    fn test_ancestor_lookup_orphan() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let lookup = AncestorLookupNested::new(
            coi.group.clone(),
            coi.item_type(),
            vec![coi.order_type(), coi.customer_type()],
            0,
            1,
        )
        .unwrap();
        let outer = values(vec![coi.item_row(1, 11, 110), coi.item_row(3, 30, 300)]);
        let rows = run(&ctx, &map(outer, lookup, false)).unwrap();
        // customer 3 does not exist; its order still comes back
        assert_eq!(
            rows,
            vec![
                coi.customer_row(1, "alice"),
                coi.order_row(1, 11, 100),
                coi.order_row(3, 30, 50),
            ]
        );
    }

    #[test]
    fn test_ancestor_lookup_lookahead_equivalence() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let build = |q: usize| {
            let lookup = AncestorLookupNested::new(
                coi.group.clone(),
                coi.item_type(),
                vec![coi.customer_type(), coi.order_type()],
                0,
                q,
            )
            .unwrap();
            let outer = values(vec![
                coi.item_row(1, 10, 100),
                coi.item_row(1, 10, 101),
                coi.item_row(3, 30, 300),
                coi.item_row(1, 11, 110),
            ]);
            map(outer, lookup, true)
        };
        let plain = run(&ctx, &build(1)).unwrap();
        assert_eq!(keys(&plain), vec![1, 10, 1, 10, 30, 1, 11]);
        for q in [2, 3, 4, 9] {
            assert_eq!(run(&ctx, &build(q)).unwrap(), plain, "quantum {}", q);
        }
    }

    #[test]
    fn test_branch_lookup_from_customer() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        for (flag, expected) in [
            (InputPreservation::DiscardInput, vec![10, 100, 101, 11, 110, 20]),
            (InputPreservation::KeepInput, vec![1, 10, 100, 101, 11, 110, 2, 20, 4]),
        ] {
            let lookup = BranchLookupNested::new(
                coi.group.clone(),
                coi.customer_type(),
                None,
                vec![coi.order_type(), coi.item_type()],
                flag,
                0,
                1,
            )
            .unwrap();
            let outer = values(vec![
                coi.customer_row(1, "alice"),
                coi.customer_row(2, "bob"),
                coi.customer_row(4, "dave"),
            ]);
            assert_eq!(keys(&run(&ctx, &map(outer, lookup, false)).unwrap()), expected);
        }
    }

    #[test]
    fn test_branch_lookup_siblings_keep_input_after_branch() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let lookup = BranchLookupNested::new(
            coi.group.clone(),
            coi.order_type(),
            Some(coi.customer_type()),
            vec![coi.order_type()],
            InputPreservation::KeepInput,
            0,
            1,
        )
        .unwrap();
        let outer = values(vec![coi.order_row(1, 10, 300)]);
        let rows = run(&ctx, &map(outer, lookup, true)).unwrap();
        assert_eq!(keys(&rows), vec![10, 11, 10]);
    }

    #[test]
    fn test_branch_lookup_lookahead_equivalence() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let build = |q: usize| {
            let lookup = BranchLookupNested::new(
                coi.group.clone(),
                coi.order_type(),
                None,
                vec![coi.item_type()],
                InputPreservation::KeepInput,
                0,
                q,
            )
            .unwrap();
            let orders = crate::executor::lookup::GroupLookup::new(
                Box::new(GroupScan::new(coi.group.clone())),
                coi.group.clone(),
                coi.customer_type(),
                vec![coi.order_type()],
                InputPreservation::DiscardInput,
                1,
            )
            .unwrap();
            map(Box::new(orders), lookup, true)
        };
        let plain = run(&ctx, &build(1)).unwrap();
        // orders of customers 1 and 2, each followed by its items
        assert_eq!(keys(&plain), vec![10, 100, 101, 11, 110, 20]);
        for q in [2, 3, 7] {
            assert_eq!(run(&ctx, &build(q)).unwrap(), plain, "quantum {}", q);
        }
    }

    #[test]
    fn test_validation() {
        let coi = Coi::new();
        assert!(AncestorLookupNested::new(
            coi.group.clone(),
            coi.order_type(),
            vec![coi.item_type()],
            0,
            1
        )
        .is_err());
        assert!(AncestorLookupNested::new(coi.group.clone(), coi.order_type(), vec![], 0, 1).is_err());
        let index_type = coi.schema.index_row_type(&coi.order_amount);
        assert!(BranchLookupNested::new(
            coi.group.clone(),
            index_type.clone(),
            None,
            vec![coi.item_type()],
            InputPreservation::KeepInput,
            0,
            1
        )
        .is_err());
        assert!(BranchLookupNested::new(
            coi.group.clone(),
            index_type,
            None,
            vec![coi.item_type()],
            InputPreservation::DiscardInput,
            0,
            1
        )
        .is_ok());
        assert!(BranchLookupNested::new(
            coi.group.clone(),
            coi.order_type(),
            Some(coi.item_type()),
            vec![coi.item_type()],
            InputPreservation::DiscardInput,
            0,
            1
        )
        .is_err());
    }
}
