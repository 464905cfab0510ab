//! GroupLookup_Default: fetch ancestors and a descendant branch of each
//! input row
//!
//! Output order per input row: ancestors from the root down, then the input
//! row (when kept), then the branch rows in hkey order. Missing ancestors
//! of orphan rows are skipped.
//!
//! With a lookahead quantum above one the operator keeps a ring of input
//! rows whose lookups are already open. Each ring slot holds one group
//! cursor per ancestor and one for the branch, so the ring holds
//! `ceil(quantum / cursors_per_row)` rows.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::catalog::{Group, Table};
use crate::storage::GroupCursor;

use super::bindings::{same_scope, QueryBindings};
use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::error::{check_argument, ExecutorError, ExecutorResult};
use super::explain::Explain;
use super::hkey::HKey;
use super::lifecycle::{CursorState, Lifecycle};
use super::operator::{explain_with_inputs, InputPreservation, Operator};
use super::row::Row;
use super::row_type::{RowType, RowTypeKind, Schema};
use super::{delegate_bindings, BindingsCursor, Cursor};

/// A group cursor used for one lookup at a time
///
/// Ancestor lookups yield at most the row whose hkey equals the target;
/// branch lookups yield the whole subtree under the target.
pub(crate) struct GroupProbe {
    cursor: Box<dyn GroupCursor>,
    /// Exact hkey wanted by an ancestor lookup
    target: Option<HKey>,
    open: bool,
}

impl GroupProbe {
    pub(crate) fn new(context: &QueryContext, group: &Arc<Group>) -> ExecutorResult<Self> {
        Ok(Self {
            cursor: context.adapter().new_group_cursor(group)?,
            target: None,
            open: false,
        })
    }

    pub(crate) fn open_ancestor(&mut self, hkey: HKey) -> ExecutorResult<()> {
        self.cursor.rebind(hkey.clone(), false);
        self.cursor.open()?;
        self.target = Some(hkey);
        self.open = true;
        Ok(())
    }

    pub(crate) fn open_branch(&mut self, hkey: HKey) -> ExecutorResult<()> {
        self.cursor.rebind(hkey, true);
        self.cursor.open()?;
        self.target = None;
        self.open = true;
        Ok(())
    }

    pub(crate) fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.open {
            return Ok(None);
        }
        let row = self.cursor.next()?;
        match self.target.take() {
            Some(target) => {
                // a missing ancestor positions the cursor on a descendant
                self.close();
                Ok(row.filter(|r| r.hkey() == Some(&target)))
            }
            None => Ok(row),
        }
    }

    pub(crate) fn close(&mut self) {
        if self.open {
            self.cursor.close();
            self.open = false;
        }
        self.target = None;
    }
}

/// The hkey of a row, or an error for rows that have none
pub(crate) fn row_hkey(row: &Row) -> ExecutorResult<&HKey> {
    row.hkey()
        .ok_or_else(|| ExecutorError::internal(format!("row {} has no hkey", row)))
}

/// Table whose hkey rows of `row_type` carry, if it belongs to `group`
pub(crate) fn lookup_table(group: &Group, row_type: &RowType) -> ExecutorResult<Arc<Table>> {
    let table = row_type
        .hkey_table()
        .ok_or_else(|| ExecutorError::validation(format!("{} carries no hkey", row_type)))?;
    check_argument(group.contains(table), || {
        format!("{} is not in group {}", table.name(), group.name())
    })?;
    Ok(table.clone())
}

/// Table of a table row type
pub(crate) fn table_of(row_type: &RowType) -> ExecutorResult<Arc<Table>> {
    match row_type.kind() {
        RowTypeKind::Table(t) => Ok(t.clone()),
        _ => Err(ExecutorError::validation(format!(
            "{} is not a table row type",
            row_type
        ))),
    }
}

/// What to look up for each input row
#[derive(Debug, Clone)]
struct LookupPlan {
    /// Root first
    ancestors: Vec<Arc<Table>>,
    /// Types kept from the branch scan; empty when there is no branch
    branch_types: Vec<Arc<RowType>>,
    /// Ordinal appended to the input hkey to seed the branch scan
    branch_root_ordinal: Option<u32>,
}

impl LookupPlan {
    fn has_branch(&self) -> bool {
        !self.branch_types.is_empty()
    }

    fn branch_hkey(&self, row: &Row) -> ExecutorResult<HKey> {
        let mut hkey = row_hkey(row)?.clone();
        if let Some(ordinal) = self.branch_root_ordinal {
            hkey.extend_with_ordinal(ordinal);
        }
        Ok(hkey)
    }

    fn ancestor_hkey(&self, row: &Row, i: usize) -> ExecutorResult<HKey> {
        Ok(row_hkey(row)?.prefix(self.ancestors[i].hkey_segments()))
    }

    fn is_branch_output(&self, row: &Row) -> bool {
        self.branch_types.iter().any(|t| row.is_type(t))
    }
}

/// GroupLookup_Default
#[derive(Debug)]
pub struct GroupLookup {
    input: Box<dyn Operator>,
    group: Arc<Group>,
    input_type: Arc<RowType>,
    plan: LookupPlan,
    keep_input: bool,
    lookahead_quantum: usize,
}

impl GroupLookup {
    /// Look up `output_types` (table types of `group`) for every input row
    /// of `input_type`
    ///
    /// Each output type must be an ancestor of the input's table, the
    /// input's table itself (only when the input is discarded), or a
    /// descendant of it.
    pub fn new(
        input: Box<dyn Operator>,
        group: Arc<Group>,
        input_type: Arc<RowType>,
        output_types: Vec<Arc<RowType>>,
        flag: InputPreservation,
        lookahead_quantum: usize,
    ) -> ExecutorResult<Self> {
        check_argument(!output_types.is_empty(), || {
            "group lookup needs at least one output type".to_string()
        })?;
        let keep_input = flag == InputPreservation::KeepInput;
        let input_table = match input_type.kind() {
            RowTypeKind::Table(_) => lookup_table(&group, &input_type)?,
            RowTypeKind::Index(_) | RowTypeKind::HKey(_) => {
                check_argument(!keep_input, || {
                    format!("cannot keep input rows of {}", input_type)
                })?;
                lookup_table(&group, &input_type)?
            }
            _ => {
                return Err(ExecutorError::validation(format!(
                    "{} cannot drive a group lookup",
                    input_type
                )))
            }
        };

        let mut ancestors = Vec::new();
        let mut branch_types = Vec::new();
        let mut branch_root: Option<Arc<Table>> = None;
        let mut outputs_input_table = false;
        for output_type in &output_types {
            let table = table_of(output_type)?;
            check_argument(group.contains(&table), || {
                format!("{} is not in group {}", table.name(), group.name())
            })?;
            if table.id() == input_table.id() {
                check_argument(!keep_input, || {
                    format!("{} is both kept and looked up", output_type)
                })?;
                outputs_input_table = true;
            } else if group.is_ancestor(&table, &input_table) {
                ancestors.push(table);
            } else if group.is_ancestor(&input_table, &table) {
                branch_types.push(output_type.clone());
                let child = group.child_toward(&input_table, &table).ok_or_else(|| {
                    ExecutorError::internal(format!("no path from {} down to {}", input_table.name(), table.name()))
                })?;
                branch_root = match branch_root {
                    None => Some(child),
                    Some(root) if root.id() == child.id() || root.id() == input_table.id() => Some(root),
                    // outputs under two different children: scan the input's subtree
                    Some(_) => Some(input_table.clone()),
                };
            } else {
                return Err(ExecutorError::validation(format!(
                    "{} is neither an ancestor nor a descendant of {}",
                    table.name(),
                    input_table.name()
                )));
            }
        }
        let root_is_input = branch_root
            .as_ref()
            .is_some_and(|r| r.id() == input_table.id());
        if outputs_input_table {
            if root_is_input {
                let input_table_type = output_types
                    .iter()
                    .find(|t| t.table().is_some_and(|t| t.id() == input_table.id()))
                    .cloned()
                    .ok_or_else(|| ExecutorError::internal("input table type vanished"))?;
                branch_types.push(input_table_type);
            } else {
                ancestors.push(input_table.clone());
            }
        }
        ancestors.sort_by_key(|t| t.depth());
        branch_types.sort_by_key(|t| t.table().map_or(0, |t| t.depth()));
        let branch_root_ordinal = match &branch_root {
            Some(root) if !branch_types.is_empty() && root.id() != input_table.id() => {
                Some(root.ordinal())
            }
            _ => None,
        };
        Ok(Self {
            input,
            group,
            input_type,
            plan: LookupPlan {
                ancestors,
                branch_types,
                branch_root_ordinal,
            },
            keep_input,
            lookahead_quantum,
        })
    }

    /// AncestorLookup_Default: only ancestors of the input's table
    pub fn ancestors(
        input: Box<dyn Operator>,
        group: Arc<Group>,
        input_type: Arc<RowType>,
        ancestor_types: Vec<Arc<RowType>>,
        flag: InputPreservation,
        lookahead_quantum: usize,
    ) -> ExecutorResult<Self> {
        let lookup = Self::new(input, group, input_type, ancestor_types, flag, lookahead_quantum)?;
        check_argument(!lookup.plan.has_branch(), || {
            "ancestor lookup given a descendant type".to_string()
        })?;
        Ok(lookup)
    }

    /// BranchLookup_Default: the subtree of `branch_root_type` below each
    /// input row, every table of it included
    pub fn branch(
        input: Box<dyn Operator>,
        group: Arc<Group>,
        input_type: Arc<RowType>,
        branch_root_type: &Arc<RowType>,
        flag: InputPreservation,
        lookahead_quantum: usize,
        schema: &Schema,
    ) -> ExecutorResult<Self> {
        let root = table_of(branch_root_type)?;
        let output_types = group
            .tables()
            .iter()
            .filter(|t| t.id() == root.id() || group.is_ancestor(&root, t))
            .map(|t| schema.table_row_type(t))
            .collect();
        let lookup = Self::new(input, group, input_type, output_types, flag, lookahead_quantum)?;
        check_argument(lookup.plan.ancestors.is_empty(), || {
            format!("{} is not below the input table", root.name())
        })?;
        Ok(lookup)
    }
}

impl Operator for GroupLookup {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        if self.lookahead_quantum <= 1 {
            return Ok(Box::new(LookupCursor {
                base: ChainedCursor::new(context, input),
                probe: GroupProbe::new(context, &self.group)?,
                input_type: self.input_type.clone(),
                plan: self.plan.clone(),
                keep_input: self.keep_input,
                input_row: None,
                pending: VecDeque::new(),
                state: LookupState::Between,
            }));
        }
        Ok(Box::new(LookaheadLookupCursor::new(context, self, input)?))
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn name(&self) -> &'static str {
        "GroupLookup_Default"
    }

    fn explain(&self) -> Explain {
        let ancestors: Vec<&str> = self.plan.ancestors.iter().map(|t| t.name()).collect();
        let branch: Vec<String> = self.plan.branch_types.iter().map(|t| t.to_string()).collect();
        explain_with_inputs(self)
            .attr("group", self.group.name())
            .attr("input_type", &self.input_type)
            .attr("ancestors", ancestors.join(", "))
            .attr("branch", branch.join(", "))
            .attr("keep_input", self.keep_input)
            .attr("lookahead_quantum", self.lookahead_quantum)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupState {
    /// Just opened, or done with the previous input row
    Between,
    /// Ancestors queued; branch not yet open
    Ancestor,
    /// Scanning branch rows
    Branch,
    /// Input ran out
    Exhausted,
}

struct LookupCursor {
    base: ChainedCursor,
    probe: GroupProbe,
    input_type: Arc<RowType>,
    plan: LookupPlan,
    keep_input: bool,
    input_row: Option<Row>,
    pending: VecDeque<Row>,
    state: LookupState,
}

impl LookupCursor {
    fn advance(&mut self) -> ExecutorResult<()> {
        match self.state {
            LookupState::Between => self.advance_input(),
            LookupState::Ancestor => self.start_branch(),
            LookupState::Branch => self.advance_branch(),
            LookupState::Exhausted => Ok(()),
        }
    }

    fn advance_input(&mut self) -> ExecutorResult<()> {
        match self.base.input.next()? {
            Some(row) => {
                if row.is_type(&self.input_type) {
                    self.find_ancestors(&row)?;
                    self.state = LookupState::Ancestor;
                }
                if self.keep_input {
                    self.pending.push_back(row.clone());
                }
                self.input_row = Some(row);
            }
            None => {
                self.input_row = None;
                self.state = LookupState::Exhausted;
            }
        }
        Ok(())
    }

    fn find_ancestors(&mut self, row: &Row) -> ExecutorResult<()> {
        for i in 0..self.plan.ancestors.len() {
            self.probe.open_ancestor(self.plan.ancestor_hkey(row, i)?)?;
            let found = self.probe.next();
            self.probe.close();
            if let Some(ancestor) = found? {
                self.pending.push_back(ancestor);
            }
        }
        Ok(())
    }

    fn start_branch(&mut self) -> ExecutorResult<()> {
        let row = match (&self.input_row, self.plan.has_branch()) {
            (Some(row), true) => row,
            _ => {
                self.state = LookupState::Between;
                return Ok(());
            }
        };
        let hkey = self.plan.branch_hkey(row)?;
        self.probe.open_branch(hkey)?;
        self.state = LookupState::Branch;
        Ok(())
    }

    fn advance_branch(&mut self) -> ExecutorResult<()> {
        match self.probe.next()? {
            None => {
                self.probe.close();
                self.state = LookupState::Between;
            }
            Some(row) if self.plan.is_branch_output(&row) => self.pending.push_back(row),
            Some(_) => {}
        }
        Ok(())
    }
}

impl Cursor for LookupCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.base.open()?;
        self.state = LookupState::Between;
        Ok(())
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        while self.pending.is_empty() && self.state != LookupState::Exhausted {
            self.advance()?;
        }
        let row = self.pending.pop_front();
        if row.is_none() {
            self.base.exhaust();
        }
        self.base.log_yield("GroupLookup_Default", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.probe.close();
        self.input_row = None;
        self.pending.clear();
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(LookupCursor, base);

/// One buffered input row and its open lookups
struct LookupSlot {
    input_row: Option<Row>,
    bindings: Option<QueryBindings>,
    /// Ancestor probes, then the branch probe
    probes: Vec<GroupProbe>,
    /// False for rows of other types, which get no lookups
    looked_up: bool,
}

impl LookupSlot {
    fn clear(&mut self) {
        self.input_row = None;
        self.bindings = None;
        self.looked_up = false;
        for probe in &mut self.probes {
            probe.close();
        }
    }
}

struct LookaheadLookupCursor {
    context: Arc<QueryContext>,
    input: Box<dyn Cursor>,
    lifecycle: Lifecycle,
    input_type: Arc<RowType>,
    plan: LookupPlan,
    slots: Vec<LookupSlot>,
    /// Scopes read ahead from the input, not yet handed out
    pending_bindings: VecDeque<QueryBindings>,
    /// Number of outputs per row: ancestors, kept input, branch
    noutputs: usize,
    keep_index: Option<usize>,
    branch_index: Option<usize>,
    current_index: usize,
    next_index: usize,
    output_index: usize,
    current_bindings: Option<QueryBindings>,
    /// Scope the input is open on while filling
    next_bindings: Option<QueryBindings>,
    bindings_exhausted: bool,
    /// `current_bindings` came straight from the input and is not open yet
    new_bindings: bool,
}

impl LookaheadLookupCursor {
    fn new(context: &Arc<QueryContext>, op: &GroupLookup, input: Box<dyn Cursor>) -> ExecutorResult<Self> {
        let nancestors = op.plan.ancestors.len();
        let mut noutputs = nancestors;
        let mut ncursors = nancestors;
        let keep_index = op.keep_input.then(|| {
            noutputs += 1;
            noutputs - 1
        });
        let branch_index = op.plan.has_branch().then(|| {
            noutputs += 1;
            ncursors += 1;
            noutputs - 1
        });
        let ncursors = ncursors.max(1);
        let rows = ((op.lookahead_quantum + ncursors - 1) / ncursors).max(1);
        let mut slots = Vec::with_capacity(rows);
        for _ in 0..rows {
            let probes = (0..ncursors)
                .map(|_| GroupProbe::new(context, &op.group))
                .collect::<ExecutorResult<Vec<_>>>()?;
            slots.push(LookupSlot {
                input_row: None,
                bindings: None,
                probes,
                looked_up: false,
            });
        }
        debug!(
            operator = "GroupLookup_Default",
            rows,
            cursors_per_row = ncursors,
            "lookahead ring"
        );
        Ok(Self {
            context: context.clone(),
            input,
            lifecycle: Lifecycle::for_context(context),
            input_type: op.input_type.clone(),
            plan: op.plan.clone(),
            slots,
            pending_bindings: VecDeque::new(),
            noutputs,
            keep_index,
            branch_index,
            current_index: 0,
            next_index: 0,
            output_index: 0,
            current_bindings: None,
            next_bindings: None,
            bindings_exhausted: false,
            new_bindings: false,
        })
    }

    fn ring_len(&self) -> usize {
        self.slots.len()
    }

    /// Probe slot serving output position `i`
    fn probe_index(&self, i: usize) -> usize {
        if Some(i) == self.branch_index {
            self.plan.ancestors.len()
        } else {
            i
        }
    }

    /// Read input rows into free ring slots, crossing into later scopes of
    /// the same depth, and open their lookups
    fn fill_pipeline(&mut self) -> ExecutorResult<()> {
        let depth = match &self.current_bindings {
            Some(b) => b.depth(),
            None => return Ok(()),
        };
        while !self.bindings_exhausted && self.slots[self.next_index].input_row.is_none() {
            if self.next_bindings.is_none() {
                if self.new_bindings {
                    self.next_bindings = self.current_bindings.clone();
                    self.new_bindings = false;
                }
                while self.next_bindings.as_ref().map_or(true, |b| b.depth() != depth) {
                    match self.input.next_bindings()? {
                        Some(b) => {
                            self.pending_bindings.push_back(b.clone());
                            self.next_bindings = Some(b);
                        }
                        None => {
                            self.bindings_exhausted = true;
                            return Ok(());
                        }
                    }
                }
                self.input.open()?;
            }
            match self.input.next()? {
                None => {
                    self.input.close()?;
                    self.next_bindings = None;
                }
                Some(row) => self.load_slot(row)?,
            }
        }
        Ok(())
    }

    fn load_slot(&mut self, row: Row) -> ExecutorResult<()> {
        if self.context.config().log_execution {
            trace!(operator = "GroupLookup_Default", row = %row, "new input");
        }
        let looked_up = row.is_type(&self.input_type);
        let slot = &mut self.slots[self.next_index];
        if looked_up {
            for i in 0..self.plan.ancestors.len() {
                slot.probes[i].open_ancestor(self.plan.ancestor_hkey(&row, i)?)?;
            }
            if self.plan.has_branch() {
                let hkey = self.plan.branch_hkey(&row)?;
                slot.probes[self.plan.ancestors.len()].open_branch(hkey)?;
            }
        }
        slot.looked_up = looked_up;
        slot.bindings = self.next_bindings.clone();
        slot.input_row = Some(row);
        self.next_index = (self.next_index + 1) % self.ring_len();
        Ok(())
    }

    fn clear_bindings(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.pending_bindings.clear();
        self.current_bindings = None;
        self.next_bindings = None;
    }
}

impl Cursor for LookaheadLookupCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.lifecycle.open()?;
        self.output_index = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.lifecycle.begin_next(&self.context)? {
            return Ok(None);
        }
        let mut output = None;
        while self.lifecycle.is_active() && output.is_none() {
            self.fill_pipeline()?;
            let current = self.current_index;
            let slot_scope_matches = same_scope(
                self.slots[current].bindings.as_ref(),
                self.current_bindings.as_ref(),
            );
            if self.slots[current].input_row.is_none() || !slot_scope_matches {
                // nothing loaded for this scope
                self.lifecycle.exhaust();
            } else if self.output_index >= self.noutputs {
                self.slots[current].clear();
                self.current_index = (current + 1) % self.ring_len();
                self.output_index = 0;
            } else if Some(self.output_index) == self.keep_index {
                output = self.slots[current].input_row.clone();
                self.output_index += 1;
            } else if !self.slots[current].looked_up {
                self.output_index += 1;
            } else {
                let is_branch = Some(self.output_index) == self.branch_index;
                let probe = self.probe_index(self.output_index);
                output = self.slots[current].probes[probe].next()?;
                if is_branch {
                    match &output {
                        None => {
                            self.slots[current].probes[probe].close();
                            self.output_index += 1;
                        }
                        Some(row) if !self.plan.is_branch_output(row) => output = None,
                        Some(_) => {}
                    }
                } else {
                    self.slots[current].probes[probe].close();
                    self.output_index += 1;
                }
            }
        }
        if self.context.config().log_execution {
            match &output {
                Some(r) => trace!(operator = "GroupLookup_Default", row = %r, "yield"),
                None => trace!(operator = "GroupLookup_Default", "exhausted"),
            }
        }
        Ok(output)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        // rows still buffered for this scope are dropped
        for _ in 0..self.ring_len() {
            let slot = &mut self.slots[self.current_index];
            if slot.bindings.is_none() || !same_scope(slot.bindings.as_ref(), self.current_bindings.as_ref()) {
                break;
            }
            slot.clear();
            self.current_index = (self.current_index + 1) % self.ring_len();
        }
        // an input already reading a later scope stays open for it
        if !self.input.is_closed()
            && same_scope(self.next_bindings.as_ref(), self.current_bindings.as_ref())
        {
            self.input.close()?;
            self.next_bindings = None;
        }
        self.lifecycle.close()
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }
}

impl BindingsCursor for LookaheadLookupCursor {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.lifecycle.check_closed("open_bindings")?;
        self.clear_bindings();
        self.current_index = 0;
        self.next_index = 0;
        self.bindings_exhausted = false;
        self.new_bindings = false;
        self.input.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        self.lifecycle.check_closed("next_bindings")?;
        self.current_bindings = self.pending_bindings.pop_front();
        if self.current_bindings.is_none() {
            self.current_bindings = self.input.next_bindings()?;
            if self.current_bindings.is_none() {
                self.bindings_exhausted = true;
            }
            self.new_bindings = true;
        }
        Ok(self.current_bindings.clone())
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        if !self.input.is_closed() {
            self.input.close()?;
        }
        self.input.close_bindings()?;
        self.clear_bindings();
        Ok(())
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        self.lifecycle.check_closed("cancel_bindings")?;
        while self
            .pending_bindings
            .front()
            .is_some_and(|b| b.is_descendant_of(bindings))
        {
            self.pending_bindings.pop_front();
        }
        for _ in 0..self.ring_len() {
            let slot = &mut self.slots[self.current_index];
            if !slot.bindings.as_ref().is_some_and(|b| b.is_descendant_of(bindings)) {
                break;
            }
            slot.clear();
            self.current_index = (self.current_index + 1) % self.ring_len();
        }
        self.current_bindings = None;
        self.new_bindings = false;
        if self
            .next_bindings
            .as_ref()
            .is_some_and(|b| b.is_descendant_of(bindings))
        {
            if !self.input.is_closed() {
                self.input.close()?;
            }
            self.next_bindings = None;
        }
        self.input.cancel_bindings(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scan::{GroupScan, IndexScan, ValuesScan};
    use crate::executor::test_util::{keys, run, Coi};
    use crate::executor::ExecutionConfig;

    fn values(rows: Vec<Row>) -> Box<dyn Operator> {
        let row_type = rows[0].row_type().clone();
        Box::new(ValuesScan::new(row_type, rows))
    }

    fn hkeys(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r.hkey().map_or("-".into(), |h| h.to_string()))
            .collect()
    }

    #[test]
    fn test_ancestors_skip_missing_parent() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let input = values(vec![coi.item_row(1, 10, 100), coi.item_row(3, 30, 300)]);
        let lookup = GroupLookup::ancestors(
            input,
            coi.group.clone(),
            coi.item_type(),
            vec![coi.order_type(), coi.customer_type()],
            InputPreservation::KeepInput,
            1,
        )
        .unwrap();
        let rows = run(&ctx, &lookup).unwrap();
        let expected = vec![
            coi.customer_row(1, "alice"),
            coi.order_row(1, 10, 300),
            coi.item_row(1, 10, 100),
            coi.order_row(3, 30, 50),
            coi.item_row(3, 30, 300),
        ];
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_branch_lookup() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let input = values(vec![
            coi.customer_row(1, "alice"),
            coi.customer_row(2, "bob"),
            coi.customer_row(4, "dave"),
        ]);
        let lookup = GroupLookup::branch(
            input,
            coi.group.clone(),
            coi.customer_type(),
            &coi.order_type(),
            InputPreservation::KeepInput,
            1,
            &coi.schema,
        )
        .unwrap();
        let rows = run(&ctx, &lookup).unwrap();
        assert_eq!(keys(&rows), vec![1, 10, 100, 101, 11, 110, 2, 20, 4]);
    }

    #[test]
    fn test_branch_only_selected_types() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let input = values(vec![coi.customer_row(1, "alice")]);
        let lookup = GroupLookup::new(
            input,
            coi.group.clone(),
            coi.customer_type(),
            vec![coi.item_type()],
            InputPreservation::DiscardInput,
            1,
        )
        .unwrap();
        assert_eq!(keys(&run(&ctx, &lookup).unwrap()), vec![100, 101, 110]);
    }

    #[test]
    fn test_index_rows_find_their_table_row() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let index_type = coi.schema.index_row_type(&coi.order_amount);
        let scan = IndexScan::full(index_type.clone()).unwrap();
        let lookup = GroupLookup::new(
            Box::new(scan),
            coi.group.clone(),
            index_type,
            vec![coi.customer_type(), coi.order_type()],
            InputPreservation::DiscardInput,
            1,
        )
        .unwrap();
        let rows = run(&ctx, &lookup).unwrap();
        // amounts 50 (orphan), 100, 200, 300
        assert_eq!(keys(&rows), vec![30, 1, 11, 2, 20, 1, 10]);
    }

    #[test]
    fn test_other_rows_pass_only_when_kept() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        for (flag, expected) in [
            (InputPreservation::KeepInput, 11usize + 3),
            (InputPreservation::DiscardInput, 3),
        ] {
            let lookup = GroupLookup::new(
                Box::new(GroupScan::new(coi.group.clone())),
                coi.group.clone(),
                coi.order_type(),
                vec![coi.customer_type()],
                flag,
                1,
            )
            .unwrap();
            // three orders have a customer
            assert_eq!(run(&ctx, &lookup).unwrap().len(), expected);
        }
    }

    #[test]
    fn test_lookahead_matches_plain_execution() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let build = |q: usize, flag| {
            GroupLookup::new(
                Box::new(GroupScan::new(coi.group.clone())),
                coi.group.clone(),
                coi.order_type(),
                vec![coi.customer_type(), coi.item_type()],
                flag,
                q,
            )
            .unwrap()
        };
        for flag in [InputPreservation::KeepInput, InputPreservation::DiscardInput] {
            let plain = run(&ctx, &build(1, flag)).unwrap();
            assert!(!plain.is_empty());
            for q in [2, 3, 5, 16] {
                let rows = run(&ctx, &build(q, flag)).unwrap();
                assert_eq!(hkeys(&rows), hkeys(&plain), "quantum {} {:?}", q, flag);
            }
        }
    }

    #[test]
    fn test_validation() {
        let coi = Coi::new();
        let scan = || -> Box<dyn Operator> { Box::new(GroupScan::new(coi.group.clone())) };
        assert!(GroupLookup::new(
            scan(),
            coi.group.clone(),
            coi.order_type(),
            vec![],
            InputPreservation::KeepInput,
            1
        )
        .is_err());
        assert!(GroupLookup::new(
            scan(),
            coi.group.clone(),
            coi.order_type(),
            vec![coi.order_type()],
            InputPreservation::KeepInput,
            1
        )
        .is_err());
        assert!(GroupLookup::new(
            scan(),
            coi.group.clone(),
            coi.order_type(),
            vec![coi.order_type()],
            InputPreservation::DiscardInput,
            1
        )
        .is_ok());
        let index_type = coi.schema.index_row_type(&coi.order_amount);
        assert!(GroupLookup::new(
            scan(),
            coi.group.clone(),
            index_type,
            vec![coi.customer_type()],
            InputPreservation::KeepInput,
            1
        )
        .is_err());
        assert!(GroupLookup::ancestors(
            scan(),
            coi.group.clone(),
            coi.order_type(),
            vec![coi.item_type()],
            InputPreservation::KeepInput,
            1
        )
        .is_err());
    }

    #[test]
    fn test_explain() {
        let coi = Coi::new();
        let lookup = GroupLookup::new(
            Box::new(GroupScan::new(coi.group.clone())),
            coi.group.clone(),
            coi.order_type(),
            vec![coi.customer_type(), coi.item_type()],
            InputPreservation::KeepInput,
            4,
        )
        .unwrap();
        let e = lookup.explain();
        assert_eq!(e.get("ancestors"), Some("customer"));
        assert_eq!(e.get("lookahead_quantum"), Some("4"));
        assert_eq!(e.inputs[0].name, "GroupScan_Default");
    }
}
