//! Hash join support
//!
//! `Using_HashTable` drains a build input into a [`HashTable`], publishes
//! it in a binding slot and then runs its joined input, in which a
//! `HashTableLookup_Default` probes the table with keys computed from the
//! current scope.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use super::bindings::{QueryBindings, SingletonBindingsCursor, SingletonHandle};
use super::chained::{BindableCursor, ChainedCursor, LeafCursor};
use super::context::QueryContext;
use super::datum::Datum;
use super::error::{check_argument, ExecutorResult};
use super::eval::{evaluate_all, Expression};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::RowType;
use super::{delegate_bindings, BindingsCursor, Cursor};

/// Rows grouped by key
///
/// Keys containing a null are never stored and never match.
#[derive(Debug, Default)]
pub struct HashTable {
    buckets: HashMap<Vec<Datum>, Vec<Row>>,
    rows: usize,
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `row` under `key`; returns false if the key holds a null
    pub fn insert(&mut self, key: Vec<Datum>, row: Row) -> bool {
        if key.iter().any(Datum::is_null) {
            return false;
        }
        self.buckets.entry(key).or_default().push(row);
        self.rows += 1;
        true
    }

    /// Rows stored under `key`, in insertion order
    pub fn matches(&self, key: &[Datum]) -> &[Row] {
        if key.iter().any(Datum::is_null) {
            return &[];
        }
        self.buckets.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Using_HashTable
#[derive(Debug)]
pub struct UsingHashTable {
    build: Box<dyn Operator>,
    hashed_type: Arc<RowType>,
    key_exprs: Vec<Expression>,
    binding_position: usize,
    joined: Box<dyn Operator>,
}

impl UsingHashTable {
    /// `key_exprs` are evaluated against each `hashed_type` row of `build`
    pub fn new(
        build: Box<dyn Operator>,
        hashed_type: Arc<RowType>,
        key_exprs: Vec<Expression>,
        binding_position: usize,
        joined: Box<dyn Operator>,
    ) -> ExecutorResult<Self> {
        check_argument(!key_exprs.is_empty(), || {
            "hash table needs at least one key expression".to_string()
        })?;
        Ok(Self {
            build,
            hashed_type,
            key_exprs,
            binding_position,
            joined,
        })
    }
}

impl Operator for UsingHashTable {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let singleton = SingletonBindingsCursor::new(None);
        let build_bindings = singleton.handle();
        let build = self.build.cursor(context, Box::new(singleton))?;
        let joined = self.joined.cursor(context, bindings)?;
        Ok(Box::new(UsingHashTableCursor {
            base: ChainedCursor::new(context, joined),
            build,
            build_bindings,
            hashed_type: self.hashed_type.clone(),
            key_exprs: self.key_exprs.clone(),
            binding_position: self.binding_position,
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.joined.row_type()
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.build.as_ref(), self.joined.as_ref()]
    }

    fn name(&self) -> &'static str {
        "Using_HashTable"
    }

    fn explain(&self) -> Explain {
        explain_with_inputs(self)
            .attr("hashed_type", &self.hashed_type)
            .attr("keys", self.key_exprs.len())
            .attr("binding_position", self.binding_position)
    }
}

struct UsingHashTableCursor {
    base: ChainedCursor,
    build: Box<dyn Cursor>,
    build_bindings: SingletonHandle,
    hashed_type: Arc<RowType>,
    key_exprs: Vec<Expression>,
    binding_position: usize,
}

impl UsingHashTableCursor {
    fn build_table(&mut self, bindings: &QueryBindings) -> ExecutorResult<HashTable> {
        let mut table = HashTable::new();
        self.build_bindings.reset(bindings.clone());
        self.build.open_top_level()?;
        let drained = self.drain_into(&mut table, bindings);
        let closed = self.build.close_top_level();
        drained?;
        closed?;
        Ok(table)
    }

    fn drain_into(&mut self, table: &mut HashTable, bindings: &QueryBindings) -> ExecutorResult<()> {
        while let Some(row) = self.build.next()? {
            if !row.is_type(&self.hashed_type) {
                continue;
            }
            let key = evaluate_all(&self.key_exprs, Some(&row), bindings, &self.base.context)?;
            table.insert(key, row);
        }
        Ok(())
    }
}

impl Cursor for UsingHashTableCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        let bindings = self.base.current_bindings()?.clone();
        let table = self.build_table(&bindings)?;
        debug!(
            operator = "Using_HashTable",
            rows = table.len(),
            position = self.binding_position,
            "hash table built"
        );
        bindings.set_hash_table(self.binding_position, Rc::new(table));
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
        self.base.log_yield("Using_HashTable", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(UsingHashTableCursor, base);

/// HashTableLookup_Default
///
/// Emits the rows stored under the key computed from the current scope.
#[derive(Debug)]
pub struct HashTableLookup {
    hashed_type: Arc<RowType>,
    binding_position: usize,
    probe_exprs: Vec<Expression>,
}

impl HashTableLookup {
    pub fn new(
        hashed_type: Arc<RowType>,
        binding_position: usize,
        probe_exprs: Vec<Expression>,
    ) -> ExecutorResult<Self> {
        check_argument(!probe_exprs.is_empty(), || {
            "hash table lookup needs at least one probe expression".to_string()
        })?;
        Ok(Self {
            hashed_type,
            binding_position,
            probe_exprs,
        })
    }
}

struct ProbeSource {
    binding_position: usize,
    probe_exprs: Vec<Expression>,
    matches: Vec<Row>,
    position: usize,
}

impl BindableCursor for ProbeSource {
    fn rebind(&mut self, context: &QueryContext, bindings: &QueryBindings) -> ExecutorResult<()> {
        let table = bindings.get_hash_table(self.binding_position)?;
        let key = evaluate_all(&self.probe_exprs, None, bindings, context)?;
        self.matches = table.matches(&key).to_vec();
        Ok(())
    }

    fn open(&mut self) -> ExecutorResult<()> {
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        let row = self.matches.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    fn close(&mut self) {
        self.matches.clear();
        self.position = 0;
    }
}

impl Operator for HashTableLookup {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let source = ProbeSource {
            binding_position: self.binding_position,
            probe_exprs: self.probe_exprs.clone(),
            matches: Vec::new(),
            position: 0,
        };
        Ok(Box::new(LeafCursor::new(self.name(), context, bindings, source)))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.hashed_type.clone())
    }

    fn name(&self) -> &'static str {
        "HashTableLookup_Default"
    }

    fn explain(&self) -> Explain {
        Explain::new(self.name())
            .attr("hashed_type", &self.hashed_type)
            .attr("binding_position", self.binding_position)
    }
}
