//! Query bindings and bindings streams
//!
//! A `QueryBindings` scope maps binding positions to values, rows, hash
//! tables or bloom filters. Scopes form a tree: a nested loop creates a
//! child scope per outer row, and lookups that miss in a child fall through
//! to its ancestors. Cursors consume scopes as a linear stream through the
//! [`BindingsCursor`] protocol.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::bloom::BloomFilter;
use super::datum::Datum;
use super::error::{ExecutorError, ExecutorResult};
use super::hash_table::HashTable;
use super::row::Row;
use super::BindingsCursor;

static NEXT_BINDINGS_ID: AtomicU64 = AtomicU64::new(1);

/// Contents of one binding position
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Datum),
    Row(Row),
    HashTable(Rc<HashTable>),
    BloomFilter(Rc<BloomFilter>),
}

struct BindingsInner {
    id: u64,
    depth: usize,
    parent: Option<QueryBindings>,
    slots: RefCell<HashMap<usize, Binding>>,
}

/// A bindings scope; clones share the same scope
#[derive(Clone)]
pub struct QueryBindings(Rc<BindingsInner>);

impl QueryBindings {
    /// A new root scope at depth 0
    pub fn new() -> Self {
        Self::with_parent(None, 0)
    }

    fn with_parent(parent: Option<QueryBindings>, depth: usize) -> Self {
        QueryBindings(Rc::new(BindingsInner {
            id: NEXT_BINDINGS_ID.fetch_add(1, Ordering::Relaxed),
            depth,
            parent,
            slots: RefCell::new(HashMap::new()),
        }))
    }

    /// A child scope one level deeper
    pub fn create_bindings(&self) -> QueryBindings {
        Self::with_parent(Some(self.clone()), self.depth() + 1)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn parent(&self) -> Option<&QueryBindings> {
        self.0.parent.as_ref()
    }

    /// True if `self` is `ancestor` or lies below it
    pub fn is_descendant_of(&self, ancestor: &QueryBindings) -> bool {
        let mut current = Some(self);
        while let Some(b) = current {
            if b == ancestor {
                return true;
            }
            if b.depth() <= ancestor.depth() {
                return false;
            }
            current = b.parent();
        }
        false
    }

    pub fn set_value(&self, position: usize, value: Datum) {
        self.0.slots.borrow_mut().insert(position, Binding::Value(value));
    }

    pub fn set_row(&self, position: usize, row: Row) {
        self.0.slots.borrow_mut().insert(position, Binding::Row(row));
    }

    pub fn set_hash_table(&self, position: usize, table: Rc<HashTable>) {
        self.0
            .slots
            .borrow_mut()
            .insert(position, Binding::HashTable(table));
    }

    pub fn set_bloom_filter(&self, position: usize, filter: Rc<BloomFilter>) {
        self.0
            .slots
            .borrow_mut()
            .insert(position, Binding::BloomFilter(filter));
    }

    /// The binding at `position`, searching ancestors if this scope has none
    pub fn get(&self, position: usize) -> ExecutorResult<Binding> {
        let mut current = Some(self);
        while let Some(b) = current {
            if let Some(binding) = b.0.slots.borrow().get(&position) {
                return Ok(binding.clone());
            }
            current = b.parent();
        }
        Err(ExecutorError::BindingNotSet(position))
    }

    pub fn is_bound(&self, position: usize) -> bool {
        self.get(position).is_ok()
    }

    pub fn get_value(&self, position: usize) -> ExecutorResult<Datum> {
        match self.get(position)? {
            Binding::Value(v) => Ok(v),
            _ => Err(ExecutorError::BindingMismatch {
                position,
                expected: "value",
            }),
        }
    }

    pub fn get_row(&self, position: usize) -> ExecutorResult<Row> {
        match self.get(position)? {
            Binding::Row(r) => Ok(r),
            _ => Err(ExecutorError::BindingMismatch {
                position,
                expected: "row",
            }),
        }
    }

    pub fn get_hash_table(&self, position: usize) -> ExecutorResult<Rc<HashTable>> {
        match self.get(position)? {
            Binding::HashTable(t) => Ok(t),
            _ => Err(ExecutorError::BindingMismatch {
                position,
                expected: "hash table",
            }),
        }
    }

    pub fn get_bloom_filter(&self, position: usize) -> ExecutorResult<Rc<BloomFilter>> {
        match self.get(position)? {
            Binding::BloomFilter(f) => Ok(f),
            _ => Err(ExecutorError::BindingMismatch {
                position,
                expected: "bloom filter",
            }),
        }
    }
}

impl Default for QueryBindings {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for QueryBindings {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for QueryBindings {}

impl fmt::Debug for QueryBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryBindings#{}@{}", self.0.id, self.0.depth)
    }
}

/// True if both are absent or both are the same scope
pub(crate) fn same_scope(a: Option<&QueryBindings>, b: Option<&QueryBindings>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SingletonState {
    Pending,
    Exhausted,
    Closed,
}

#[derive(Debug)]
struct Singleton {
    bindings: Option<QueryBindings>,
    state: SingletonState,
}

/// Bindings stream yielding exactly one scope
#[derive(Debug)]
pub struct SingletonBindingsCursor {
    shared: Rc<RefCell<Singleton>>,
}

/// Handle for re-pointing a [`SingletonBindingsCursor`] at another scope
#[derive(Debug, Clone)]
pub struct SingletonHandle {
    shared: Rc<RefCell<Singleton>>,
}

impl SingletonBindingsCursor {
    pub fn new(bindings: Option<QueryBindings>) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Singleton {
                bindings,
                state: SingletonState::Closed,
            })),
        }
    }

    pub fn handle(&self) -> SingletonHandle {
        SingletonHandle {
            shared: self.shared.clone(),
        }
    }
}

impl SingletonHandle {
    /// Make `bindings` the pending scope
    pub fn reset(&self, bindings: QueryBindings) {
        let mut s = self.shared.borrow_mut();
        s.bindings = Some(bindings);
        s.state = SingletonState::Pending;
    }
}

impl BindingsCursor for SingletonBindingsCursor {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.shared.borrow_mut().state = SingletonState::Pending;
        Ok(())
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        let mut s = self.shared.borrow_mut();
        if s.state == SingletonState::Pending {
            s.state = SingletonState::Exhausted;
            Ok(s.bindings.clone())
        } else {
            Ok(None)
        }
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        self.shared.borrow_mut().state = SingletonState::Closed;
        Ok(())
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        let mut s = self.shared.borrow_mut();
        if s.bindings.as_ref().is_some_and(|b| b.is_descendant_of(bindings)) {
            s.state = SingletonState::Exhausted;
        }
        Ok(())
    }
}

struct FanOut {
    input: Box<dyn BindingsCursor>,
    buffer: VecDeque<QueryBindings>,
    /// Stream index of `buffer[0]`
    offset: usize,
    /// Next stream index per consumer
    positions: Vec<usize>,
    exhausted: bool,
}

impl FanOut {
    fn trim(&mut self) {
        let low = self.positions.iter().copied().min().unwrap_or(self.offset);
        while self.offset < low && self.buffer.pop_front().is_some() {
            self.offset += 1;
        }
    }
}

/// One consumer of a bindings stream shared by several cursors
///
/// Every consumer observes the same sequence of scopes. The consumer
/// created by [`MultipleBindingsCursor::new`] owns the underlying stream:
/// only it opens, closes and cancels the input.
pub struct MultipleBindingsCursor {
    shared: Rc<RefCell<FanOut>>,
    consumer: usize,
}

impl MultipleBindingsCursor {
    pub fn new(input: Box<dyn BindingsCursor>) -> Self {
        Self {
            shared: Rc::new(RefCell::new(FanOut {
                input,
                buffer: VecDeque::new(),
                offset: 0,
                positions: vec![0],
                exhausted: false,
            })),
            consumer: 0,
        }
    }

    /// Add a consumer positioned where the owning consumer is
    pub fn new_consumer(&self) -> MultipleBindingsCursor {
        let mut fan = self.shared.borrow_mut();
        let start = fan.positions[0];
        fan.positions.push(start);
        MultipleBindingsCursor {
            shared: self.shared.clone(),
            consumer: fan.positions.len() - 1,
        }
    }

    fn is_owner(&self) -> bool {
        self.consumer == 0
    }
}

impl BindingsCursor for MultipleBindingsCursor {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        if !self.is_owner() {
            return Ok(());
        }
        let mut fan = self.shared.borrow_mut();
        fan.input.open_bindings()?;
        fan.buffer.clear();
        fan.offset = 0;
        fan.positions.iter_mut().for_each(|p| *p = 0);
        fan.exhausted = false;
        Ok(())
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        let mut fan = self.shared.borrow_mut();
        let pos = fan.positions[self.consumer];
        let bindings = if pos < fan.offset + fan.buffer.len() {
            fan.buffer[pos - fan.offset].clone()
        } else if fan.exhausted {
            return Ok(None);
        } else {
            match fan.input.next_bindings()? {
                Some(b) => {
                    fan.buffer.push_back(b.clone());
                    b
                }
                None => {
                    fan.exhausted = true;
                    return Ok(None);
                }
            }
        };
        fan.positions[self.consumer] = pos + 1;
        fan.trim();
        Ok(Some(bindings))
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        if !self.is_owner() {
            return Ok(());
        }
        let mut fan = self.shared.borrow_mut();
        fan.buffer.clear();
        fan.offset = 0;
        fan.positions.iter_mut().for_each(|p| *p = 0);
        fan.input.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        let mut fan = self.shared.borrow_mut();
        let mut pos = fan.positions[self.consumer];
        while pos < fan.offset + fan.buffer.len()
            && fan.buffer[pos - fan.offset].is_descendant_of(bindings)
        {
            pos += 1;
        }
        fan.positions[self.consumer] = pos;
        fan.trim();
        if self.is_owner() {
            fan.input.cancel_bindings(bindings)?;
        }
        Ok(())
    }
}
