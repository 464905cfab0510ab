//! In-memory storage adapter
//!
//! Keeps each group as a `BTreeMap` keyed by hkey, so a group scan visits
//! parents immediately before their descendants. Index rows are derived
//! from table rows when an index cursor opens. Cursors snapshot the rows
//! they will return at `open`, so mutations made while a cursor is open are
//! not observed by it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::catalog::Group;
use crate::executor::{Datum, HKey, Row, RowType, RowTypeKind};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::traits::{
    compare_keys, ColumnSelector, GroupCursor, IndexCursor, IndexOrdering, KeyRange, RowCursor,
    SortOption, Sorter, StoreAdapter,
};

type GroupData = BTreeMap<HKey, Row>;
type Groups = HashMap<String, GroupData>;

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Rows per sorted run before runs are merged
    pub sort_run_rows: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sort_run_rows: 1024,
        }
    }
}

#[derive(Debug)]
struct Sequence {
    value: i64,
    increment: i64,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: StoreConfig,
    groups: Arc<RwLock<Groups>>,
    sequences: Mutex<HashMap<String, Sequence>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            groups: Arc::new(RwLock::new(HashMap::new())),
            sequences: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Write every row, failing on the first error
    pub fn load<I>(&self, rows: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = Row>,
    {
        for row in rows {
            self.write_row(&row)?;
        }
        Ok(())
    }

    /// All rows of a group in hkey order
    pub fn rows(&self, group: &str) -> Vec<Row> {
        self.groups
            .read()
            .get(group)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn create_sequence(&self, name: impl Into<String>, start: i64, increment: i64) {
        self.sequences.lock().insert(
            name.into(),
            Sequence {
                value: start - increment,
                increment,
            },
        );
    }

    fn table_row_location(row: &Row) -> StorageResult<(String, HKey)> {
        let table = row
            .row_type()
            .table()
            .ok_or_else(|| StorageError::NotATableRow(row.row_type().to_string()))?;
        let hkey = row
            .hkey()
            .ok_or_else(|| StorageError::NotATableRow(format!("{} has no hkey", row)))?;
        Ok((table.group().to_string(), hkey.clone()))
    }
}

impl StoreAdapter for MemoryStore {
    fn new_group_cursor(&self, group: &Arc<Group>) -> StorageResult<Box<dyn GroupCursor>> {
        Ok(Box::new(MemoryGroupCursor {
            groups: self.groups.clone(),
            group: group.name().to_string(),
            target: None,
            pending: VecDeque::new(),
        }))
    }

    fn new_index_cursor(
        &self,
        index_type: &Arc<RowType>,
        ordering: IndexOrdering,
    ) -> StorageResult<Box<dyn IndexCursor>> {
        if !matches!(index_type.kind(), RowTypeKind::Index(_)) {
            return Err(StorageError::Unsupported("index cursor over non-index row type"));
        }
        Ok(Box::new(MemoryIndexCursor {
            groups: self.groups.clone(),
            index_type: index_type.clone(),
            ordering,
            range: KeyRange::unbounded(),
            rows: Vec::new(),
            position: 0,
        }))
    }

    fn create_sorter(&self, ascending: &[bool], option: SortOption) -> Box<dyn Sorter> {
        Box::new(MemorySorter {
            run_rows: self.config.sort_run_rows.max(1),
            ascending: ascending.to_vec(),
            option,
            runs: Vec::new(),
            current: Vec::new(),
            seq: 0,
        })
    }

    fn write_row(&self, row: &Row) -> StorageResult<()> {
        let (group, hkey) = Self::table_row_location(row)?;
        let mut groups = self.groups.write();
        let data = groups.entry(group).or_default();
        if data.contains_key(&hkey) {
            return Err(StorageError::DuplicateKey(hkey.to_string()));
        }
        data.insert(hkey, row.clone());
        Ok(())
    }

    fn update_row(&self, old: &Row, new: &Row) -> StorageResult<()> {
        let (group, old_hkey) = Self::table_row_location(old)?;
        let (_, new_hkey) = Self::table_row_location(new)?;
        let mut groups = self.groups.write();
        let data = groups
            .get_mut(&group)
            .ok_or_else(|| StorageError::RowNotFound(old_hkey.to_string()))?;
        if !data.contains_key(&old_hkey) {
            return Err(StorageError::RowNotFound(old_hkey.to_string()));
        }
        if new_hkey != old_hkey {
            if data.contains_key(&new_hkey) {
                return Err(StorageError::DuplicateKey(new_hkey.to_string()));
            }
            data.remove(&old_hkey);
        }
        data.insert(new_hkey, new.clone());
        Ok(())
    }

    fn delete_row(&self, row: &Row, cascade: bool) -> StorageResult<()> {
        let (group, hkey) = Self::table_row_location(row)?;
        let mut groups = self.groups.write();
        let data = groups
            .get_mut(&group)
            .ok_or_else(|| StorageError::RowNotFound(hkey.to_string()))?;
        if data.remove(&hkey).is_none() {
            return Err(StorageError::RowNotFound(hkey.to_string()));
        }
        if cascade {
            let descendants: Vec<HKey> = data
                .range(hkey.clone()..)
                .take_while(|(k, _)| hkey.is_prefix_of(k))
                .map(|(k, _)| k.clone())
                .collect();
            for k in descendants {
                data.remove(&k);
            }
        }
        Ok(())
    }

    fn sequence_next_value(&self, name: &str) -> StorageResult<i64> {
        let mut sequences = self.sequences.lock();
        let seq = sequences
            .get_mut(name)
            .ok_or_else(|| StorageError::SequenceNotFound(name.to_string()))?;
        seq.value += seq.increment;
        Ok(seq.value)
    }

    fn sequence_current_value(&self, name: &str) -> StorageResult<i64> {
        self.sequences
            .lock()
            .get(name)
            .map(|s| s.value)
            .ok_or_else(|| StorageError::SequenceNotFound(name.to_string()))
    }
}

/// Group cursor over a snapshot of one group
struct MemoryGroupCursor {
    groups: Arc<RwLock<Groups>>,
    group: String,
    target: Option<(HKey, bool)>,
    pending: VecDeque<Row>,
}

impl RowCursor for MemoryGroupCursor {
    fn open(&mut self) -> StorageResult<()> {
        let groups = self.groups.read();
        self.pending.clear();
        let data = match groups.get(&self.group) {
            Some(data) => data,
            None => return Ok(()),
        };
        match &self.target {
            None => self.pending.extend(data.values().cloned()),
            Some((hkey, deep)) => {
                let subtree = data
                    .range(hkey.clone()..)
                    .take_while(|(k, _)| hkey.is_prefix_of(k))
                    .map(|(_, row)| row.clone());
                if *deep {
                    self.pending.extend(subtree);
                } else {
                    self.pending.extend(subtree.take(1));
                }
            }
        }
        Ok(())
    }

    fn next(&mut self) -> StorageResult<Option<Row>> {
        Ok(self.pending.pop_front())
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

impl GroupCursor for MemoryGroupCursor {
    fn rebind(&mut self, hkey: HKey, deep: bool) {
        self.target = Some((hkey, deep));
    }
}

/// Index cursor; index rows are built from table rows at open
struct MemoryIndexCursor {
    groups: Arc<RwLock<Groups>>,
    index_type: Arc<RowType>,
    ordering: IndexOrdering,
    range: KeyRange,
    rows: Vec<Row>,
    position: usize,
}

impl MemoryIndexCursor {
    fn key_order(&self, a: &[Datum], b: &[Datum]) -> Ordering {
        match self.ordering {
            IndexOrdering::Ascending => a.cmp(b),
            IndexOrdering::Descending => b.cmp(a),
        }
    }
}

impl RowCursor for MemoryIndexCursor {
    fn open(&mut self) -> StorageResult<()> {
        let index = match self.index_type.kind() {
            RowTypeKind::Index(index) => index.clone(),
            _ => return Err(StorageError::Unsupported("index cursor over non-index row type")),
        };
        let table = index.table();
        let groups = self.groups.read();
        let mut rows = Vec::new();
        if let Some(data) = groups.get(table.group()) {
            for row in data.values() {
                let is_indexed = row.row_type().table().is_some_and(|t| t.id() == table.id());
                if !is_indexed {
                    continue;
                }
                let key = index
                    .columns()
                    .iter()
                    .map(|&c| row.get_opt(c).cloned().unwrap_or(Datum::Null))
                    .collect::<Vec<_>>();
                if !self.range.contains(&key) {
                    continue;
                }
                let hkey = row.hkey().cloned().unwrap_or_default();
                rows.push(Row::with_hkey(self.index_type.clone(), key, hkey));
            }
        }
        rows.sort_by(|a, b| {
            self.key_order(a.values(), b.values())
                .then_with(|| a.hkey().cmp(&b.hkey()))
        });
        self.rows = rows;
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> StorageResult<Option<Row>> {
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    fn jump(&mut self, row: &Row, selector: ColumnSelector) -> StorageResult<()> {
        let width = selector.width(row.len());
        let target = &row.values()[..width];
        self.position = self
            .rows
            .iter()
            .position(|r| {
                let n = width.min(r.len());
                self.key_order(&r.values()[..n], target) != Ordering::Less
            })
            .unwrap_or(self.rows.len());
        Ok(())
    }

    fn close(&mut self) {
        self.rows.clear();
        self.position = 0;
    }
}

impl IndexCursor for MemoryIndexCursor {
    fn rebind(&mut self, range: KeyRange) {
        self.range = range;
    }
}

struct SortEntry {
    keys: Vec<Datum>,
    seq: u64,
    row: Row,
}

/// Run-based sorter: rows are sorted in runs of `run_rows`, then merged
struct MemorySorter {
    run_rows: usize,
    ascending: Vec<bool>,
    option: SortOption,
    runs: Vec<VecDeque<SortEntry>>,
    current: Vec<SortEntry>,
    seq: u64,
}

impl MemorySorter {
    fn order(&self, a: &SortEntry, b: &SortEntry) -> Ordering {
        compare_keys(&a.keys, &b.keys, &self.ascending).then(a.seq.cmp(&b.seq))
    }

    fn flush_run(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let mut run = std::mem::take(&mut self.current);
        run.sort_by(|a, b| self.order(a, b));
        self.runs.push(run.into());
    }
}

impl Sorter for MemorySorter {
    fn insert(&mut self, keys: Vec<Datum>, row: Row) -> StorageResult<()> {
        self.current.push(SortEntry {
            keys,
            seq: self.seq,
            row,
        });
        self.seq += 1;
        if self.current.len() >= self.run_rows {
            self.flush_run();
        }
        Ok(())
    }

    fn sort(mut self: Box<Self>) -> StorageResult<Box<dyn RowCursor>> {
        self.flush_run();
        let mut runs = std::mem::take(&mut self.runs);
        let mut output: VecDeque<Row> = VecDeque::new();
        let mut last: Option<SortEntry> = None;
        loop {
            let mut best: Option<usize> = None;
            for (i, run) in runs.iter().enumerate() {
                let Some(head) = run.front() else { continue };
                best = match best {
                    Some(b) if runs[b]
                        .front()
                        .is_some_and(|cur| self.order(cur, head) != Ordering::Greater) =>
                    {
                        Some(b)
                    }
                    _ => Some(i),
                };
            }
            let Some(b) = best else { break };
            let Some(entry) = runs[b].pop_front() else { break };
            if self.option == SortOption::SuppressDuplicates {
                if let Some(prev) = &last {
                    if prev.keys == entry.keys && prev.row.values() == entry.row.values() {
                        continue;
                    }
                }
            }
            output.push_back(entry.row.clone());
            last = Some(entry);
        }
        Ok(Box::new(VecRowCursor::new(output)))
    }
}

/// Cursor over rows already materialized in memory
pub struct VecRowCursor {
    rows: VecDeque<Row>,
}

impl VecRowCursor {
    pub fn new(rows: impl Into<VecDeque<Row>>) -> Self {
        Self { rows: rows.into() }
    }
}

impl RowCursor for VecRowCursor {
    fn open(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn next(&mut self) -> StorageResult<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        self.rows.clear();
    }
}
