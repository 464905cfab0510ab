//! Catalog - Group, table and index metadata
//!
//! Tables are clustered into groups: every table except the group root has
//! exactly one parent, and rows of a group are stored interleaved in
//! hierarchical-key order. The catalog records the shape of that hierarchy
//! (parent, depth, ordinal) so lookups can compute ancestor and branch keys.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

/// Column and field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Int,
    BigInt,
    Double,
    Text,
    /// Not known until a value is seen, e.g. a null literal
    Unknown,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || *self == DataType::Double
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int | DataType::BigInt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Stable identifier of a table within a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

/// A table placed in a group hierarchy
#[derive(Debug)]
pub struct Table {
    id: TableId,
    name: String,
    group: String,
    columns: Vec<ColumnDef>,
    parent: Option<TableId>,
    depth: usize,
    ordinal: u32,
}

impl Table {
    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the group this table is clustered in
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Get column index by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn parent(&self) -> Option<TableId> {
        self.parent
    }

    /// Distance from the group root (root has depth 0)
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Ordinal identifying this table's segments in hierarchical keys
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Number of hkey segments a row of this table carries
    pub fn hkey_segments(&self) -> usize {
        self.depth + 1
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Table {}

/// Table definition used to build a group
#[derive(Debug, Clone)]
pub struct TableDef {
    /// Table name
    pub name: String,
    /// Parent table name (None for the group root)
    pub parent: Option<String>,
    /// Column definitions
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Create a new table definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            columns: Vec::new(),
        }
    }

    /// Set the parent table
    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add a column
    #[must_use]
    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }
}

/// A clustered group of tables
#[derive(Debug)]
pub struct Group {
    name: String,
    tables: Vec<Arc<Table>>,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All tables, parents before children
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn root(&self) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.parent.is_none())
    }

    pub fn table(&self, id: TableId) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn table_by_name(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn parent_of(&self, table: &Table) -> Option<&Arc<Table>> {
        table.parent.and_then(|id| self.table(id))
    }

    pub fn contains(&self, table: &Table) -> bool {
        self.tables.iter().any(|t| t.id == table.id)
    }

    /// Ancestors of `table`, root first, excluding `table` itself
    pub fn ancestors_of(&self, table: &Table) -> Vec<Arc<Table>> {
        let mut ancestors = Vec::new();
        let mut current = self.parent_of(table);
        while let Some(t) = current {
            ancestors.push(t.clone());
            current = self.parent_of(t);
        }
        ancestors.reverse();
        ancestors
    }

    /// True if `ancestor` is a strict ancestor of `descendant`
    pub fn is_ancestor(&self, ancestor: &Table, descendant: &Table) -> bool {
        let mut current = self.parent_of(descendant);
        while let Some(t) = current {
            if t.id == ancestor.id {
                return true;
            }
            current = self.parent_of(t);
        }
        false
    }

    /// Immediate child of `ancestor` on the path down to `descendant`
    pub fn child_toward(&self, ancestor: &Table, descendant: &Table) -> Option<Arc<Table>> {
        let mut current = self.table(descendant.id)?.clone();
        loop {
            let parent = self.parent_of(&current)?.clone();
            if parent.id == ancestor.id {
                return Some(current);
            }
            current = parent;
        }
    }
}

/// Index definition
#[derive(Debug)]
pub struct Index {
    name: String,
    table: Arc<Table>,
    columns: Vec<usize>,
}

impl Index {
    /// Create an index over `columns` (by name) of `table`
    pub fn new(
        name: impl Into<String>,
        table: &Arc<Table>,
        columns: &[&str],
    ) -> CatalogResult<Self> {
        let mut positions = Vec::with_capacity(columns.len());
        for column in columns {
            let pos = table.column_index(column).ok_or_else(|| {
                CatalogError::ColumnNotFound(table.name.clone(), column.to_string())
            })?;
            positions.push(pos);
        }
        Ok(Self {
            name: name.into(),
            table: table.clone(),
            columns: positions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Table column positions making up the index key
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("table {0} already exists")]
    TableExists(String),

    #[error("table {0} not found")]
    TableNotFound(String),

    #[error("invalid group: {0}")]
    InvalidGroup(String),

    #[error("column {1} not found in table {0}")]
    ColumnNotFound(String, String),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Builds a [`Group`] from table definitions
///
/// Tables must be added parent first. Ordinals are assigned in insertion
/// order starting at 1; table ids continue from `first_table_id`.
#[derive(Debug)]
pub struct GroupBuilder {
    name: String,
    next_id: u32,
    tables: Vec<Arc<Table>>,
    by_name: HashMap<String, usize>,
}

impl GroupBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_first_table_id(name, 1)
    }

    pub fn with_first_table_id(name: impl Into<String>, first_table_id: u32) -> Self {
        Self {
            name: name.into(),
            next_id: first_table_id,
            tables: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Add a table
    pub fn table(mut self, def: TableDef) -> CatalogResult<Self> {
        if self.by_name.contains_key(&def.name) {
            return Err(CatalogError::TableExists(def.name));
        }
        let (parent, depth) = match &def.parent {
            None => {
                if !self.tables.is_empty() {
                    return Err(CatalogError::InvalidGroup(format!(
                        "{} would be a second root of group {}",
                        def.name, self.name
                    )));
                }
                (None, 0)
            }
            Some(parent_name) => {
                let idx = *self
                    .by_name
                    .get(parent_name)
                    .ok_or_else(|| CatalogError::TableNotFound(parent_name.clone()))?;
                let parent = &self.tables[idx];
                (Some(parent.id), parent.depth + 1)
            }
        };
        let table = Table {
            id: TableId(self.next_id),
            name: def.name.clone(),
            group: self.name.clone(),
            columns: def.columns,
            parent,
            depth,
            ordinal: self.tables.len() as u32 + 1,
        };
        self.next_id += 1;
        self.by_name.insert(def.name, self.tables.len());
        self.tables.push(Arc::new(table));
        Ok(self)
    }

    pub fn build(self) -> CatalogResult<Arc<Group>> {
        if self.tables.is_empty() {
            return Err(CatalogError::InvalidGroup(format!(
                "group {} has no tables",
                self.name
            )));
        }
        Ok(Arc::new(Group {
            name: self.name,
            tables: self.tables,
        }))
    }
}
