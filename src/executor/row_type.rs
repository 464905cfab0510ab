//! Row types and the per-query schema that owns them
//!
//! A `RowType` describes the shape of rows flowing between cursors. Table,
//! index and hkey types are cached per catalog object; derived types
//! (values, projections, aggregates, products, flattens, buffers, counts) are minted
//! by operators at construction time. Identity is by reference: two row
//! types are the same type only if they are the same `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::{DataType, Group, Index, Table, TableId};

/// What a row type describes
#[derive(Debug)]
pub enum RowTypeKind {
    /// Rows stored in a group table
    Table(Arc<Table>),
    /// Rows produced by an index scan; carry the indexed row's hkey
    Index(Arc<Index>),
    /// Rows carrying only an hkey of a table
    HKey(Arc<Table>),
    /// Literal rows (values scans, if-empty substitutes)
    Values,
    /// Result of a projection
    Project,
    /// Grouping fields followed by one field per aggregator
    Aggregate { grouping_fields: usize },
    /// Concatenation of an outer row and an inner row
    Product {
        left: Arc<RowType>,
        right: Arc<RowType>,
    },
    /// A parent row joined with one of its children; either side may be
    /// all nulls in an outer join
    Flattened {
        parent: Arc<RowType>,
        child: Arc<RowType>,
    },
    /// Input row plus a trailing sequence number
    Buffer { input: Arc<RowType> },
    /// Single row count
    Count,
}

/// Schema descriptor of a row
#[derive(Debug)]
pub struct RowType {
    id: u32,
    kind: RowTypeKind,
    fields: Vec<DataType>,
}

impl RowType {
    /// Schema-unique id
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> &RowTypeKind {
        &self.kind
    }

    pub fn nfields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[DataType] {
        &self.fields
    }

    pub fn field_type(&self, index: usize) -> Option<DataType> {
        self.fields.get(index).copied()
    }

    /// The table, if this is a table row type
    pub fn table(&self) -> Option<&Arc<Table>> {
        match &self.kind {
            RowTypeKind::Table(t) => Some(t),
            _ => None,
        }
    }

    /// The table whose hkeys rows of this type carry
    pub fn hkey_table(&self) -> Option<&Arc<Table>> {
        match &self.kind {
            RowTypeKind::Table(t) | RowTypeKind::HKey(t) => Some(t),
            RowTypeKind::Index(index) => Some(index.table()),
            RowTypeKind::Product { right, .. } => right.hkey_table(),
            RowTypeKind::Flattened { child, .. } => child.hkey_table(),
            RowTypeKind::Buffer { input } => input.hkey_table(),
            _ => None,
        }
    }

    pub fn is_table_type(&self) -> bool {
        matches!(self.kind, RowTypeKind::Table(_))
    }

    fn label(&self) -> String {
        match &self.kind {
            RowTypeKind::Table(t) => t.name().to_string(),
            RowTypeKind::Index(i) => format!("index {}", i.name()),
            RowTypeKind::HKey(t) => format!("hkey {}", t.name()),
            RowTypeKind::Values => "values".to_string(),
            RowTypeKind::Project => "project".to_string(),
            RowTypeKind::Aggregate { .. } => "aggregate".to_string(),
            RowTypeKind::Product { left, right } => {
                format!("product({} x {})", left.label(), right.label())
            }
            RowTypeKind::Flattened { parent, child } => {
                format!("flatten({}, {})", parent.label(), child.label())
            }
            RowTypeKind::Buffer { input } => format!("buffer({})", input.label()),
            RowTypeKind::Count => "count".to_string(),
        }
    }
}

impl PartialEq for RowType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for RowType {}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label(), self.id)
    }
}

#[derive(Debug, Default)]
struct SchemaInner {
    next_id: u32,
    types: Vec<Arc<RowType>>,
    table_types: HashMap<TableId, Arc<RowType>>,
    hkey_types: HashMap<TableId, Arc<RowType>>,
    index_types: HashMap<(TableId, String), Arc<RowType>>,
}

impl SchemaInner {
    fn register(&mut self, kind: RowTypeKind, fields: Vec<DataType>) -> Arc<RowType> {
        self.next_id += 1;
        let row_type = Arc::new(RowType {
            id: self.next_id,
            kind,
            fields,
        });
        self.types.push(row_type.clone());
        row_type
    }
}

/// Registry of row types shared by every operator of a query
#[derive(Debug, Default)]
pub struct Schema {
    inner: RwLock<SchemaInner>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register table row types for every table of `group`
    pub fn add_group(&self, group: &Group) {
        for table in group.tables() {
            self.table_row_type(table);
        }
    }

    /// Row type of `table`, created on first use
    pub fn table_row_type(&self, table: &Arc<Table>) -> Arc<RowType> {
        if let Some(t) = self.inner.read().table_types.get(&table.id()) {
            return t.clone();
        }
        let mut inner = self.inner.write();
        if let Some(t) = inner.table_types.get(&table.id()) {
            return t.clone();
        }
        let fields = table.columns().iter().map(|c| c.data_type).collect();
        let row_type = inner.register(RowTypeKind::Table(table.clone()), fields);
        inner.table_types.insert(table.id(), row_type.clone());
        row_type
    }

    /// Row type of rows produced by scanning `index`
    pub fn index_row_type(&self, index: &Arc<Index>) -> Arc<RowType> {
        let key = (index.table().id(), index.name().to_string());
        if let Some(t) = self.inner.read().index_types.get(&key) {
            return t.clone();
        }
        let mut inner = self.inner.write();
        if let Some(t) = inner.index_types.get(&key) {
            return t.clone();
        }
        let columns = index.table().columns();
        let fields = index
            .columns()
            .iter()
            .map(|&c| columns.get(c).map_or(DataType::Unknown, |col| col.data_type))
            .collect();
        let row_type = inner.register(RowTypeKind::Index(index.clone()), fields);
        inner.index_types.insert(key, row_type.clone());
        row_type
    }

    /// Row type carrying only the hkey of `table`
    pub fn hkey_row_type(&self, table: &Arc<Table>) -> Arc<RowType> {
        if let Some(t) = self.inner.read().hkey_types.get(&table.id()) {
            return t.clone();
        }
        let mut inner = self.inner.write();
        if let Some(t) = inner.hkey_types.get(&table.id()) {
            return t.clone();
        }
        let row_type = inner.register(RowTypeKind::HKey(table.clone()), Vec::new());
        inner.hkey_types.insert(table.id(), row_type.clone());
        row_type
    }

    pub fn new_values_type(&self, fields: Vec<DataType>) -> Arc<RowType> {
        self.inner.write().register(RowTypeKind::Values, fields)
    }

    pub fn new_project_type(&self, fields: Vec<DataType>) -> Arc<RowType> {
        self.inner.write().register(RowTypeKind::Project, fields)
    }

    /// Aggregate output: the input's first `grouping_fields` field types,
    /// then the aggregate result types
    pub fn new_aggregate_type(
        &self,
        input: &RowType,
        grouping_fields: usize,
        aggregate_types: Vec<DataType>,
    ) -> Arc<RowType> {
        let mut fields: Vec<DataType> = input.fields().iter().take(grouping_fields).copied().collect();
        fields.extend(aggregate_types);
        self.inner
            .write()
            .register(RowTypeKind::Aggregate { grouping_fields }, fields)
    }

    pub fn new_product_type(&self, left: &Arc<RowType>, right: &Arc<RowType>) -> Arc<RowType> {
        let mut fields = left.fields().to_vec();
        fields.extend_from_slice(right.fields());
        self.inner.write().register(
            RowTypeKind::Product {
                left: left.clone(),
                right: right.clone(),
            },
            fields,
        )
    }

    /// Parent fields followed by child fields; rows carry the child's hkey
    pub fn new_flatten_type(&self, parent: &Arc<RowType>, child: &Arc<RowType>) -> Arc<RowType> {
        let mut fields = parent.fields().to_vec();
        fields.extend_from_slice(child.fields());
        self.inner.write().register(
            RowTypeKind::Flattened {
                parent: parent.clone(),
                child: child.clone(),
            },
            fields,
        )
    }

    pub fn new_buffer_type(&self, input: &Arc<RowType>) -> Arc<RowType> {
        let mut fields = input.fields().to_vec();
        fields.push(DataType::BigInt);
        self.inner
            .write()
            .register(RowTypeKind::Buffer { input: input.clone() }, fields)
    }

    pub fn new_count_type(&self) -> Arc<RowType> {
        self.inner
            .write()
            .register(RowTypeKind::Count, vec![DataType::BigInt])
    }

    /// Look up a registered type by id
    pub fn row_type(&self, id: u32) -> Option<Arc<RowType>> {
        self.inner.read().types.iter().find(|t| t.id == id).cloned()
    }

    /// Every registered type, in registration order
    pub fn row_types(&self) -> Vec<Arc<RowType>> {
        self.inner.read().types.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, GroupBuilder, TableDef};

    fn group() -> Arc<Group> {
        GroupBuilder::new("g")
            .table(
                TableDef::new("parent")
                    .column(ColumnDef::new("id", DataType::BigInt))
                    .column(ColumnDef::new("name", DataType::Text)),
            )
            .unwrap()
            .table(
                TableDef::new("child")
                    .parent("parent")
                    .column(ColumnDef::new("id", DataType::BigInt)),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_row_type_is_cached() {
        let schema = Schema::new();
        let group = group();
        let parent = group.table_by_name("parent").unwrap();
        let a = schema.table_row_type(parent);
        let b = schema.table_row_type(parent);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.nfields(), 2);
        assert_eq!(a.field_type(1), Some(DataType::Text));
        assert!(a.is_table_type());
    }

    #[test]
    fn test_derived_types_have_reference_identity() {
        let schema = Schema::new();
        let a = schema.new_values_type(vec![DataType::BigInt]);
        let b = schema.new_values_type(vec![DataType::BigInt]);
        assert_eq!(*a, *a);
        assert_ne!(*a, *b);
        assert_ne!(a.id(), b.id());
        assert!(Arc::ptr_eq(&schema.row_type(a.id()).unwrap(), &a));
    }

    #[test]
    fn test_aggregate_and_product_fields() {
        let schema = Schema::new();
        let group = group();
        schema.add_group(&group);
        let parent = schema.table_row_type(group.table_by_name("parent").unwrap());
        let child = schema.table_row_type(group.table_by_name("child").unwrap());

        let agg = schema.new_aggregate_type(&parent, 1, vec![DataType::BigInt]);
        assert_eq!(agg.fields(), &[DataType::BigInt, DataType::BigInt]);

        let product = schema.new_product_type(&parent, &child);
        assert_eq!(product.nfields(), 3);
        assert_eq!(product.hkey_table().unwrap().name(), "child");

        let buffer = schema.new_buffer_type(&child);
        assert_eq!(buffer.nfields(), 2);

        let flatten = schema.new_flatten_type(&parent, &child);
        assert_eq!(flatten.fields(), &[DataType::BigInt, DataType::Text, DataType::BigInt]);
        assert_eq!(flatten.hkey_table().unwrap().name(), "child");
        assert!(flatten.to_string().starts_with("flatten(parent, child)#"));
        assert_eq!(schema.row_types().len(), 6);
    }
}
