//! Shared fixtures for executor unit tests

use std::sync::Arc;

use crate::catalog::{ColumnDef, DataType, Group, GroupBuilder, Index, Table, TableDef};
use crate::storage::{MemoryStore, StoreAdapter};

use super::bindings::QueryBindings;
use super::config::ExecutionConfig;
use super::context::QueryContext;
use super::datum::Datum;
use super::engine::ExecutorEngine;
use super::error::ExecutorResult;
use super::hkey::HKey;
use super::operator::Operator;
use super::row::Row;
use super::row_type::{RowType, Schema};
use super::scan::ValuesScan;
use super::BindingsCursor;

pub(crate) fn test_context() -> Arc<QueryContext> {
    Arc::new(QueryContext::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Schema::new()),
        ExecutionConfig::default(),
    ))
}

/// Context over an existing schema and store
pub(crate) fn context_with(
    schema: &Arc<Schema>,
    store: &Arc<MemoryStore>,
    config: ExecutionConfig,
) -> Arc<QueryContext> {
    let adapter: Arc<dyn StoreAdapter> = store.clone();
    Arc::new(QueryContext::new(adapter, schema.clone(), config))
}

/// Bindings stream over a fixed list of scopes
pub(crate) struct ScopeList {
    scopes: Vec<QueryBindings>,
    next: usize,
}

impl ScopeList {
    pub(crate) fn new(scopes: Vec<QueryBindings>) -> Self {
        Self { scopes, next: 0 }
    }
}

impl BindingsCursor for ScopeList {
    fn open_bindings(&mut self) -> ExecutorResult<()> {
        self.next = 0;
        Ok(())
    }

    fn next_bindings(&mut self) -> ExecutorResult<Option<QueryBindings>> {
        let scope = self.scopes.get(self.next).cloned();
        self.next += 1;
        Ok(scope)
    }

    fn close_bindings(&mut self) -> ExecutorResult<()> {
        Ok(())
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecutorResult<()> {
        while self
            .scopes
            .get(self.next)
            .is_some_and(|b| b.is_descendant_of(bindings))
        {
            self.next += 1;
        }
        Ok(())
    }
}

pub(crate) fn int_type(schema: &Schema, nfields: usize) -> Arc<RowType> {
    schema.new_values_type(vec![DataType::BigInt; nfields])
}

pub(crate) fn int_rows(row_type: &Arc<RowType>, rows: &[&[i64]]) -> Vec<Row> {
    rows.iter()
        .map(|r| Row::new(row_type.clone(), r.iter().map(|&v| Datum::Int(v)).collect()))
        .collect()
}

pub(crate) fn values(row_type: &Arc<RowType>, rows: &[&[i64]]) -> Box<dyn Operator> {
    Box::new(ValuesScan::new(row_type.clone(), int_rows(row_type, rows)))
}

/// Values of every row, as integers
pub(crate) fn ints(rows: &[Row]) -> Vec<Vec<i64>> {
    rows.iter()
        .map(|r| r.iter().map(|d| d.as_int().unwrap_or(i64::MIN)).collect())
        .collect()
}

pub(crate) fn run(ctx: &Arc<QueryContext>, op: &dyn Operator) -> ExecutorResult<Vec<Row>> {
    ExecutorEngine::new(ctx.clone()).execute(op)
}

pub(crate) fn hkey(parts: &[(u32, i64)]) -> HKey {
    HKey::from_segments(parts.iter().map(|(o, v)| (*o, vec![Datum::Int(*v)])))
}

/// customer -> order -> item group
///
/// - customer 1: orders 10 (items 100, 101) and 11 (item 110)
/// - customer 2: order 20, no items
/// - order 30 under missing customer 3, with item 300
/// - customer 4: no orders
pub(crate) struct Coi {
    pub group: Arc<Group>,
    pub customer: Arc<Table>,
    pub order: Arc<Table>,
    pub item: Arc<Table>,
    pub order_amount: Arc<Index>,
    pub schema: Arc<Schema>,
    pub store: Arc<MemoryStore>,
}

impl Coi {
    pub(crate) fn new() -> Self {
        let group = GroupBuilder::new("coi")
            .table(
                TableDef::new("customer")
                    .column(ColumnDef::new("cid", DataType::BigInt))
                    .column(ColumnDef::new("name", DataType::Text)),
            )
            .and_then(|b| {
                b.table(
                    TableDef::new("order")
                        .parent("customer")
                        .column(ColumnDef::new("oid", DataType::BigInt))
                        .column(ColumnDef::new("cid", DataType::BigInt))
                        .column(ColumnDef::new("amount", DataType::BigInt)),
                )
            })
            .and_then(|b| {
                b.table(
                    TableDef::new("item")
                        .parent("order")
                        .column(ColumnDef::new("iid", DataType::BigInt))
                        .column(ColumnDef::new("oid", DataType::BigInt)),
                )
            })
            .and_then(|b| b.build())
            .unwrap();
        let customer = group.table_by_name("customer").unwrap().clone();
        let order = group.table_by_name("order").unwrap().clone();
        let item = group.table_by_name("item").unwrap().clone();
        let order_amount = Arc::new(Index::new("order_amount", &order, &["amount"]).unwrap());
        let schema = Arc::new(Schema::new());
        schema.add_group(&group);
        let store = Arc::new(MemoryStore::new());
        let coi = Coi {
            group,
            customer,
            order,
            item,
            order_amount,
            schema,
            store,
        };
        coi.store
            .load(vec![
                coi.customer_row(1, "alice"),
                coi.order_row(1, 10, 300),
                coi.item_row(1, 10, 100),
                coi.item_row(1, 10, 101),
                coi.order_row(1, 11, 100),
                coi.item_row(1, 11, 110),
                coi.customer_row(2, "bob"),
                coi.order_row(2, 20, 200),
                coi.order_row(3, 30, 50),
                coi.item_row(3, 30, 300),
                coi.customer_row(4, "dave"),
            ])
            .unwrap();
        coi
    }

    pub(crate) fn context(&self, config: ExecutionConfig) -> Arc<QueryContext> {
        context_with(&self.schema, &self.store, config)
    }

    pub(crate) fn customer_type(&self) -> Arc<RowType> {
        self.schema.table_row_type(&self.customer)
    }

    pub(crate) fn order_type(&self) -> Arc<RowType> {
        self.schema.table_row_type(&self.order)
    }

    pub(crate) fn item_type(&self) -> Arc<RowType> {
        self.schema.table_row_type(&self.item)
    }

    pub(crate) fn customer_row(&self, cid: i64, name: &str) -> Row {
        Row::with_hkey(
            self.customer_type(),
            vec![Datum::Int(cid), Datum::from(name)],
            hkey(&[(1, cid)]),
        )
    }

    pub(crate) fn order_row(&self, cid: i64, oid: i64, amount: i64) -> Row {
        Row::with_hkey(
            self.order_type(),
            vec![Datum::Int(oid), Datum::Int(cid), Datum::Int(amount)],
            hkey(&[(1, cid), (2, oid)]),
        )
    }

    pub(crate) fn item_row(&self, cid: i64, oid: i64, iid: i64) -> Row {
        Row::with_hkey(
            self.item_type(),
            vec![Datum::Int(iid), Datum::Int(oid)],
            hkey(&[(1, cid), (2, oid), (3, iid)]),
        )
    }
}

/// First field of every row, as integers
pub(crate) fn keys(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get_opt(0).and_then(Datum::as_int).unwrap_or(i64::MIN))
        .collect()
}
