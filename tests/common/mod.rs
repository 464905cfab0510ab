//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Once};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use roodb_qp::catalog::{ColumnDef, DataType, Group, GroupBuilder, Index, Table, TableDef};
use roodb_qp::executor::{
    Datum, ExecutionConfig, HKey, Operator, QueryContext, Row, RowType, Schema,
};
use roodb_qp::executor::{ExecutorEngine, ExecutorResult};
use roodb_qp::storage::{MemoryStore, StoreAdapter};

static TRACING: Once = Once::new();

/// Route executor logs to the test harness; filter with RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A customer -> order -> item group loaded into a memory store
pub struct Shop {
    pub group: Arc<Group>,
    pub customer: Arc<Table>,
    pub order: Arc<Table>,
    pub item: Arc<Table>,
    pub order_cid: Arc<Index>,
    pub schema: Arc<Schema>,
    pub store: Arc<MemoryStore>,
}

impl Shop {
    pub fn empty() -> Self {
        let group = GroupBuilder::new("shop")
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
            .expect("shop group");
        let customer = group.table_by_name("customer").expect("customer").clone();
        let order = group.table_by_name("order").expect("order").clone();
        let item = group.table_by_name("item").expect("item").clone();
        let order_cid = Arc::new(Index::new("order_cid", &order, &["cid"]).expect("index"));
        let schema = Arc::new(Schema::new());
        schema.add_group(&group);
        Shop {
            group,
            customer,
            order,
            item,
            order_cid,
            schema,
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Random shop: every customer has up to three orders, every order up
    /// to three items. Some orders belong to customers that were never
    /// written.
    pub fn random(seed: u64, customers: i64) -> Self {
        let shop = Shop::empty();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        for cid in 1..=customers {
            let orphan = rng.gen_ratio(1, 6);
            if !orphan {
                rows.push(shop.customer_row(cid, &format!("c{}", cid)));
            }
            for o in 0..rng.gen_range(0..=3) {
                let oid = cid * 10 + o;
                rows.push(shop.order_row(cid, oid, rng.gen_range(1..=500)));
                for i in 0..rng.gen_range(0..=3) {
                    rows.push(shop.item_row(cid, oid, oid * 10 + i));
                }
            }
        }
        shop.store.load(rows).expect("load");
        shop
    }

    pub fn context(&self, config: ExecutionConfig) -> Arc<QueryContext> {
        let adapter: Arc<dyn StoreAdapter> = self.store.clone();
        Arc::new(QueryContext::new(adapter, self.schema.clone(), config))
    }

    pub fn customer_type(&self) -> Arc<RowType> {
        self.schema.table_row_type(&self.customer)
    }

    pub fn order_type(&self) -> Arc<RowType> {
        self.schema.table_row_type(&self.order)
    }

    pub fn item_type(&self) -> Arc<RowType> {
        self.schema.table_row_type(&self.item)
    }

    /// Every stored row, in hkey order
    pub fn rows(&self) -> Vec<Row> {
        self.store.rows(self.group.name())
    }

    pub fn rows_of(&self, row_type: &RowType) -> Vec<Row> {
        self.rows().into_iter().filter(|r| r.is_type(row_type)).collect()
    }

    fn hkey(&self, parts: &[(&Arc<Table>, i64)]) -> HKey {
        HKey::from_segments(
            parts
                .iter()
                .map(|(table, v)| (table.ordinal(), vec![Datum::Int(*v)])),
        )
    }

    pub fn customer_row(&self, cid: i64, name: &str) -> Row {
        Row::with_hkey(
            self.customer_type(),
            vec![Datum::Int(cid), Datum::from(name)],
            self.hkey(&[(&self.customer, cid)]),
        )
    }

    pub fn order_row(&self, cid: i64, oid: i64, amount: i64) -> Row {
        Row::with_hkey(
            self.order_type(),
            vec![Datum::Int(oid), Datum::Int(cid), Datum::Int(amount)],
            self.hkey(&[(&self.customer, cid), (&self.order, oid)]),
        )
    }

    pub fn item_row(&self, cid: i64, oid: i64, iid: i64) -> Row {
        Row::with_hkey(
            self.item_type(),
            vec![Datum::Int(iid), Datum::Int(oid)],
            self.hkey(&[(&self.customer, cid), (&self.order, oid), (&self.item, iid)]),
        )
    }
}

pub fn run(ctx: &Arc<QueryContext>, op: &dyn Operator) -> ExecutorResult<Vec<Row>> {
    ExecutorEngine::new(ctx.clone()).execute(op)
}

/// Field `i` of every row as an integer
pub fn column(rows: &[Row], i: usize) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get_opt(i).and_then(Datum::as_int).unwrap_or(i64::MIN))
        .collect()
}

pub fn int_rows(row_type: &Arc<RowType>, rows: &[Vec<i64>]) -> Vec<Row> {
    rows.iter()
        .map(|r| Row::new(row_type.clone(), r.iter().map(|&v| Datum::Int(v)).collect()))
        .collect()
}
