//! Shared test fixtures: a scripted mock connection and a sample domain
//! (customers, orders, items sold through a pivot table).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::connection::{Connection, Row, WriteOutcome};
use crate::error::OrmResult;
use crate::events::HandlerRegistry;
use crate::orm::Orm;
use crate::schema::{EntitySchema, RelationDef, SchemaRegistry};

/// Connection double: records every statement and serves canned results in
/// FIFO order. An empty queue answers with no rows / one affected row.
#[derive(Default)]
pub struct MockConnection {
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    results: Mutex<VecDeque<Vec<Row>>>,
    write_results: Mutex<VecDeque<WriteOutcome>>,
    tx_log: Mutex<Vec<&'static str>>,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_rows(&self, rows: Vec<Row>) {
        self.results.lock().unwrap().push_back(rows);
    }

    pub fn queue_write(&self, outcome: WriteOutcome) {
        self.write_results.lock().unwrap().push_back(outcome);
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.lock().unwrap().clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.statements
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.lock().unwrap().len()
    }

    pub fn tx_log(&self) -> Vec<&'static str> {
        self.tx_log.lock().unwrap().clone()
    }
}

impl Connection for MockConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn execute_write(&self, sql: &str, params: &[Value]) -> OrmResult<WriteOutcome> {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self
            .write_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(WriteOutcome {
                rows_affected: 1,
                inserted_id: None,
            }))
    }

    fn begin(&self) -> OrmResult<()> {
        self.tx_log.lock().unwrap().push("begin");
        Ok(())
    }

    fn commit(&self) -> OrmResult<()> {
        self.tx_log.lock().unwrap().push("commit");
        Ok(())
    }

    fn rollback(&self) -> OrmResult<()> {
        self.tx_log.lock().unwrap().push("rollback");
        Ok(())
    }

    fn driver_name(&self) -> &str {
        "mock"
    }
}

/// Sample domain used across the suites.
pub fn sample_registry() -> SchemaRegistry {
    SchemaRegistry::builder()
        .entity(
            EntitySchema::builder("customer", "customers")
                .columns(&["id", "name"])
                .relation(
                    "orders",
                    RelationDef::has_many("order", &[("customer_id", "id")]).inverse_of("customer"),
                )
                .build(),
        )
        .entity(
            EntitySchema::builder("order", "orders")
                .columns(&["id", "customer_id", "total", "status"])
                .relation("customer", RelationDef::has_one("customer", &[("id", "customer_id")]))
                .relation("orderItems", RelationDef::has_many("orderItem", &[("order_id", "id")]))
                .relation(
                    "items",
                    RelationDef::has_many("item", &[("id", "item_id")]).via("orderItems"),
                )
                .relation(
                    "itemsByName",
                    RelationDef::has_many("item", &[("id", "item_id")])
                        .via_table("order_items", &[("order_id", "id")])
                        .index_by("name"),
                )
                .build(),
        )
        .entity(
            EntitySchema::builder("orderItem", "order_items")
                .primary_key(&["order_id", "item_id"])
                .columns(&["order_id", "item_id", "quantity"])
                .build(),
        )
        .entity(
            EntitySchema::builder("item", "items")
                .columns(&["id", "name", "category"])
                .build(),
        )
        .entity(
            EntitySchema::builder("employee", "employees")
                .primary_key(&["dept", "emp"])
                .columns(&["dept", "emp", "name"])
                .relation(
                    "assignments",
                    RelationDef::has_many(
                        "assignment",
                        &[("department_id", "dept"), ("employee_id", "emp")],
                    ),
                )
                .build(),
        )
        .entity(
            EntitySchema::builder("assignment", "assignments")
                .primary_key(&["department_id", "employee_id", "role"])
                .columns(&["department_id", "employee_id", "role"])
                .build(),
        )
        .entity(
            EntitySchema::builder("document", "documents")
                .columns(&["id", "body", "version"])
                .version_column("version")
                .build(),
        )
        .entity(
            EntitySchema::builder("note", "notes")
                .columns(&["id", "text", "deleted_at"])
                .build(),
        )
        .build()
        .expect("sample registry is valid")
}

pub fn orm_with(handlers: HandlerRegistry) -> (Orm, Arc<MockConnection>) {
    let conn = MockConnection::new();
    let orm = Orm::new(
        Arc::new(sample_registry()),
        Arc::new(handlers),
        conn.clone(),
    );
    (orm, conn)
}

pub fn orm() -> (Orm, Arc<MockConnection>) {
    orm_with(HandlerRegistry::builder().build())
}

/// Shorthand row construction from (column, value) pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
}
