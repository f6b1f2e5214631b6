//! Persistence suites: insert/update/upsert/delete orchestration, dirty
//! tracking reconciliation, and optimistic locking.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::connection::WriteOutcome;
use crate::error::OrmError;
use crate::record::Record;
use crate::tests::support::{orm, row};

#[test]
fn insert_writes_declared_columns_in_order_and_backfills_the_key() {
    let (orm, conn) = orm();
    conn.queue_write(WriteOutcome {
        rows_affected: 1,
        inserted_id: Some(json!(77)),
    });

    let mut record = orm.new_record("order").unwrap();
    record.set("total", json!(30)).unwrap();
    record.set("customer_id", json!(4)).unwrap();
    assert!(orm.insert(&mut record).unwrap());

    let statements = conn.statements();
    let (sql, params) = &statements[0];
    assert_eq!(
        sql,
        "INSERT INTO \"orders\" (\"customer_id\", \"total\") VALUES ($1, $2)"
    );
    assert_eq!(params, &vec![json!(4), json!(30)]);

    assert_eq!(record.get("id").unwrap(), &json!(77));
    assert!(!record.is_new());
    assert!(!record.is_dirty());
}

#[test]
fn insert_rejects_a_record_that_already_has_a_row() {
    let (orm, _conn) = orm();
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", json!(1))]));
    assert!(matches!(
        orm.insert(&mut record),
        Err(OrmError::Configuration(_))
    ));
}

#[test]
fn update_writes_only_dirty_columns() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(
        schema,
        &row(&[("id", json!(1)), ("customer_id", json!(4)), ("total", json!(30))]),
    );
    record.set("total", json!(35)).unwrap();

    assert_eq!(orm.update(&mut record).unwrap(), json!(1));

    let statements = conn.statements();
    let (sql, params) = &statements[0];
    assert_eq!(sql, "UPDATE \"orders\" SET \"total\" = $1 WHERE \"id\" = $2");
    assert_eq!(params, &vec![json!(35), json!(1)]);
}

#[test]
fn update_with_no_changes_is_a_silent_no_op() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", json!(1)), ("total", json!(30))]));

    assert_eq!(orm.update(&mut record).unwrap(), Value::Bool(false));
    assert_eq!(conn.statement_count(), 0);
}

#[test]
fn update_is_idempotent_after_a_successful_write() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", json!(1)), ("total", json!(30))]));
    record.set("total", json!(35)).unwrap();

    assert_eq!(orm.update(&mut record).unwrap(), json!(1));
    // The first write folded the change into the clean snapshot.
    assert_eq!(orm.update(&mut record).unwrap(), Value::Bool(false));
    assert_eq!(conn.statement_count(), 1);
}

#[test]
fn setting_an_attribute_back_to_its_old_value_clears_the_dirty_flag() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", json!(1)), ("total", json!(30))]));
    record.set("total", json!(35)).unwrap();
    record.set("total", json!(30)).unwrap();

    assert_eq!(orm.update(&mut record).unwrap(), Value::Bool(false));
    assert_eq!(conn.statement_count(), 0);
}

#[test]
fn update_with_explicit_properties_ignores_the_dirty_diff() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", json!(1)), ("status", json!("new"))]));

    let props = HashMap::from([("status".to_string(), json!("archived"))]);
    assert_eq!(orm.update_with(&mut record, Some(props)).unwrap(), json!(1));

    let statements = conn.statements();
    assert_eq!(
        statements[0].0,
        "UPDATE \"orders\" SET \"status\" = $1 WHERE \"id\" = $2"
    );
    assert_eq!(record.get("status").unwrap(), &json!("archived"));
}

#[test]
fn save_routes_new_records_to_insert_and_backed_records_to_update() {
    let (orm, conn) = orm();

    let mut fresh = orm.new_record("order").unwrap();
    fresh.set("total", json!(10)).unwrap();
    assert!(orm.save(&mut fresh).unwrap());

    let schema = orm.registry().get("order").unwrap();
    let mut backed = Record::populate(schema, &row(&[("id", json!(1)), ("total", json!(30))]));
    backed.set("total", json!(31)).unwrap();
    assert!(orm.save(&mut backed).unwrap());

    let mut clean = backed.clone();
    assert!(!orm.save(&mut clean).unwrap());

    let sql = conn.executed_sql();
    assert!(sql[0].starts_with("INSERT INTO"));
    assert!(sql[1].starts_with("UPDATE"));
    assert_eq!(sql.len(), 2);
}

#[test]
fn versioned_update_bumps_and_checks_the_version_column() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("document").unwrap();
    let mut record = Record::populate(
        schema,
        &row(&[("id", json!(1)), ("body", json!("v3 text")), ("version", json!(3))]),
    );
    record.set("body", json!("v4 text")).unwrap();

    assert_eq!(orm.update(&mut record).unwrap(), json!(1));

    let statements = conn.statements();
    let (sql, params) = &statements[0];
    assert_eq!(
        sql,
        "UPDATE \"documents\" SET \"body\" = $1, \"version\" = $2 \
         WHERE (\"id\" = $3 AND \"version\" = $4)"
    );
    assert_eq!(params, &vec![json!("v4 text"), json!(4), json!(1), json!(3)]);
    // The instance now carries the bumped version as its clean state.
    assert_eq!(record.get("version").unwrap(), &json!(4));
    assert!(!record.is_dirty());
}

#[test]
fn versioned_update_with_zero_affected_rows_is_stale() {
    let (orm, conn) = orm();
    conn.queue_write(WriteOutcome {
        rows_affected: 0,
        inserted_id: None,
    });
    let schema = orm.registry().get("document").unwrap();
    let mut record = Record::populate(
        schema,
        &row(&[("id", json!(1)), ("body", json!("old")), ("version", json!(3))]),
    );
    record.set("body", json!("new")).unwrap();

    let err = orm.update(&mut record).unwrap_err();
    assert!(matches!(err, OrmError::StaleData { ref entity } if entity == "document"));
    // The stale write must not be folded into the clean snapshot.
    assert!(record.is_dirty());
}

#[test]
fn versioned_delete_checks_the_version_column() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("document").unwrap();
    let mut record = Record::populate(
        schema,
        &row(&[("id", json!(1)), ("body", json!("x")), ("version", json!(3))]),
    );
    assert_eq!(orm.delete(&mut record).unwrap(), json!(1));
    let statements = conn.statements();
    assert_eq!(
        statements[0].0,
        "DELETE FROM \"documents\" WHERE (\"id\" = $1 AND \"version\" = $2)"
    );
    assert_eq!(statements[0].1, vec![json!(1), json!(3)]);
}

#[test]
fn versioned_delete_with_zero_affected_rows_is_stale() {
    let (orm, conn) = orm();
    conn.queue_write(WriteOutcome {
        rows_affected: 0,
        inserted_id: None,
    });
    let schema = orm.registry().get("document").unwrap();
    let mut record = Record::populate(
        schema,
        &row(&[("id", json!(1)), ("body", json!("x")), ("version", json!(3))]),
    );
    let err = orm.delete(&mut record).unwrap_err();
    assert!(matches!(err, OrmError::StaleData { .. }));
    assert_eq!(conn.statement_count(), 1);
    assert!(!record.is_deleted());
}

#[test]
fn deleted_instance_stays_readable_but_refuses_further_writes() {
    let (orm, _conn) = orm();
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", json!(1)), ("total", json!(30))]));

    assert_eq!(orm.delete(&mut record).unwrap(), json!(1));
    assert!(record.is_deleted());
    assert_eq!(record.get("total").unwrap(), &json!(30));

    record.set("total", json!(31)).unwrap();
    assert!(matches!(orm.update(&mut record), Err(OrmError::Configuration(_))));
    assert!(matches!(orm.delete(&mut record), Err(OrmError::Configuration(_))));
}

#[test]
fn delete_uses_all_primary_key_columns() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("orderItem").unwrap();
    let mut record = Record::populate(
        schema,
        &row(&[("order_id", json!(10)), ("item_id", json!(5)), ("quantity", json!(2))]),
    );
    orm.delete(&mut record).unwrap();
    let statements = conn.statements();
    assert_eq!(
        statements[0].0,
        "DELETE FROM \"order_items\" WHERE (\"order_id\" = $1 AND \"item_id\" = $2)"
    );
}

#[test]
fn delete_without_key_values_is_an_error() {
    let (orm, conn) = orm();
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", Value::Null), ("total", json!(1))]));
    assert!(matches!(
        orm.delete(&mut record),
        Err(OrmError::MissingPrimaryKey(_))
    ));
    assert_eq!(conn.statement_count(), 0);
}

#[test]
fn upsert_emits_on_conflict_do_update() {
    let (orm, conn) = orm();
    let mut record = orm.new_record("item").unwrap();
    record.set("id", json!(5)).unwrap();
    record.set("name", json!("mug")).unwrap();

    let update = HashMap::from([("name".to_string(), json!("mug"))]);
    assert_eq!(orm.upsert(&mut record, Some(update)).unwrap(), json!(1));

    let statements = conn.statements();
    assert_eq!(
        statements[0].0,
        "INSERT INTO \"items\" (\"id\", \"name\") VALUES ($1, $2) \
         ON CONFLICT (\"id\") DO UPDATE SET \"name\" = $3"
    );
    assert_eq!(statements[0].1, vec![json!(5), json!("mug"), json!("mug")]);
    assert!(!record.is_new());
}

#[test]
fn upsert_without_an_update_set_does_nothing_on_conflict() {
    let (orm, conn) = orm();
    let mut record = orm.new_record("item").unwrap();
    record.set("id", json!(5)).unwrap();
    record.set("name", json!("mug")).unwrap();

    orm.upsert(&mut record, None).unwrap();
    let sql = conn.executed_sql();
    assert!(sql[0].ends_with("ON CONFLICT (\"id\") DO NOTHING"), "sql: {}", sql[0]);
}

#[test]
fn refresh_overwrites_attributes_from_the_current_row() {
    let (orm, conn) = orm();
    conn.queue_rows(vec![row(&[("id", json!(1)), ("total", json!(99))])]);

    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", json!(1)), ("total", json!(30))]));
    record.set("total", json!(31)).unwrap();

    assert!(orm.refresh(&mut record).unwrap());
    assert_eq!(record.get("total").unwrap(), &json!(99));
    assert!(!record.is_dirty());

    let statements = conn.statements();
    assert_eq!(
        statements[0].0,
        "SELECT * FROM \"orders\" WHERE \"id\" = $1 LIMIT 1"
    );
}

#[test]
fn refresh_reports_a_vanished_row() {
    let (orm, conn) = orm();
    conn.queue_rows(vec![]);
    let schema = orm.registry().get("order").unwrap();
    let mut record = Record::populate(schema, &row(&[("id", json!(1))]));
    assert!(!orm.refresh(&mut record).unwrap());
}
