//! Persistence orchestration - insert/update/upsert/delete with lifecycle events
//!
//! Every write follows the same state machine: dispatch the before-event
//! (listeners may rewrite the property set or prevent the default action),
//! execute the single-statement write, reconcile dirty tracking, dispatch the
//! after-event. "Nothing to do" is `false`, never an error; stale optimistic
//! locks are a distinct error so callers can pick a retry/merge policy.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{OrmError, OrmResult};
use crate::events::{EventKind, EventPayload, LifecycleEvent};
use crate::orm::Orm;
use crate::query::Cond;
use crate::record::Record;
use crate::schema::EntitySchema;

impl Orm {
    /// Insert when the record has no row backing, otherwise update.
    /// Returns `false` when nothing was written.
    pub fn save(&self, record: &mut Record) -> OrmResult<bool> {
        if record.is_new() {
            self.insert(record)
        } else {
            Ok(self.update(record)? != Value::Bool(false))
        }
    }

    /// Insert the record's attributes as a new row. Listeners on
    /// BeforeInsert may rewrite the property set; preventing the default
    /// skips the write and returns `false`.
    pub fn insert(&self, record: &mut Record) -> OrmResult<bool> {
        self.guard_persistable(record)?;
        if !record.is_new() {
            return Err(OrmError::Configuration(format!(
                "entity '{}' already has a row backing, call update",
                record.entity()
            )));
        }
        let entity = record.entity().to_string();
        let schema = record.schema().clone();
        let mut props = record.attributes().clone();

        let mut before = LifecycleEvent::new(EventKind::BeforeInsert)
            .with_record(record)
            .with_payload(EventPayload::Properties(&mut props));
        self.dispatch(&entity, &mut before)?;
        if before.is_default_prevented() {
            return Ok(false);
        }
        drop(before);

        let columns = ordered_columns(&schema, &props);
        let params: Vec<Value> = columns.iter().map(|c| props[c].clone()).collect();
        let quote = |name: &str| self.connection().quote_identifier(name);
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&schema.table),
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            placeholders.join(", ")
        );
        let outcome = self.connection().execute_write(&sql, &params)?;
        debug!(entity = %entity, rows = outcome.rows_affected, "inserted row");

        record.apply_properties(&props);
        // Assign the database-generated key when a single-column key was
        // left unset.
        if let Some(id) = outcome.inserted_id {
            if schema.primary_key.len() == 1 {
                let pk = &schema.primary_key[0];
                if record.attribute(pk).is_null() {
                    record.apply_properties(&HashMap::from([(pk.clone(), id)]));
                }
            }
        }
        record.commit_insert();

        let mut after = LifecycleEvent::new(EventKind::AfterInsert)
            .with_record(record)
            .with_payload(EventPayload::Success(true));
        self.dispatch(&entity, &mut after)?;
        Ok(true)
    }

    /// Write the record's dirty attributes back to its row. Returns the
    /// affected-row count, or `false` when there was nothing to write or a
    /// listener prevented the default (its return value, if set, is returned
    /// verbatim).
    pub fn update(&self, record: &mut Record) -> OrmResult<Value> {
        self.update_with(record, None)
    }

    /// `update` with an explicit property set instead of the dirty diff.
    pub fn update_with(
        &self,
        record: &mut Record,
        properties_override: Option<HashMap<String, Value>>,
    ) -> OrmResult<Value> {
        self.guard_persistable(record)?;
        if record.is_new() {
            return Err(OrmError::Configuration(format!(
                "entity '{}' has no row backing yet, call insert",
                record.entity()
            )));
        }
        let entity = record.entity().to_string();
        let schema = record.schema().clone();

        let mut props = match properties_override {
            Some(props) => props,
            None => record.dirty_attributes(),
        };
        // Update with no changes is a no-op: zero events, zero round trips.
        if props.is_empty() {
            return Ok(Value::Bool(false));
        }

        let mut before = LifecycleEvent::new(EventKind::BeforeUpdate)
            .with_record(record)
            .with_payload(EventPayload::Properties(&mut props));
        self.dispatch(&entity, &mut before)?;
        if before.is_default_prevented() {
            return Ok(before.take_return_value().unwrap_or(Value::Bool(false)));
        }
        drop(before);

        // Optimistic lock: bump the version in the write, check it in the
        // condition.
        let lock = match &schema.version_column {
            Some(column) => {
                let current = scalar_to_i64(record.old_attribute(column)).unwrap_or(0);
                props.insert(column.clone(), json!(current + 1));
                Some((column.clone(), current))
            }
            None => None,
        };

        let mut cond = pk_cond(record)?;
        if let Some((column, current)) = &lock {
            cond = Cond::And(vec![cond, Cond::eq(column, *current)]);
        }

        let columns = ordered_columns(&schema, &props);
        let quote = |name: &str| self.connection().quote_identifier(name);
        let mut params: Vec<Value> = columns.iter().map(|c| props[c].clone()).collect();
        let sets: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", quote(c), i + 1))
            .collect();
        let where_sql = cond.to_sql(&quote, &mut params);
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote(&schema.table),
            sets.join(", "),
            where_sql
        );
        let outcome = self.connection().execute_write(&sql, &params)?;
        if lock.is_some() && outcome.rows_affected == 0 {
            return Err(OrmError::StaleData { entity });
        }
        debug!(entity = %entity, rows = outcome.rows_affected, "updated row");

        record.apply_properties(&props);
        record.mark_clean(columns.iter().map(String::as_str));

        let mut after = LifecycleEvent::new(EventKind::AfterUpdate)
            .with_record(record)
            .with_payload(EventPayload::Affected(outcome.rows_affected));
        self.dispatch(&entity, &mut after)?;
        Ok(json!(outcome.rows_affected))
    }

    /// Insert-or-update-on-conflict in one statement. `update_on_conflict`
    /// is the conflict write set; `None` skips the update entirely.
    /// Listeners on BeforeUpsert may rewrite either set.
    pub fn upsert(
        &self,
        record: &mut Record,
        update_on_conflict: Option<HashMap<String, Value>>,
    ) -> OrmResult<Value> {
        self.guard_persistable(record)?;
        let entity = record.entity().to_string();
        let schema = record.schema().clone();
        let mut props = record.attributes().clone();
        let mut update = update_on_conflict;

        let mut before = LifecycleEvent::new(EventKind::BeforeUpsert)
            .with_record(record)
            .with_payload(EventPayload::Upsert {
                insert: &mut props,
                update: &mut update,
            });
        self.dispatch(&entity, &mut before)?;
        if before.is_default_prevented() {
            return Ok(before.take_return_value().unwrap_or(Value::Bool(false)));
        }
        drop(before);

        let columns = ordered_columns(&schema, &props);
        let quote = |name: &str| self.connection().quote_identifier(name);
        let mut params: Vec<Value> = columns.iter().map(|c| props[c].clone()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let conflict_target = schema
            .primary_key
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let on_conflict = match &update {
            None => format!("ON CONFLICT ({}) DO NOTHING", conflict_target),
            Some(update_props) => {
                let update_cols = ordered_columns(&schema, update_props);
                let sets: Vec<String> = update_cols
                    .iter()
                    .map(|c| {
                        params.push(update_props[c].clone());
                        format!("{} = ${}", quote(c), params.len())
                    })
                    .collect();
                format!("ON CONFLICT ({}) DO UPDATE SET {}", conflict_target, sets.join(", "))
            }
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) {}",
            quote(&schema.table),
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            placeholders.join(", "),
            on_conflict
        );
        let outcome = self.connection().execute_write(&sql, &params)?;
        debug!(entity = %entity, rows = outcome.rows_affected, "upserted row");

        record.apply_properties(&props);
        if let Some(id) = outcome.inserted_id {
            if schema.primary_key.len() == 1 && record.attribute(&schema.primary_key[0]).is_null() {
                record.apply_properties(&HashMap::from([(schema.primary_key[0].clone(), id)]));
            }
        }
        record.commit_insert();

        let mut after = LifecycleEvent::new(EventKind::AfterUpsert)
            .with_record(record)
            .with_payload(EventPayload::Success(true));
        self.dispatch(&entity, &mut after)?;
        Ok(json!(outcome.rows_affected))
    }

    /// Delete the record's row by primary key. A listener preventing the
    /// default (e.g. soft delete) short-circuits with its return value and no
    /// DELETE is issued; otherwise returns the affected-row count. The
    /// in-memory instance stays usable but becomes non-persistable.
    pub fn delete(&self, record: &mut Record) -> OrmResult<Value> {
        self.guard_persistable(record)?;
        if record.is_new() {
            return Err(OrmError::Configuration(format!(
                "entity '{}' has no row backing to delete",
                record.entity()
            )));
        }
        let entity = record.entity().to_string();
        let schema = record.schema().clone();

        let mut before = LifecycleEvent::new(EventKind::BeforeDelete).with_record(record);
        self.dispatch(&entity, &mut before)?;
        if before.is_default_prevented() {
            return Ok(before.take_return_value().unwrap_or(Value::Bool(false)));
        }
        drop(before);

        let mut cond = pk_cond(record)?;
        let lock = match &schema.version_column {
            Some(column) => {
                let current = scalar_to_i64(record.old_attribute(column)).unwrap_or(0);
                cond = Cond::And(vec![cond, Cond::eq(column.as_str(), current)]);
                true
            }
            None => false,
        };

        let quote = |name: &str| self.connection().quote_identifier(name);
        let mut params = Vec::new();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote(&schema.table),
            cond.to_sql(&quote, &mut params)
        );
        let outcome = self.connection().execute_write(&sql, &params)?;
        if lock && outcome.rows_affected == 0 {
            return Err(OrmError::StaleData { entity });
        }
        debug!(entity = %entity, rows = outcome.rows_affected, "deleted row");
        record.mark_deleted();

        let mut after = LifecycleEvent::new(EventKind::AfterDelete)
            .with_record(record)
            .with_payload(EventPayload::Affected(outcome.rows_affected));
        self.dispatch(&entity, &mut after)?;
        Ok(json!(outcome.rows_affected))
    }

    /// Re-fetch the record's row and overwrite its attributes. Returns
    /// `false` when the row no longer exists.
    pub fn refresh(&self, record: &mut Record) -> OrmResult<bool> {
        self.guard_persistable(record)?;
        let schema = record.schema().clone();
        let quote = |name: &str| self.connection().quote_identifier(name);
        let mut params = Vec::new();
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            quote(&schema.table),
            pk_cond(record)?.to_sql(&quote, &mut params)
        );
        let rows = self.connection().execute(&sql, &params)?;
        match rows.first() {
            Some(row) => {
                record.reload_from(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn guard_persistable(&self, record: &Record) -> OrmResult<()> {
        if record.is_deleted() {
            return Err(OrmError::Configuration(format!(
                "entity '{}' instance was deleted and is no longer persistable",
                record.entity()
            )));
        }
        Ok(())
    }
}

/// Primary key equality condition from the record's persisted key values.
fn pk_cond(record: &Record) -> OrmResult<Cond> {
    let values = record.primary_key_values()?;
    let mut conds: Vec<Cond> = values
        .into_iter()
        .map(|(column, value)| Cond::Eq(column, value))
        .collect();
    Ok(if conds.len() == 1 {
        conds.remove(0)
    } else {
        Cond::And(conds)
    })
}

/// Deterministic write order: declared column order first, then any
/// listener-added extras alphabetically.
fn ordered_columns(schema: &EntitySchema, props: &HashMap<String, Value>) -> Vec<String> {
    let mut columns: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| props.contains_key(*c))
        .cloned()
        .collect();
    let mut extras: Vec<String> = props
        .keys()
        .filter(|k| !schema.columns.contains(*k))
        .cloned()
        .collect();
    extras.sort();
    columns.extend(extras);
    columns
}

fn scalar_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
