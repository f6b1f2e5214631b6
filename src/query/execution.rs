//! Query execution - materializing composed queries through the connection

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{OrmError, OrmResult};
use crate::events::{EventKind, EventPayload, LifecycleEvent};
use crate::loader;
use crate::orm::Orm;
use crate::query::builder::Query;
use crate::query::sql;
use crate::record::{canonical_key, Record};
use crate::schema::IndexBy;

impl Query {
    /// Execute and return all matching records, with eager relations
    /// populated. An emulated query returns empty without a round trip.
    pub fn all(&self, orm: &Orm) -> OrmResult<Vec<Record>> {
        if self.emulate_execution {
            trace!(entity = %self.entity, "emulated execution, skipping round trip");
            return Ok(Vec::new());
        }
        let schema = orm.registry().get(&self.entity)?;
        let quote = |name: &str| orm.connection().quote_identifier(name);
        let built = sql::build_select(self, orm.registry(), &quote)?;
        let rows = orm.connection().execute(&built.sql, &built.params)?;
        debug!(entity = %self.entity, rows = rows.len(), "fetched base rows");

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut before = LifecycleEvent::new(EventKind::BeforePopulate)
                .with_payload(EventPayload::Row(row));
            orm.dispatch(&self.entity, &mut before)?;
            if before.is_default_prevented() {
                continue;
            }
            let mut record = Record::populate(schema.clone(), row);
            let mut after =
                LifecycleEvent::new(EventKind::AfterPopulate).with_record(&mut record);
            orm.dispatch(&self.entity, &mut after)?;
            records.push(record);
        }

        if !self.with.is_empty() && !records.is_empty() {
            loader::find_with(orm, &self.with, &mut records, self.as_array)?;
        }
        Ok(records)
    }

    /// Execute and key each record by the query's `index_by` hint. Errors
    /// when no key was declared.
    pub fn all_indexed(&self, orm: &Orm) -> OrmResult<BTreeMap<String, Record>> {
        let index_by = self.index_by.clone().ok_or_else(|| {
            OrmError::Configuration(format!(
                "query on '{}' declares no index_by key",
                self.entity
            ))
        })?;
        let mut indexed = BTreeMap::new();
        for record in self.all(orm)? {
            let key = match &index_by {
                IndexBy::Column(column) => {
                    canonical_key(record.attribute(column)).unwrap_or_default()
                }
                IndexBy::Keyed(f) => f(&record),
            };
            indexed.insert(key, record);
        }
        Ok(indexed)
    }

    /// Execute and return at most one record.
    pub fn one(&self, orm: &Orm) -> OrmResult<Option<Record>> {
        let mut limited = self.clone();
        limited.limit = Some(1);
        Ok(limited.all(orm)?.into_iter().next())
    }

    /// `one`, erroring with `NotFound` when nothing matches.
    pub fn one_or_err(&self, orm: &Orm) -> OrmResult<Record> {
        let schema = orm.registry().get(&self.entity)?;
        self.one(orm)?.ok_or(OrmError::NotFound(schema.table.clone()))
    }

    /// Execute in array mode: plain JSON rows (attributes plus populated
    /// relations) instead of records.
    pub fn all_values(&self, orm: &Orm) -> OrmResult<Vec<Value>> {
        let mut query = self.clone();
        query.as_array = true;
        Ok(query.all(orm)?.iter().map(Record::to_value).collect())
    }

    /// Aggregate count over the composed conditions and joins; limit,
    /// offset, and ordering are ignored.
    pub fn count(&self, column: &str, orm: &Orm) -> OrmResult<u64> {
        if self.emulate_execution {
            return Ok(0);
        }
        let quote = |name: &str| orm.connection().quote_identifier(name);
        let built = sql::build_count(self, column, orm.registry(), &quote)?;
        let rows = orm.connection().execute(&built.sql, &built.params)?;
        let value = rows
            .first()
            .and_then(|row| row.first_value())
            .cloned()
            .unwrap_or(Value::Null);
        scalar_to_u64(&value).ok_or_else(|| {
            OrmError::Database(format!("non-numeric COUNT result: {}", value))
        })
    }

    pub fn exists(&self, orm: &Orm) -> OrmResult<bool> {
        if self.emulate_execution {
            return Ok(false);
        }
        let mut probe = self.clone();
        probe.select = vec!["1".to_string()];
        probe.limit = Some(1);
        probe.with.clear();
        let quote = |name: &str| orm.connection().quote_identifier(name);
        let built = sql::build_select(&probe, orm.registry(), &quote)?;
        let rows = orm.connection().execute(&built.sql, &built.params)?;
        Ok(!rows.is_empty())
    }

    /// Values of a single column across all matching rows.
    pub fn column_values(&self, column: &str, orm: &Orm) -> OrmResult<Vec<Value>> {
        if self.emulate_execution {
            return Ok(Vec::new());
        }
        let mut projected = self.clone();
        let quote = |name: &str| orm.connection().quote_identifier(name);
        projected.select = vec![quote(column)];
        projected.with.clear();
        let built = sql::build_select(&projected, orm.registry(), &quote)?;
        let rows = orm.connection().execute(&built.sql, &built.params)?;
        Ok(rows
            .iter()
            .map(|row| row.first_value().cloned().unwrap_or(Value::Null))
            .collect())
    }
}

fn scalar_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_i64().and_then(|i| u64::try_from(i).ok())),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
