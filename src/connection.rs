//! Connection abstraction - the collaborator seam to the database driver
//!
//! The ORM core speaks SQL text plus parameter arrays to a [`Connection`] and
//! consumes generic row mappings back. Driver wiring, pooling, and dialect
//! details all live behind this trait; tests substitute a scripted mock.

use serde::Serialize;
use serde_json::Value;

use crate::error::OrmResult;

/// One fetched record: an ordered mapping from column name to value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self { columns: Vec::new() }
    }

    /// Build a row from (column, value) pairs, preserving order.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            columns: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.columns.push((name.into(), value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// First column's value, used for aggregate results.
    pub fn first_value(&self) -> Option<&Value> {
        self.columns.first().map(|(_, v)| v)
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub rows_affected: u64,
    /// Database-generated key for the inserted row, when the driver reports one.
    pub inserted_id: Option<Value>,
}

/// Synchronous database connection contract.
///
/// Every call is a blocking round trip; transaction scoping is explicit via
/// `begin`/`commit`/`rollback` or the [`with_transaction`] helper.
pub trait Connection: Send + Sync {
    /// Execute a row-returning statement.
    fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    /// Execute a mutating statement.
    fn execute_write(&self, sql: &str, params: &[Value]) -> OrmResult<WriteOutcome>;

    fn begin(&self) -> OrmResult<()>;
    fn commit(&self) -> OrmResult<()>;
    fn rollback(&self) -> OrmResult<()>;

    /// Quote an identifier for the connection's dialect. Dotted names are
    /// quoted per segment; `*` passes through.
    fn quote_identifier(&self, name: &str) -> String {
        quote_default(name)
    }

    fn driver_name(&self) -> &str;

    /// Schema introspection fallback; declared registry keys take precedence.
    fn primary_key_columns(&self, _table: &str) -> OrmResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Default ANSI identifier quoting.
pub(crate) fn quote_default(name: &str) -> String {
    if name == "*" || name.contains('(') {
        return name.to_string();
    }
    name.split('.')
        .map(|part| {
            if part == "*" {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Run `f` inside a transaction: commit on success, roll back on error.
pub fn with_transaction<T, F>(conn: &dyn Connection, f: F) -> OrmResult<T>
where
    F: FnOnce(&dyn Connection) -> OrmResult<T>,
{
    conn.begin()?;
    match f(conn) {
        Ok(value) => {
            conn.commit()?;
            Ok(value)
        }
        Err(err) => {
            // Rollback failure is secondary; the original error wins.
            let _ = conn.rollback();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_lookup_preserves_order_and_finds_columns() {
        let row = Row::from_pairs([("id", json!(7)), ("name", json!("ada"))]);
        assert_eq!(row.get("name"), Some(&json!("ada")));
        assert_eq!(row.first_value(), Some(&json!(7)));
        assert!(row.get("missing").is_none());
        let names: Vec<&str> = row.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn default_quoting_handles_dots_and_star() {
        assert_eq!(quote_default("orders"), "\"orders\"");
        assert_eq!(quote_default("o.customer_id"), "\"o\".\"customer_id\"");
        assert_eq!(quote_default("o.*"), "\"o\".*");
        assert_eq!(quote_default("*"), "*");
    }
}
