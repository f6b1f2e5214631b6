//! Entity instances and the row mapper
//!
//! A [`Record`] binds one database row to an in-memory attribute map with
//! dirty tracking and a relation cache. Attribute access goes through tagged
//! `get`/`set` accessors; there is no reflection and no silent fallthrough.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::connection::Row;
use crate::error::{OrmError, OrmResult};
use crate::schema::EntitySchema;

static NULL: Value = Value::Null;

/// Resolved value of a relation on a record.
///
/// Absence from the relation cache is the "not yet loaded" state; a cached
/// `One(None)` or empty `Many` means the relation was loaded and found empty.
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
    /// `many` results keyed by an `index_by` column or function.
    Indexed(BTreeMap<String, Record>),
}

impl Related {
    pub fn is_empty(&self) -> bool {
        match self {
            Related::One(one) => one.is_none(),
            Related::Many(many) => many.is_empty(),
            Related::Indexed(map) => map.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(one) => usize::from(one.is_some()),
            Related::Many(many) => many.len(),
            Related::Indexed(map) => map.len(),
        }
    }
}

/// One database row bound to an entity schema.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<EntitySchema>,
    attributes: HashMap<String, Value>,
    /// Attribute values as last read from or written to the database.
    /// `None` marks a record that has no row backing yet.
    old_attributes: Option<HashMap<String, Value>>,
    dirty: BTreeSet<String>,
    related: HashMap<String, Related>,
    deleted: bool,
}

impl Record {
    /// Create a new, unsaved record.
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self {
            schema,
            attributes: HashMap::new(),
            old_attributes: None,
            dirty: BTreeSet::new(),
            related: HashMap::new(),
            deleted: false,
        }
    }

    /// Hydrate a record from a fetched row. Every column present in the row is
    /// carried over, including join/expression columns outside the schema.
    pub fn populate(schema: Arc<EntitySchema>, row: &Row) -> Self {
        let attributes: HashMap<String, Value> = row
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Self {
            schema,
            old_attributes: Some(attributes.clone()),
            attributes,
            dirty: BTreeSet::new(),
            related: HashMap::new(),
            deleted: false,
        }
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn entity(&self) -> &str {
        &self.schema.entity
    }

    pub fn is_new(&self) -> bool {
        self.old_attributes.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Read an attribute. Declared-but-unset columns read as SQL NULL;
    /// undeclared names are a programmer error.
    pub fn get(&self, name: &str) -> OrmResult<&Value> {
        if let Some(value) = self.attributes.get(name) {
            return Ok(value);
        }
        if self.schema.has_column(name) {
            return Ok(&NULL);
        }
        Err(OrmError::UnknownProperty {
            entity: self.schema.entity.clone(),
            name: name.to_string(),
        })
    }

    /// Write an attribute, recording a dirty entry when the value actually
    /// changes against the persisted snapshot. Relation names are read-only
    /// through this path.
    pub fn set(&mut self, name: &str, value: Value) -> OrmResult<()> {
        if !self.schema.has_column(name) {
            if self.schema.has_relation(name) {
                return Err(OrmError::WriteOnlyProperty {
                    entity: self.schema.entity.clone(),
                    name: name.to_string(),
                });
            }
            return Err(OrmError::UnknownProperty {
                entity: self.schema.entity.clone(),
                name: name.to_string(),
            });
        }
        let old = self
            .old_attributes
            .as_ref()
            .and_then(|old| old.get(name))
            .unwrap_or(&NULL);
        if self.old_attributes.is_some() && *old == value {
            self.dirty.remove(name);
        } else {
            self.dirty.insert(name.to_string());
        }
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Non-erroring attribute lookup for internal plumbing.
    pub(crate) fn attribute(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&NULL)
    }

    /// Attribute value as of the last round trip to the database.
    pub fn old_attribute(&self, name: &str) -> &Value {
        self.old_attributes
            .as_ref()
            .and_then(|old| old.get(name))
            .unwrap_or(&NULL)
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Columns whose in-memory value differs from the last persisted value.
    /// For a new record this is every set attribute.
    pub fn dirty_attributes(&self) -> HashMap<String, Value> {
        if self.old_attributes.is_none() {
            return self.attributes.clone();
        }
        self.dirty
            .iter()
            .map(|name| (name.clone(), self.attribute(name).clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        if self.old_attributes.is_none() {
            !self.attributes.is_empty()
        } else {
            !self.dirty.is_empty()
        }
    }

    /// Fold the given written columns into the persisted snapshot, clearing
    /// their dirty entries only. Other dirty entries and the relation cache
    /// stay untouched.
    pub(crate) fn mark_clean<'a, I>(&mut self, columns: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let old = self.old_attributes.get_or_insert_with(HashMap::new);
        for name in columns {
            old.insert(name.to_string(), self.attributes.get(name).cloned().unwrap_or(Value::Null));
            self.dirty.remove(name);
        }
    }

    /// Merge a written property set into the attribute map verbatim,
    /// bypassing dirty bookkeeping (the caller reconciles it).
    pub(crate) fn apply_properties(&mut self, props: &HashMap<String, Value>) {
        for (name, value) in props {
            self.attributes.insert(name.clone(), value.clone());
        }
    }

    /// Replace the written attribute set after an insert succeeded.
    pub(crate) fn commit_insert(&mut self) {
        self.old_attributes = Some(self.attributes.clone());
        self.dirty.clear();
    }

    /// Overwrite all attributes from a freshly fetched row.
    pub(crate) fn reload_from(&mut self, row: &Row) {
        let attributes: HashMap<String, Value> = row
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.old_attributes = Some(attributes.clone());
        self.attributes = attributes;
        self.dirty.clear();
    }

    /// Primary key values in declared column order, as last persisted.
    pub fn primary_key_values(&self) -> OrmResult<Vec<(String, Value)>> {
        let mut values = Vec::with_capacity(self.schema.primary_key.len());
        for column in &self.schema.primary_key {
            let value = if self.old_attributes.is_some() {
                self.old_attribute(column)
            } else {
                self.attribute(column)
            };
            if value.is_null() {
                return Err(OrmError::MissingPrimaryKey(self.schema.entity.clone()));
            }
            values.push((column.clone(), value.clone()));
        }
        Ok(values)
    }

    // --- relation cache -------------------------------------------------

    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    pub fn is_relation_populated(&self, name: &str) -> bool {
        self.related.contains_key(name)
    }

    pub fn set_related(&mut self, name: &str, value: Related) {
        self.related.insert(name.to_string(), value);
    }

    /// Drop a cached relation so the next access reloads it.
    pub fn unset_related(&mut self, name: &str) {
        self.related.remove(name);
    }

    /// Clone of this record with the relation cache stripped, used when a
    /// back-reference must not form a cycle.
    pub(crate) fn without_related(&self) -> Record {
        Record {
            schema: Arc::clone(&self.schema),
            attributes: self.attributes.clone(),
            old_attributes: self.old_attributes.clone(),
            dirty: self.dirty.clone(),
            related: HashMap::new(),
            deleted: self.deleted,
        }
    }

    /// Project the record (attributes plus populated relations) to JSON.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        let mut names: Vec<&String> = self.attributes.keys().collect();
        names.sort();
        for name in names {
            map.insert(name.clone(), self.attributes[name].clone());
        }
        let mut rel_names: Vec<&String> = self.related.keys().collect();
        rel_names.sort();
        for name in rel_names {
            let value = match &self.related[name] {
                Related::One(None) => Value::Null,
                Related::One(Some(record)) => record.to_value(),
                Related::Many(records) => {
                    Value::Array(records.iter().map(Record::to_value).collect())
                }
                Related::Indexed(records) => Value::Object(
                    records
                        .iter()
                        .map(|(k, r)| (k.clone(), r.to_value()))
                        .collect(),
                ),
            };
            map.insert(name.clone(), value);
        }
        Value::Object(map)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Canonical string form of a scalar used as a link/bucket key.
///
/// `None` for SQL NULL: a null foreign key never participates in matching.
/// Numeric and string forms of the same key value collapse to one key,
/// matching the loose scalar comparison of the wire format.
pub(crate) fn canonical_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Canonical form of a composite key tuple; `None` if any component is NULL.
pub(crate) fn canonical_tuple(values: &[Value]) -> Option<String> {
    let mut parts = Vec::with_capacity(values.len());
    for value in values {
        parts.push(canonical_key(value)?);
    }
    Some(parts.join("\u{1f}"))
}
