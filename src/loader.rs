//! Relation resolver - batched eager loading of declared relations
//!
//! Given a set of fetched parent records and a list of relation specs
//! (including dotted sub-relation paths), the resolver issues exactly one
//! query per distinct (relation, nesting level) pair, matches child rows back
//! to parents by link-key equality, and populates each parent's relation
//! cache in place. Pivot relations resolve the intermediate rows first and
//! match grandchildren through an index.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::OrmResult;
use crate::orm::Orm;
use crate::query::{Cond, Query, QueryScope, WithSpec};
use crate::record::{canonical_key, canonical_tuple, Record, Related};
use crate::schema::{IndexBy, RelationDef, Via};

/// Populate every top-level relation in `specs` on all of `models`.
pub(crate) fn find_with(
    orm: &Orm,
    specs: &[WithSpec],
    models: &mut [Record],
    as_array: bool,
) -> OrmResult<()> {
    if models.is_empty() {
        return Ok(());
    }
    for normalized in normalize(specs) {
        populate_relation(orm, &normalized, models, as_array)?;
    }
    Ok(())
}

struct NormalizedWith {
    name: String,
    subs: Vec<WithSpec>,
    callback: Option<QueryScope>,
}

/// Collapse dotted paths onto their top-level relation name, accumulating
/// repeated names' sub-relations instead of overwriting.
fn normalize(specs: &[WithSpec]) -> Vec<NormalizedWith> {
    let mut out: Vec<NormalizedWith> = Vec::new();
    for spec in specs {
        let (head, tail) = match spec.name.split_once('.') {
            Some((head, tail)) => (head, Some(tail)),
            None => (spec.name.as_str(), None),
        };
        let entry = match out.iter_mut().find(|e| e.name == head) {
            Some(entry) => entry,
            None => {
                out.push(NormalizedWith {
                    name: head.to_string(),
                    subs: Vec::new(),
                    callback: None,
                });
                out.last_mut().expect("just pushed")
            }
        };
        match tail {
            // A dotted spec's callback belongs to the innermost relation.
            Some(tail) => entry.subs.push(WithSpec {
                name: tail.to_string(),
                callback: spec.callback.clone(),
            }),
            None => {
                if spec.callback.is_some() {
                    entry.callback = spec.callback.clone();
                }
            }
        }
    }
    out
}

fn populate_relation(
    orm: &Orm,
    spec: &NormalizedWith,
    models: &mut [Record],
    as_array: bool,
) -> OrmResult<()> {
    let schema = models[0].schema().clone();
    let def = schema.relation(&spec.name)?.clone();

    let mut query = Query::new(&def.target);
    // The relation inherits the primary query's array mode; the declared
    // scope or per-call callback may override it.
    query.as_array = as_array;
    if let Some(scope) = &def.scope {
        scope(&mut query);
    }
    if let Some(callback) = &spec.callback {
        callback(&mut query);
    }
    // Nested with applies to the relation's own query, never a fresh
    // top-level query per nested name.
    for sub in &spec.subs {
        if let Some(existing) = query.with.iter_mut().find(|w| w.name == sub.name) {
            if sub.callback.is_some() {
                existing.callback = sub.callback.clone();
            }
        } else {
            query.with.push(sub.clone());
        }
    }
    if query.index_by.is_none() {
        query.index_by = def.index_by.clone();
    }

    debug!(relation = %spec.name, target = %def.target, parents = models.len(), "resolving relation");
    match &def.via {
        None => populate_direct(orm, &spec.name, &def, query, models),
        Some(via) => populate_via(orm, &spec.name, &def, via.clone(), query, models),
    }
}

/// Direct relation: one batched child query keyed on the parents' link values.
fn populate_direct(
    orm: &Orm,
    name: &str,
    def: &RelationDef,
    mut query: Query,
    models: &mut [Record],
) -> OrmResult<()> {
    let child_cols: Vec<String> = def.link.iter().map(|(c, _)| c.clone()).collect();
    let parent_cols: Vec<String> = def.link.iter().map(|(_, p)| p.clone()).collect();

    let (parent_keys, tuples) = collect_keys(models, &parent_cols);
    if tuples.is_empty() {
        // Still mark every parent populated: loaded-empty is observable.
        for model in models.iter_mut() {
            model.set_related(name, empty_related(def, &query));
        }
        return Ok(());
    }

    query = query.and_where(membership_cond(&child_cols, tuples));
    let children = query.all(orm)?;
    trace!(relation = %name, children = children.len(), "matched child rows");

    let buckets = bucket_by(&children, &child_cols);
    attach_buckets(orm, name, def, &query, models, &parent_keys, &buckets)
}

/// Pivot relation: resolve intermediate rows first, index primary-key to
/// pivot-linked keys, then match grandchildren through that index.
fn populate_via(
    orm: &Orm,
    name: &str,
    def: &RelationDef,
    via: Via,
    mut query: Query,
    models: &mut [Record],
) -> OrmResult<()> {
    let schema = models[0].schema().clone();
    // Pivot link maps pivot column -> parent column; the direct link maps
    // child column -> pivot column.
    let (pivot_link, pivot_rows_of): (Vec<(String, String)>, _) = match &via {
        Via::Table { table, link } => {
            let link = link.clone();
            let table = table.clone();
            (link.clone(), PivotSource::Table { table, link })
        }
        Via::Relation(via_name) => {
            let via_def = schema.relation(via_name)?.clone();
            (via_def.link.clone(), PivotSource::Relation(via_def))
        }
    };
    let pivot_parent_cols: Vec<String> = pivot_link.iter().map(|(_, p)| p.clone()).collect();
    let pivot_cols: Vec<String> = pivot_link.iter().map(|(c, _)| c.clone()).collect();

    let (parent_keys, tuples) = collect_keys(models, &pivot_parent_cols);
    if tuples.is_empty() {
        for model in models.iter_mut() {
            model.set_related(name, empty_related(def, &query));
        }
        return Ok(());
    }

    // One pivot query for the whole batch.
    let pivot_rows = pivot_rows_of.fetch(orm, &pivot_cols, tuples)?;

    let child_cols: Vec<String> = def.link.iter().map(|(c, _)| c.clone()).collect();
    let via_cols: Vec<String> = def.link.iter().map(|(_, v)| v.clone()).collect();

    // parent key -> child keys reachable through the pivot, plus the distinct
    // child tuples for the grandchild query.
    let mut pivot_index: HashMap<String, Vec<String>> = HashMap::new();
    let mut seen_children: HashSet<String> = HashSet::new();
    let mut child_tuples: Vec<Vec<Value>> = Vec::new();
    for row in &pivot_rows {
        let parent_values: Vec<Value> =
            pivot_cols.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect();
        let child_values: Vec<Value> =
            via_cols.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect();
        let (Some(parent_key), Some(child_key)) =
            (canonical_tuple(&parent_values), canonical_tuple(&child_values))
        else {
            continue; // NULL keys never participate in matching
        };
        pivot_index.entry(parent_key).or_default().push(child_key.clone());
        if seen_children.insert(child_key) {
            child_tuples.push(child_values);
        }
    }

    let buckets = if child_tuples.is_empty() {
        HashMap::new()
    } else {
        query = query.and_where(membership_cond(&child_cols, child_tuples));
        let children = query.all(orm)?;
        bucket_by(&children, &child_cols)
    };

    // Splice the pivot index between parents and child buckets.
    let empty: Vec<String> = Vec::new();
    for (model, parent_key) in models.iter_mut().zip(&parent_keys) {
        let child_keys = parent_key
            .as_ref()
            .and_then(|k| pivot_index.get(k))
            .unwrap_or(&empty);
        let mut matched: Vec<Record> = Vec::new();
        for key in child_keys {
            if let Some(children) = buckets.get(key) {
                matched.extend(children.iter().cloned());
            }
        }
        model.set_related(name, build_related(def, &query, matched));
    }
    Ok(())
}

enum PivotSource {
    Table { table: String, link: Vec<(String, String)> },
    Relation(RelationDef),
}

impl PivotSource {
    fn fetch(
        self,
        orm: &Orm,
        pivot_cols: &[String],
        tuples: Vec<Vec<Value>>,
    ) -> OrmResult<Vec<HashMap<String, Value>>> {
        match self {
            PivotSource::Table { table, .. } => {
                let quote = |name: &str| orm.connection().quote_identifier(name);
                let mut params = Vec::new();
                let cond = membership_cond(pivot_cols, tuples);
                let sql = format!(
                    "SELECT * FROM {} WHERE {}",
                    quote(&table),
                    cond.to_sql(&quote, &mut params)
                );
                let rows = orm.connection().execute(&sql, &params)?;
                Ok(rows
                    .iter()
                    .map(|row| row.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
                    .collect())
            }
            PivotSource::Relation(via_def) => {
                let mut query = Query::new(&via_def.target);
                if let Some(scope) = &via_def.scope {
                    scope(&mut query);
                }
                let query = query.and_where(membership_cond(pivot_cols, tuples));
                let records = query.all(orm)?;
                Ok(records.iter().map(|r| r.attributes().clone()).collect())
            }
        }
    }
}

/// Canonical key per model plus the distinct raw tuples, NULLs excluded.
fn collect_keys(models: &[Record], columns: &[String]) -> (Vec<Option<String>>, Vec<Vec<Value>>) {
    let mut keys = Vec::with_capacity(models.len());
    let mut seen = HashSet::new();
    let mut tuples = Vec::new();
    for model in models {
        let values: Vec<Value> = columns.iter().map(|c| model.attribute(c).clone()).collect();
        let key = canonical_tuple(&values);
        if let Some(k) = &key {
            if seen.insert(k.clone()) {
                tuples.push(values);
            }
        }
        keys.push(key);
    }
    (keys, tuples)
}

fn membership_cond(columns: &[String], mut tuples: Vec<Vec<Value>>) -> Cond {
    if columns.len() == 1 {
        Cond::In(
            columns[0].clone(),
            tuples.iter_mut().map(|t| t.remove(0)).collect(),
        )
    } else {
        Cond::InTuples(columns.to_vec(), tuples)
    }
}

fn bucket_by(children: &[Record], columns: &[String]) -> HashMap<String, Vec<Record>> {
    let mut buckets: HashMap<String, Vec<Record>> = HashMap::new();
    for child in children {
        let values: Vec<Value> = columns.iter().map(|c| child.attribute(c).clone()).collect();
        // Children with a NULL link column are excluded from the match set.
        if let Some(key) = canonical_tuple(&values) {
            buckets.entry(key).or_default().push(child.clone());
        }
    }
    buckets
}

fn attach_buckets(
    orm: &Orm,
    name: &str,
    def: &RelationDef,
    query: &Query,
    models: &mut [Record],
    parent_keys: &[Option<String>],
    buckets: &HashMap<String, Vec<Record>>,
) -> OrmResult<()> {
    // For inverse population, group stripped parent clones by link key so
    // every child of duplicated parents sees all of them.
    let inverse = match &def.inverse_of {
        Some(inverse_name) => {
            let target = orm.registry().get(&def.target)?;
            let inverse_def = target.relation(inverse_name)?;
            Some((inverse_name.clone(), inverse_def.multiple))
        }
        None => None,
    };
    let mut parents_by_key: HashMap<String, Vec<Record>> = HashMap::new();
    if inverse.is_some() {
        for (model, key) in models.iter().zip(parent_keys) {
            if let Some(key) = key {
                parents_by_key
                    .entry(key.clone())
                    .or_default()
                    .push(model.without_related());
            }
        }
    }

    for (model, key) in models.iter_mut().zip(parent_keys) {
        let mut matched: Vec<Record> = key
            .as_ref()
            .and_then(|k| buckets.get(k))
            .cloned()
            .unwrap_or_default();

        if let (Some((inverse_name, inverse_many)), Some(key)) = (&inverse, key) {
            let parents = parents_by_key.get(key).cloned().unwrap_or_default();
            for child in &mut matched {
                let value = if *inverse_many {
                    Related::Many(parents.clone())
                } else {
                    Related::One(parents.first().cloned().map(Box::new))
                };
                child.set_related(inverse_name, value);
            }
        }

        model.set_related(name, build_related(def, query, matched));
    }
    Ok(())
}

fn empty_related(def: &RelationDef, query: &Query) -> Related {
    build_related(def, query, Vec::new())
}

/// Shape matched children per the relation's cardinality and index hint.
fn build_related(def: &RelationDef, query: &Query, mut matched: Vec<Record>) -> Related {
    if !def.multiple {
        return Related::One(matched.into_iter().next().map(Box::new));
    }
    match &query.index_by {
        None => Related::Many(matched),
        Some(index_by) => {
            let mut map = BTreeMap::new();
            for child in matched.drain(..) {
                let key = match index_by {
                    IndexBy::Column(col) => {
                        canonical_key(child.attribute(col)).unwrap_or_default()
                    }
                    IndexBy::Keyed(f) => f(&child),
                };
                map.insert(key, child);
            }
            Related::Indexed(map)
        }
    }
}
