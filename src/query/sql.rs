//! SQL text generation - select/count statements with relation joins
//!
//! Join graphs are resolved from relation declarations: each `join_with`
//! call's alias scopes its own ON condition, and a (table, alias) pair is
//! joined at most once. The same table under two aliases yields two
//! independent joins.

use serde_json::Value;
use tracing::debug;

use crate::error::{OrmError, OrmResult};
use crate::query::builder::{JoinSpec, Query};
use crate::query::condition::Cond;
use crate::schema::{SchemaRegistry, Via};

#[derive(Debug)]
pub(crate) struct BuiltSql {
    pub sql: String,
    pub params: Vec<Value>,
}

type Quote<'a> = &'a dyn Fn(&str) -> String;

/// Build the full SELECT statement for a query.
pub(crate) fn build_select(
    query: &Query,
    registry: &SchemaRegistry,
    quote: Quote<'_>,
) -> OrmResult<BuiltSql> {
    let mut params = Vec::new();
    let mut sql = select_from(query, registry, quote, &mut params, false)?;

    if !query.order_by.is_empty() {
        let parts: Vec<String> = query
            .order_by
            .iter()
            .map(|(col, dir)| format!("{} {}", quote(col), dir))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    debug!(target: "strata_orm::sql", sql = %sql, "built select");
    Ok(BuiltSql { sql, params })
}

/// Build the aggregate COUNT variant; ignores limit, offset, and ordering.
pub(crate) fn build_count(
    query: &Query,
    column: &str,
    registry: &SchemaRegistry,
    quote: Quote<'_>,
) -> OrmResult<BuiltSql> {
    let mut params = Vec::new();
    let mut count_query = query.clone();
    count_query.select = vec![format!("COUNT({})", quote(column))];
    let sql = select_from(&count_query, registry, quote, &mut params, true)?;
    debug!(target: "strata_orm::sql", sql = %sql, "built count");
    Ok(BuiltSql { sql, params })
}

fn select_from(
    query: &Query,
    registry: &SchemaRegistry,
    quote: Quote<'_>,
    params: &mut Vec<Value>,
    aggregate: bool,
) -> OrmResult<String> {
    let schema = registry.get(&query.entity)?;
    let base_ref = query.alias.clone().unwrap_or_else(|| schema.table.clone());

    let join_sql = build_joins(query, registry, quote, params, &base_ref)?;

    let select = if !query.select.is_empty() {
        query.select.join(", ")
    } else if query.joins.is_empty() {
        "*".to_string()
    } else {
        // Joined statements restrict the projection to the base table so
        // joined columns never clobber hydrated attributes.
        format!("{}.*", quote(&base_ref))
    };

    let from = if query.alias.is_some() {
        format!("{} AS {}", quote(&schema.table), quote(&base_ref))
    } else {
        quote(&schema.table)
    };

    let mut sql = format!(
        "SELECT {}{} FROM {}",
        if query.distinct && !aggregate { "DISTINCT " } else { "" },
        select,
        from
    );
    for clause in join_sql {
        sql.push(' ');
        sql.push_str(&clause);
    }
    if let Some(cond) = &query.cond {
        sql.push_str(" WHERE ");
        sql.push_str(&cond.to_sql(quote, params));
    }
    Ok(sql)
}

fn build_joins(
    query: &Query,
    registry: &SchemaRegistry,
    quote: Quote<'_>,
    params: &mut Vec<Value>,
    base_ref: &str,
) -> OrmResult<Vec<String>> {
    let mut clauses = Vec::new();
    // alias -> table bindings, tracked per call so later references resolve
    // to their own join clause.
    let mut bound: Vec<(String, String)> = Vec::new();

    for join in &query.joins {
        let mut parent_schema = registry.get(&query.entity)?;
        let mut parent_ref = base_ref.to_string();
        let segments: Vec<&str> = join.relation.split('.').collect();

        for (depth, segment) in segments.iter().enumerate() {
            let def = parent_schema.relation(segment)?;
            let child_schema = registry.get(&def.target)?;
            let last = depth == segments.len() - 1;

            // The explicit alias applies to the terminal hop only.
            let child_ref = if last {
                join.alias.clone().unwrap_or_else(|| child_schema.table.clone())
            } else {
                child_schema.table.clone()
            };

            match &def.via {
                None => {
                    push_join_clause(
                        &mut clauses,
                        &mut bound,
                        join,
                        quote,
                        params,
                        &child_schema.table,
                        &child_ref,
                        &def.link,
                        &parent_ref,
                        last,
                    )?;
                }
                Some(via) => {
                    // Pivot hop first, then the terminal hop against the pivot.
                    let (pivot_table, pivot_link) = match via {
                        Via::Table { table, link } => (table.clone(), link.clone()),
                        Via::Relation(name) => {
                            let via_def = parent_schema.relation(name)?;
                            let via_schema = registry.get(&via_def.target)?;
                            (via_schema.table.clone(), via_def.link.clone())
                        }
                    };
                    let pivot_ref = pivot_table.clone();
                    push_join_clause(
                        &mut clauses,
                        &mut bound,
                        join,
                        quote,
                        params,
                        &pivot_table,
                        &pivot_ref,
                        &pivot_link,
                        &parent_ref,
                        false,
                    )?;
                    // Direct link maps child columns to pivot columns.
                    let child_link: Vec<(String, String)> = def.link.clone();
                    push_join_clause(
                        &mut clauses,
                        &mut bound,
                        join,
                        quote,
                        params,
                        &child_schema.table,
                        &child_ref,
                        &child_link,
                        &pivot_ref,
                        last,
                    )?;
                }
            }

            parent_schema = child_schema;
            parent_ref = child_ref;
        }
    }
    Ok(clauses)
}

#[allow(clippy::too_many_arguments)]
fn push_join_clause(
    clauses: &mut Vec<String>,
    bound: &mut Vec<(String, String)>,
    join: &JoinSpec,
    quote: Quote<'_>,
    params: &mut Vec<Value>,
    table: &str,
    alias: &str,
    link: &[(String, String)],
    parent_ref: &str,
    terminal: bool,
) -> OrmResult<()> {
    if let Some((_, existing_table)) = bound.iter().find(|(a, _)| a == alias) {
        if existing_table == table {
            // Same (table, alias) pair is joined once.
            return Ok(());
        }
        return Err(OrmError::Configuration(format!(
            "join alias '{}' is already bound to table '{}'",
            alias, existing_table
        )));
    }
    bound.push((alias.to_string(), table.to_string()));

    let mut on_parts: Vec<String> = link
        .iter()
        .map(|(child_col, parent_col)| {
            format!(
                "{} = {}",
                quote(&format!("{}.{}", alias, child_col)),
                quote(&format!("{}.{}", parent_ref, parent_col))
            )
        })
        .collect();

    // The callback's conditions scope to this call's own alias.
    if terminal {
        if let Some(callback) = &join.callback {
            let mut scoped = Query::new("__join_scope__");
            callback(&mut scoped);
            if let Some(cond) = scoped.cond {
                on_parts.push(cond.qualify(alias).to_sql(quote, params));
            }
        }
    }

    let target = if alias == table {
        quote(table)
    } else {
        format!("{} AS {}", quote(table), quote(alias))
    };
    clauses.push(format!(
        "{} {} ON {}",
        join.join_type,
        target,
        on_parts.join(" AND ")
    ));
    Ok(())
}
