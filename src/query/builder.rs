//! Query composer - fluent, build-then-execute query state
//!
//! The composer is a value: cloning it for derived queries (count queries,
//! relation sub-queries) never affects the original's accumulated state.

use std::fmt;
use std::sync::Arc;

use crate::query::condition::Cond;
use crate::schema::IndexBy;

/// Callback that mutates a query before execution.
pub type QueryScope = Arc<dyn Fn(&mut Query) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// One relation to eager-load: plain name or dotted path, with an optional
/// per-call callback applied to the relation query.
#[derive(Clone)]
pub struct WithSpec {
    pub name: String,
    pub callback: Option<QueryScope>,
}

impl WithSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            callback: None,
        }
    }

    pub fn scoped<F>(name: &str, callback: F) -> Self
    where
        F: Fn(&mut Query) + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            callback: Some(Arc::new(callback)),
        }
    }
}

impl fmt::Debug for WithSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithSpec")
            .field("name", &self.name)
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One explicit relation join: relation path, optional alias, join type, and
/// whether the relation is also eager-loaded.
#[derive(Clone)]
pub struct JoinSpec {
    pub relation: String,
    pub alias: Option<String>,
    pub join_type: JoinType,
    pub eager: bool,
    pub callback: Option<QueryScope>,
}

impl fmt::Debug for JoinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinSpec")
            .field("relation", &self.relation)
            .field("alias", &self.alias)
            .field("join_type", &self.join_type)
            .field("eager", &self.eager)
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Fluent query state for one entity. Built up order-independently, then
/// executed via the methods in [`crate::query::execution`].
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) entity: String,
    pub(crate) select: Vec<String>,
    pub(crate) distinct: bool,
    pub(crate) alias: Option<String>,
    pub(crate) cond: Option<Cond>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) joins: Vec<JoinSpec>,
    pub(crate) with: Vec<WithSpec>,
    pub(crate) as_array: bool,
    pub(crate) index_by: Option<IndexBy>,
    /// When set, execution returns empty results without touching the
    /// connection (a pagination pass already proved zero rows).
    pub(crate) emulate_execution: bool,
}

impl Query {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            select: Vec::new(),
            distinct: false,
            alias: None,
            cond: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            joins: Vec::new(),
            with: Vec::new(),
            as_array: false,
            index_by: None,
            emulate_execution: false,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Replace the whole condition tree (last writer wins).
    pub fn where_cond(mut self, cond: Cond) -> Self {
        self.cond = Some(cond);
        self
    }

    /// AND another condition onto the accumulated tree.
    pub fn and_where(mut self, cond: Cond) -> Self {
        self.cond = Some(match self.cond.take() {
            None => cond,
            Some(Cond::And(mut conds)) => {
                conds.push(cond);
                Cond::And(conds)
            }
            Some(existing) => Cond::And(vec![existing, cond]),
        });
        self
    }

    /// OR another condition onto the accumulated tree.
    pub fn or_where(mut self, cond: Cond) -> Self {
        self.cond = Some(match self.cond.take() {
            None => cond,
            Some(Cond::Or(mut conds)) => {
                conds.push(cond);
                Cond::Or(conds)
            }
            Some(existing) => Cond::Or(vec![existing, cond]),
        });
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), OrderDirection::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), OrderDirection::Desc));
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    pub fn offset(mut self, count: u64) -> Self {
        self.offset = Some(count);
        self
    }

    /// Record relation names (plain or dotted paths) for eager loading.
    /// Repeated names merge rather than duplicate.
    pub fn with(mut self, relations: &[&str]) -> Self {
        for name in relations {
            if !self.with.iter().any(|w| w.name == *name) {
                self.with.push(WithSpec::named(name));
            }
        }
        self
    }

    /// Eager-load one relation with a callback applied to its query. A
    /// repeated name replaces the earlier entry's callback (name is the
    /// merge key).
    pub fn with_scoped<F>(mut self, relation: &str, callback: F) -> Self
    where
        F: Fn(&mut Query) + Send + Sync + 'static,
    {
        if let Some(existing) = self.with.iter_mut().find(|w| w.name == relation) {
            existing.callback = Some(Arc::new(callback));
        } else {
            self.with.push(WithSpec::scoped(relation, callback));
        }
        self
    }

    /// Join the named relations into the SQL statement. `spec` supports
    /// `"relation"` and `"relation alias"` forms plus dotted paths; `eager`
    /// additionally records the relation for eager loading.
    pub fn join_with(self, spec: &str, eager: bool, join_type: JoinType) -> Self {
        self.push_join(spec, eager, join_type, None)
    }

    pub fn inner_join_with(self, spec: &str) -> Self {
        self.push_join(spec, true, JoinType::Inner, None)
    }

    /// `join_with` with a callback whose conditions are scoped to this
    /// join's own alias.
    pub fn join_with_scoped<F>(self, spec: &str, eager: bool, join_type: JoinType, callback: F) -> Self
    where
        F: Fn(&mut Query) + Send + Sync + 'static,
    {
        self.push_join(spec, eager, join_type, Some(Arc::new(callback) as QueryScope))
    }

    fn push_join(
        mut self,
        spec: &str,
        eager: bool,
        join_type: JoinType,
        callback: Option<QueryScope>,
    ) -> Self {
        let (relation, alias) = parse_join_spec(spec);
        if eager && !self.with.iter().any(|w| w.name == relation) {
            self.with.push(WithSpec {
                name: relation.clone(),
                callback: callback.clone(),
            });
        }
        self.joins.push(JoinSpec {
            relation,
            alias,
            join_type,
            eager,
            callback,
        });
        self
    }

    /// Return plain JSON rows instead of records.
    pub fn as_array(mut self, enabled: bool) -> Self {
        self.as_array = enabled;
        self
    }

    /// Key results by a column value: `all_indexed` returns a keyed map, and
    /// relation loads deliver `Related::Indexed` instead of `Related::Many`.
    pub fn index_by(mut self, column: &str) -> Self {
        self.index_by = Some(IndexBy::Column(column.to_string()));
        self
    }

    pub fn emulate_execution(mut self, enabled: bool) -> Self {
        self.emulate_execution = enabled;
        self
    }
}

/// Split a `"relation alias"` join spec.
fn parse_join_spec(spec: &str) -> (String, Option<String>) {
    let mut parts = spec.split_whitespace();
    let relation = parts.next().unwrap_or_default().to_string();
    let alias = parts.next().map(|s| s.to_string());
    (relation, alias)
}
