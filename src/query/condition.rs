//! Condition trees - composable WHERE fragments with parameter binding

use serde_json::Value;

/// A composite condition tree. Renders to parameterized SQL with `$n`
/// placeholders; nested `And`/`Or` groups parenthesize themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Like(String, Value),
    In(String, Vec<Value>),
    /// Composite-key membership: `(a, b) IN ((..), (..))`.
    InTuples(Vec<String>, Vec<Vec<Value>>),
    IsNull(String),
    IsNotNull(String),
    Between(String, Value, Value),
    /// Raw SQL fragment with its own positional params, spliced verbatim.
    Raw(String, Vec<Value>),
    And(Vec<Cond>),
    Or(Vec<Cond>),
    Not(Box<Cond>),
}

impl Cond {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Cond::Eq(column.to_string(), value.into())
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Self {
        Cond::Ne(column.to_string(), value.into())
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Cond::Gt(column.to_string(), value.into())
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Cond::Lt(column.to_string(), value.into())
    }

    pub fn like(column: &str, pattern: &str) -> Self {
        Cond::Like(column.to_string(), Value::String(pattern.to_string()))
    }

    pub fn is_in(column: &str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Cond::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: &str) -> Self {
        Cond::IsNull(column.to_string())
    }

    pub fn all_of(conds: impl IntoIterator<Item = Cond>) -> Self {
        Cond::And(conds.into_iter().collect())
    }

    pub fn any_of(conds: impl IntoIterator<Item = Cond>) -> Self {
        Cond::Or(conds.into_iter().collect())
    }

    /// Prefix every unqualified column reference with `alias`. Used when a
    /// join callback's conditions must be scoped to that join's alias.
    pub(crate) fn qualify(self, alias: &str) -> Cond {
        let q = |col: String| {
            if col.contains('.') {
                col
            } else {
                format!("{}.{}", alias, col)
            }
        };
        match self {
            Cond::Eq(c, v) => Cond::Eq(q(c), v),
            Cond::Ne(c, v) => Cond::Ne(q(c), v),
            Cond::Gt(c, v) => Cond::Gt(q(c), v),
            Cond::Gte(c, v) => Cond::Gte(q(c), v),
            Cond::Lt(c, v) => Cond::Lt(q(c), v),
            Cond::Lte(c, v) => Cond::Lte(q(c), v),
            Cond::Like(c, v) => Cond::Like(q(c), v),
            Cond::In(c, vs) => Cond::In(q(c), vs),
            Cond::InTuples(cs, ts) => {
                Cond::InTuples(cs.into_iter().map(q).collect(), ts)
            }
            Cond::IsNull(c) => Cond::IsNull(q(c)),
            Cond::IsNotNull(c) => Cond::IsNotNull(q(c)),
            Cond::Between(c, a, b) => Cond::Between(q(c), a, b),
            Cond::Raw(sql, params) => Cond::Raw(sql, params),
            Cond::And(cs) => Cond::And(cs.into_iter().map(|c| c.qualify(alias)).collect()),
            Cond::Or(cs) => Cond::Or(cs.into_iter().map(|c| c.qualify(alias)).collect()),
            Cond::Not(c) => Cond::Not(Box::new(c.qualify(alias))),
        }
    }

    /// Render to SQL, appending bind values to `params`.
    pub(crate) fn to_sql(&self, quote: &dyn Fn(&str) -> String, params: &mut Vec<Value>) -> String {
        let mut bind = |value: &Value, params: &mut Vec<Value>| {
            params.push(value.clone());
            format!("${}", params.len())
        };
        match self {
            Cond::Eq(c, v) if v.is_null() => format!("{} IS NULL", quote(c)),
            Cond::Eq(c, v) => {
                let p = bind(v, params);
                format!("{} = {}", quote(c), p)
            }
            Cond::Ne(c, v) if v.is_null() => format!("{} IS NOT NULL", quote(c)),
            Cond::Ne(c, v) => {
                let p = bind(v, params);
                format!("{} <> {}", quote(c), p)
            }
            Cond::Gt(c, v) => {
                let p = bind(v, params);
                format!("{} > {}", quote(c), p)
            }
            Cond::Gte(c, v) => {
                let p = bind(v, params);
                format!("{} >= {}", quote(c), p)
            }
            Cond::Lt(c, v) => {
                let p = bind(v, params);
                format!("{} < {}", quote(c), p)
            }
            Cond::Lte(c, v) => {
                let p = bind(v, params);
                format!("{} <= {}", quote(c), p)
            }
            Cond::Like(c, v) => {
                let p = bind(v, params);
                format!("{} LIKE {}", quote(c), p)
            }
            Cond::In(_, values) if values.is_empty() => "0=1".to_string(),
            Cond::In(c, values) => {
                let placeholders: Vec<String> =
                    values.iter().map(|v| bind(v, params)).collect();
                format!("{} IN ({})", quote(c), placeholders.join(", "))
            }
            Cond::InTuples(_, tuples) if tuples.is_empty() => "0=1".to_string(),
            Cond::InTuples(columns, tuples) => {
                let cols: Vec<String> = columns.iter().map(|c| quote(c)).collect();
                let rows: Vec<String> = tuples
                    .iter()
                    .map(|tuple| {
                        let ps: Vec<String> = tuple.iter().map(|v| bind(v, params)).collect();
                        format!("({})", ps.join(", "))
                    })
                    .collect();
                format!("({}) IN ({})", cols.join(", "), rows.join(", "))
            }
            Cond::IsNull(c) => format!("{} IS NULL", quote(c)),
            Cond::IsNotNull(c) => format!("{} IS NOT NULL", quote(c)),
            Cond::Between(c, low, high) => {
                let p1 = bind(low, params);
                let p2 = bind(high, params);
                format!("{} BETWEEN {} AND {}", quote(c), p1, p2)
            }
            Cond::Raw(sql, raw_params) => {
                // Re-number the fragment's placeholders onto the shared list.
                let base = params.len();
                params.extend(raw_params.iter().cloned());
                renumber_placeholders(sql, base)
            }
            Cond::And(conds) if conds.is_empty() => "1=1".to_string(),
            Cond::And(conds) => {
                let parts: Vec<String> =
                    conds.iter().map(|c| c.to_sql(quote, params)).collect();
                format!("({})", parts.join(" AND "))
            }
            Cond::Or(conds) if conds.is_empty() => "0=1".to_string(),
            Cond::Or(conds) => {
                let parts: Vec<String> =
                    conds.iter().map(|c| c.to_sql(quote, params)).collect();
                format!("({})", parts.join(" OR "))
            }
            Cond::Not(cond) => format!("NOT ({})", cond.to_sql(quote, params)),
        }
    }
}

/// Shift every `$n` token in a raw fragment by `base` in one pass, so an
/// already-rewritten placeholder is never rewritten again.
fn renumber_placeholders(sql: &str, base: usize) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let digits_len = tail.bytes().take_while(u8::is_ascii_digit).count();
        match tail[..digits_len].parse::<usize>() {
            Ok(n) if n >= 1 => out.push_str(&format!("${}", base + n)),
            _ => {
                out.push('$');
                out.push_str(&tail[..digits_len]);
            }
        }
        rest = &tail[digits_len..];
    }
    out.push_str(rest);
    out
}
