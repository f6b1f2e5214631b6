//! Query composition - fluent, order-independent query building
//!
//! A [`Query`] accumulates conditions, ordering, pagination, relation joins,
//! and eager-load specs, then executes against the injected connection.

pub mod builder;
pub mod condition;
pub mod execution;
pub mod sql;

pub use builder::{JoinSpec, JoinType, OrderDirection, Query, QueryScope, WithSpec};
pub use condition::Cond;
