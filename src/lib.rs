//! # strata-orm: active record core
//!
//! Maps database rows to in-memory records, manages their lifecycle (load,
//! populate, save, delete), resolves declared relations (one-to-one,
//! one-to-many, many-to-many via pivot tables) with batched eager loading,
//! and exposes a fluent query composer over a pluggable [`Connection`].
//!
//! The SQL driver is a collaborator: this crate speaks SQL text plus
//! parameter arrays through the [`connection::Connection`] trait and consumes
//! generic row mappings back. All wiring is explicit dependency injection;
//! there are no global registries.

pub mod connection;
pub mod error;
pub mod events;
mod loader;
pub mod orm;
pub mod persist;
pub mod query;
pub mod record;
pub mod schema;

#[cfg(test)]
mod tests;

pub use connection::{with_transaction, Connection, Row, WriteOutcome};
pub use error::{OrmError, OrmResult};
pub use events::{EventKind, EventPayload, Handler, HandlerRegistry, LifecycleEvent};
pub use orm::Orm;
pub use query::{Cond, JoinType, OrderDirection, Query, QueryScope, WithSpec};
pub use record::{Record, Related};
pub use schema::{EntitySchema, IndexBy, RelationDef, SchemaRegistry, Via};
