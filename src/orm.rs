//! ORM façade - constructor-injected collaborators and event dispatch
//!
//! All lookup goes through explicitly injected state: the schema registry,
//! the handler registry, and the connection. Nothing is resolved through
//! global statics.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::connection::Connection;
use crate::error::OrmResult;
use crate::events::{EventKind, EventPayload, Handler, HandlerRegistry, LifecycleEvent};
use crate::query::Query;
use crate::record::Record;
use crate::schema::SchemaRegistry;

/// Entry point handle bundling the registry, listeners, and connection.
pub struct Orm {
    registry: Arc<SchemaRegistry>,
    handlers: Arc<HandlerRegistry>,
    conn: Arc<dyn Connection>,
    /// Listener lists resolved per (entity, kind), populated lazily on first
    /// dispatch and read-only for the process lifetime afterwards.
    listener_cache: DashMap<(String, EventKind), Arc<Vec<Handler>>>,
}

impl Orm {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        handlers: Arc<HandlerRegistry>,
        conn: Arc<dyn Connection>,
    ) -> Self {
        Self {
            registry,
            handlers,
            conn,
            listener_cache: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    /// Fresh, unsaved record for an entity type.
    pub fn new_record(&self, entity: &str) -> OrmResult<Record> {
        Ok(Record::new(self.registry.get(entity)?))
    }

    /// Build a query composer for an entity, wrapped in the create-query
    /// events. Listeners may mutate the query through the payload;
    /// preventing the default suppresses the after-event.
    pub fn find(&self, entity: &str) -> OrmResult<Query> {
        self.registry.get(entity)?;
        let mut query = Query::new(entity);
        let mut before = LifecycleEvent::new(EventKind::BeforeCreateQuery)
            .with_payload(EventPayload::Query(&mut query));
        self.dispatch(entity, &mut before)?;
        let prevented = before.is_default_prevented();
        drop(before);
        if !prevented {
            let mut after = LifecycleEvent::new(EventKind::AfterCreateQuery)
                .with_payload(EventPayload::Query(&mut query));
            self.dispatch(entity, &mut after)?;
        }
        Ok(query)
    }

    /// Invoke all listeners for the event's kind in registration order,
    /// stopping on `stop_propagation`. A listener error aborts dispatch and
    /// propagates to the caller of the wrapped operation.
    pub fn dispatch(&self, entity: &str, event: &mut LifecycleEvent<'_>) -> OrmResult<()> {
        let handlers = self.listeners(entity, event.kind);
        for handler in handlers.iter() {
            handler(self, event)?;
            if event.is_propagation_stopped() {
                trace!(entity = %entity, kind = %event.kind, "propagation stopped");
                break;
            }
        }
        Ok(())
    }

    fn listeners(&self, entity: &str, kind: EventKind) -> Arc<Vec<Handler>> {
        let key = (entity.to_string(), kind);
        if let Some(cached) = self.listener_cache.get(&key) {
            return Arc::clone(&cached);
        }
        let resolved = Arc::new(self.handlers.resolve(entity, kind));
        self.listener_cache.insert(key, Arc::clone(&resolved));
        resolved
    }
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm")
            .field("driver", &self.conn.driver_name())
            .finish_non_exhaustive()
    }
}
