//! Listener registration - explicit, ordered, per entity type
//!
//! Handlers are registered through a builder at startup; registration order
//! is dispatch order, which determines whose `prevent_default`/`return_value`
//! wins when several listeners apply.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::OrmResult;
use crate::events::event::{EventKind, LifecycleEvent};
use crate::orm::Orm;

/// A lifecycle listener. Receives the ORM handle so it can issue its own
/// operations (e.g. a soft-delete handler turning a delete into an update).
pub type Handler = Arc<dyn Fn(&Orm, &mut LifecycleEvent<'_>) -> OrmResult<()> + Send + Sync>;

struct Registration {
    kinds: Vec<EventKind>,
    handler: Handler,
}

/// Ordered listener registrations keyed by entity type.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Vec<Registration>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            registry: HandlerRegistry::default(),
        }
    }

    /// Listeners for one (entity, kind) pair, in registration order.
    pub(crate) fn resolve(&self, entity: &str, kind: EventKind) -> Vec<Handler> {
        self.entries
            .get(entity)
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|r| r.kinds.contains(&kind))
                    .map(|r| Arc::clone(&r.handler))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .entries
            .iter()
            .map(|(entity, regs)| (entity.as_str(), regs.len()))
            .collect();
        f.debug_struct("HandlerRegistry").field("entries", &counts).finish()
    }
}

/// Builder for [`HandlerRegistry`].
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Register `handler` for one or more event kinds on an entity type.
    pub fn on<F>(mut self, entity: &str, kinds: &[EventKind], handler: F) -> Self
    where
        F: Fn(&Orm, &mut LifecycleEvent<'_>) -> OrmResult<()> + Send + Sync + 'static,
    {
        self.registry
            .entries
            .entry(entity.to_string())
            .or_default()
            .push(Registration {
                kinds: kinds.to_vec(),
                handler: Arc::new(handler),
            });
        self
    }

    pub fn build(self) -> HandlerRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_filters_by_kind_and_keeps_registration_order() {
        let registry = HandlerRegistry::builder()
            .on("order", &[EventKind::BeforeInsert, EventKind::BeforeUpdate], |_, _| Ok(()))
            .on("order", &[EventKind::BeforeInsert], |_, _| Ok(()))
            .on("customer", &[EventKind::BeforeInsert], |_, _| Ok(()))
            .build();

        assert_eq!(registry.resolve("order", EventKind::BeforeInsert).len(), 2);
        assert_eq!(registry.resolve("order", EventKind::BeforeUpdate).len(), 1);
        assert_eq!(registry.resolve("order", EventKind::BeforeDelete).len(), 0);
        assert_eq!(registry.resolve("invoice", EventKind::BeforeInsert).len(), 0);
    }
}
