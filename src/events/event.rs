//! Lifecycle event kinds and the dispatchable event envelope

use std::fmt;

use serde_json::Value;
use std::collections::HashMap;

use crate::connection::Row;
use crate::query::Query;
use crate::record::Record;

/// Lifecycle notification kinds dispatched around ORM operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeUpsert,
    AfterUpsert,
    BeforePopulate,
    AfterPopulate,
    BeforeCreateQuery,
    AfterCreateQuery,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Mutable payload carried by an event. The dispatch loop hands the same
/// payload instance to every listener in order, so in-place edits are visible
/// to later listeners and to the operation that fired the event.
pub enum EventPayload<'a> {
    None,
    /// Column set about to be written by an insert or update.
    Properties(&'a mut HashMap<String, Value>),
    /// Upsert write sets; `update: None` means skip the on-conflict update.
    Upsert {
        insert: &'a mut HashMap<String, Value>,
        update: &'a mut Option<HashMap<String, Value>>,
    },
    /// Query under construction (create-query events).
    Query(&'a mut Query),
    /// Affected-row count reported by a completed write.
    Affected(u64),
    /// Success flag of a completed operation.
    Success(bool),
    /// Raw row about to be hydrated.
    Row(&'a Row),
}

impl fmt::Debug for EventPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPayload::None => f.write_str("None"),
            EventPayload::Properties(props) => f.debug_tuple("Properties").field(props).finish(),
            EventPayload::Upsert { insert, update } => f
                .debug_struct("Upsert")
                .field("insert", insert)
                .field("update", update)
                .finish(),
            EventPayload::Query(_) => f.write_str("Query(..)"),
            EventPayload::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
            EventPayload::Success(ok) => f.debug_tuple("Success").field(ok).finish(),
            EventPayload::Row(row) => f.debug_tuple("Row").field(row).finish(),
        }
    }
}

/// A lifecycle event in flight: the target record (when one exists), the
/// mutable payload, and the cooperative-cancellation flags.
pub struct LifecycleEvent<'a> {
    pub kind: EventKind,
    pub record: Option<&'a mut Record>,
    pub payload: EventPayload<'a>,
    propagation_stopped: bool,
    default_prevented: bool,
    return_value: Option<Value>,
}

impl<'a> LifecycleEvent<'a> {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            record: None,
            payload: EventPayload::None,
            propagation_stopped: false,
            default_prevented: false,
            return_value: None,
        }
    }

    pub fn with_record(mut self, record: &'a mut Record) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_payload(mut self, payload: EventPayload<'a>) -> Self {
        self.payload = payload;
        self
    }

    /// Halt further listener invocation. Never aborts a write already started.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    /// Skip the operation this event wraps.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Value handed back to the original caller when the default is prevented.
    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = Some(value);
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    pub(crate) fn take_return_value(&mut self) -> Option<Value> {
        self.return_value.take()
    }
}

impl fmt::Debug for LifecycleEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEvent")
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .field("propagation_stopped", &self.propagation_stopped)
            .field("default_prevented", &self.default_prevented)
            .field("return_value", &self.return_value)
            .finish()
    }
}
