//! Event system - lifecycle notifications with cooperative cancellation
//!
//! Listeners run synchronously in registration order. A listener may stop
//! propagation, prevent the wrapped operation's default action, and supply a
//! replacement return value. A listener error aborts dispatch and propagates.

pub mod event;
pub mod registry;

pub use event::{EventKind, EventPayload, LifecycleEvent};
pub use registry::{Handler, HandlerRegistry, HandlerRegistryBuilder};
