//! Widget models - lifecycle-managed consumers of keyed state
//!
//! A widget supplies a [`WidgetLogic`]: which keys it binds and how it turns
//! their current values into an output state. [`WidgetModel`] does the rest:
//! binding through the store, watching the product connection, deriving state
//! one update at a time, and restarting when a selector changes.
//!
//! The model picks the derivation branch: [`WidgetLogic::disconnected`] while
//! the product is away, [`WidgetLogic::derive`] otherwise. A widget cannot
//! forget its disconnected state.

mod model;
mod setup;

#[cfg(test)]
mod tests;

pub use model::WidgetModel;
pub use setup::SetupContext;

use crate::error::StoreClosed;
use crate::key::KeyId;
use crate::processor::{ProcessorId, ProcessorStream, ValueSink};
use crate::store::KeyedStore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Widget-specific part of a model
pub trait WidgetLogic: Send + 'static {
    /// Output state, typically an enum with a disconnected variant
    type State: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Declare bindings; called on setup and on every restart
    fn in_setup(&mut self, ctx: &mut SetupContext);

    /// State while the product is connected
    fn derive(&self) -> Self::State;

    /// State while the product is disconnected
    fn disconnected(&self) -> Self::State;
}

/// Model lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Created,
    Active,
    /// Bindings being replaced; the output stream stays open
    Restarting,
    Inactive,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Active => "active",
            LifecycleState::Restarting => "restarting",
            LifecycleState::Inactive => "inactive",
        };
        f.write_str(name)
    }
}

/// Attach / detach hooks driven by the UI
pub trait Lifecycle {
    /// Bind and start deriving. No-op when already active.
    fn setup(&self);

    /// Unbind and stop deriving. Safe before setup and when repeated.
    fn cleanup(&self);

    /// Rebind with the current selector, keeping output subscribers
    fn restart(&self);

    fn lifecycle(&self) -> LifecycleState;
}

/// Source of a derived state
pub trait StateEmitter<S> {
    /// Latest derived state
    fn current_state(&self) -> S;

    /// Current state, then every change
    fn state_stream(&self) -> ProcessorStream<S>;
}

/// Something processors can be bound to
pub trait Bindable: Send + Sync {
    fn bind_sink(&self, key: KeyId, sink: Arc<dyn ValueSink>) -> Result<(), StoreClosed>;

    fn unbind_sink(&self, key: &KeyId, processor: ProcessorId) -> Result<(), StoreClosed>;
}

impl Bindable for KeyedStore {
    fn bind_sink(&self, key: KeyId, sink: Arc<dyn ValueSink>) -> Result<(), StoreClosed> {
        KeyedStore::bind_sink(self, key, sink)
    }

    fn unbind_sink(&self, key: &KeyId, processor: ProcessorId) -> Result<(), StoreClosed> {
        KeyedStore::unbind_sink(self, key, processor)
    }
}
