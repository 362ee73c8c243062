//! WidgetModel - bindings, connection watch and serialized derivation
//!
//! Derivation runs under the logic lock, so `update_states` never overlaps
//! itself no matter which task a change came from. Each activation gets a run
//! number; teardown bumps it under the same lock, which silences a deriver
//! that is still winding down.

use super::{Bindable, Lifecycle, LifecycleState, SetupContext, StateEmitter, WidgetLogic};
use crate::key::KeyId;
use crate::processor::{ChangeStream, DataProcessor, ProcessorStream, ValueSink};
use crate::store::KeyedStore;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, trace, warn};

/// When an activation derives its first state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Derivation {
    Now,
    AfterCatchUp,
}

/// Change source feeding the deriver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Trigger {
    Connection,
    Binding(usize),
}

struct Activation {
    lifecycle: LifecycleState,
    bindings: Vec<(KeyId, Arc<dyn ValueSink>)>,
    deriver: Option<JoinHandle<()>>,
}

struct Inner<L: WidgetLogic> {
    name: String,
    store: KeyedStore,
    connection: DataProcessor<bool>,
    logic: Mutex<L>,
    output: DataProcessor<L::State>,
    run: AtomicU64,
    updates: AtomicU64,
}

impl<L: WidgetLogic> Inner<L> {
    /// Derive and publish; returns whether the output changed
    fn update_states(&self, run: u64) -> bool {
        let logic = self.logic.lock();
        if self.run.load(Ordering::SeqCst) != run {
            return false;
        }

        let state = if self.connection.value() {
            logic.derive()
        } else {
            logic.disconnected()
        };
        self.updates.fetch_add(1, Ordering::Relaxed);
        trace!(widget = %self.name, ?state, "Derived state");
        self.output.on_next(state)
    }
}

/// Lifecycle-managed widget model
///
/// Dropping an active model unbinds everything (fire-and-forget).
pub struct WidgetModel<L: WidgetLogic> {
    inner: Arc<Inner<L>>,
    activation: Mutex<Activation>,
}

impl<L: WidgetLogic> WidgetModel<L> {
    /// Create an inactive model; call [`Lifecycle::setup`] to start it
    pub fn new(name: impl Into<String>, store: KeyedStore, logic: L) -> Self {
        let output = DataProcessor::new(logic.disconnected());
        let connection = store.connection();
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                store,
                connection,
                logic: Mutex::new(logic),
                output,
                run: AtomicU64::new(0),
                updates: AtomicU64::new(0),
            }),
            activation: Mutex::new(Activation {
                lifecycle: LifecycleState::Created,
                bindings: Vec::new(),
                deriver: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn store(&self) -> &KeyedStore {
        &self.inner.store
    }

    /// Number of derivations so far
    pub fn update_count(&self) -> u64 {
        self.inner.updates.load(Ordering::Relaxed)
    }

    /// Keys currently bound
    pub fn bound_keys(&self) -> Vec<KeyId> {
        self.activation
            .lock()
            .bindings
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Read the widget logic
    pub fn with_logic<R>(&self, f: impl FnOnce(&L) -> R) -> R {
        f(&self.inner.logic.lock())
    }

    /// Re-derive now, outside of any change notification
    pub fn update_states(&self) -> bool {
        let activation = self.activation.lock();
        if activation.lifecycle != LifecycleState::Active {
            return false;
        }
        self.inner.update_states(self.inner.run.load(Ordering::SeqCst))
    }

    /// Change the widget logic (typically a selector) and rebind
    ///
    /// Subscribers of the output stream are kept. On an inactive model the
    /// change is applied and takes effect at the next setup.
    pub fn restart_with(&self, f: impl FnOnce(&mut L)) {
        let mut activation = self.activation.lock();
        if activation.lifecycle != LifecycleState::Active {
            f(&mut self.inner.logic.lock());
            return;
        }

        debug!(widget = %self.inner.name, "Restarting");
        activation.lifecycle = LifecycleState::Restarting;
        self.deactivate(&mut activation);
        f(&mut self.inner.logic.lock());
        self.activate(&mut activation, Derivation::AfterCatchUp);
    }

    fn activate(&self, activation: &mut MutexGuard<'_, Activation>, first: Derivation) {
        let run = {
            let mut logic = self.inner.logic.lock();
            let run = self.inner.run.fetch_add(1, Ordering::SeqCst) + 1;
            let mut ctx = SetupContext::new();
            logic.in_setup(&mut ctx);
            activation.bindings = ctx.into_bindings();
            run
        };

        let mut acks = Vec::with_capacity(activation.bindings.len());
        for (key, sink) in &activation.bindings {
            match self.inner.store.bind_sink_acked(key.clone(), Arc::clone(sink)) {
                Ok(ack) => acks.push(ack),
                Err(e) => warn!(widget = %self.inner.name, %key, "Binding skipped: {}", e),
            }
        }

        let mut changes: StreamMap<Trigger, ChangeStream> = StreamMap::new();
        changes.insert(Trigger::Connection, ValueSink::changes(&self.inner.connection));
        for (i, (_, sink)) in activation.bindings.iter().enumerate() {
            changes.insert(Trigger::Binding(i), sink.changes());
        }

        activation.lifecycle = LifecycleState::Active;
        let acks = match first {
            Derivation::Now => {
                self.inner.update_states(run);
                Vec::new()
            }
            // Fresh processors hold defaults until the store has caught them up
            Derivation::AfterCatchUp => acks,
        };
        activation.deriver = Some(tokio::spawn(derive_loop(
            Arc::downgrade(&self.inner),
            run,
            acks,
            changes,
        )));

        info!(
            widget = %self.inner.name,
            bindings = activation.bindings.len(),
            "Widget active"
        );
    }

    fn deactivate(&self, activation: &mut MutexGuard<'_, Activation>) {
        {
            // Taking the logic lock waits out a derivation in progress
            let _logic = self.inner.logic.lock();
            self.inner.run.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(deriver) = activation.deriver.take() {
            deriver.abort();
        }
        for (key, sink) in activation.bindings.drain(..) {
            if let Err(e) = Bindable::unbind_sink(&self.inner.store, &key, sink.id()) {
                trace!(widget = %self.inner.name, %key, "Unbind skipped: {}", e);
            }
        }
    }
}

async fn derive_loop<L: WidgetLogic>(
    inner: Weak<Inner<L>>,
    run: u64,
    acks: Vec<oneshot::Receiver<()>>,
    mut changes: StreamMap<Trigger, ChangeStream>,
) {
    if !acks.is_empty() {
        for ack in acks {
            // Dropped when the store is gone
            let _ = ack.await;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        trace!(widget = %inner.name, "Bindings caught up");
        inner.update_states(run);
    }

    while let Some((trigger, ())) = changes.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.run.load(Ordering::SeqCst) != run {
            return;
        }
        trace!(widget = %inner.name, ?trigger, "Input changed");
        inner.update_states(run);
    }
}

impl<L: WidgetLogic> Lifecycle for WidgetModel<L> {
    fn setup(&self) {
        let mut activation = self.activation.lock();
        if activation.lifecycle == LifecycleState::Active {
            trace!(widget = %self.inner.name, "Already active");
            return;
        }
        self.activate(&mut activation, Derivation::Now);
    }

    fn cleanup(&self) {
        let mut activation = self.activation.lock();
        let lifecycle = activation.lifecycle;
        match lifecycle {
            LifecycleState::Inactive => return,
            LifecycleState::Created => {}
            LifecycleState::Active | LifecycleState::Restarting => self.deactivate(&mut activation),
        }
        activation.lifecycle = LifecycleState::Inactive;
        info!(widget = %self.inner.name, "Widget inactive");
    }

    fn restart(&self) {
        self.restart_with(|_| {});
    }

    fn lifecycle(&self) -> LifecycleState {
        self.activation.lock().lifecycle
    }
}

impl<L: WidgetLogic> StateEmitter<L::State> for WidgetModel<L> {
    fn current_state(&self) -> L::State {
        self.inner.output.value()
    }

    fn state_stream(&self) -> ProcessorStream<L::State> {
        self.inner.output.to_stream()
    }
}

impl<L: WidgetLogic> Drop for WidgetModel<L> {
    fn drop(&mut self) {
        let activation = self.activation.get_mut();
        if matches!(
            activation.lifecycle,
            LifecycleState::Active | LifecycleState::Restarting
        ) {
            self.cleanup();
        }
    }
}
