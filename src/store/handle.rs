//! KeyedStore - public handle to the store actor
//!
//! Cheap to clone; every widget model holds one. Binding methods are
//! fire-and-forget and never block. Commands go straight to the transport
//! and resolve through the action bridge.

use super::actor::StoreActor;
use super::commands::StoreCommand;
use super::types::{StoreOptions, StoreStats, SubscriptionInfo};
use crate::action::{self, ActionProgress, ActionTicket};
use crate::error::{CommandError, StoreClosed};
use crate::key::{Key, KeyId, KeyValue};
use crate::processor::{DataProcessor, ProcessorId, ValueSink};
use crate::transport::Transport;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Handle for binding processors to keys and issuing commands
///
/// # Bindings (fire-and-forget)
/// - `bind` / `bind_sink` - register a processor for a key
/// - `unbind` / `unbind_sink` - remove it again
///
/// # Reads
/// - `get_value` - synchronous snapshot of the last pushed value
/// - `get_value_async` - ask the remote
///
/// # Commands (one terminal outcome each)
/// - `set_value`, `perform_action`, `perform_action_with_progress`
#[derive(Clone)]
pub struct KeyedStore {
    cmd_tx: mpsc::UnboundedSender<StoreCommand>,
    cache: Arc<DashMap<KeyId, Value>>,
    transport: Arc<dyn Transport>,
    connection: DataProcessor<bool>,
    options: StoreOptions,
}

impl KeyedStore {
    pub(crate) fn new(
        cmd_tx: mpsc::UnboundedSender<StoreCommand>,
        cache: Arc<DashMap<KeyId, Value>>,
        transport: Arc<dyn Transport>,
        connection: DataProcessor<bool>,
        options: StoreOptions,
    ) -> Self {
        Self {
            cmd_tx,
            cache,
            transport,
            connection,
            options,
        }
    }

    /// Spawn a store over `transport`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(transport: Arc<dyn Transport>, options: StoreOptions) -> Self {
        StoreActor::spawn(transport, options)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    /// Bind a processor to a key
    ///
    /// The first binding for a key opens the remote subscription. A failed
    /// open is logged and leaves the processor at its current value.
    pub fn bind<T: KeyValue>(&self, key: &Key<T>, processor: &DataProcessor<T>) -> Result<(), StoreClosed> {
        self.bind_sink(key.id().clone(), Arc::new(processor.clone()))
    }

    /// Bind a type-erased sink
    pub fn bind_sink(&self, key: KeyId, sink: Arc<dyn ValueSink>) -> Result<(), StoreClosed> {
        trace!(%key, processor = %sink.id(), "Bind");
        self.send(StoreCommand::Bind {
            key,
            sink,
            response: None,
        })
    }

    /// Bind and wait until the store registered the binding
    pub async fn bind_sink_confirmed(&self, key: KeyId, sink: Arc<dyn ValueSink>) -> Result<(), StoreClosed> {
        self.bind_sink_acked(key, sink)?.await.map_err(|_| StoreClosed)
    }

    /// Bind now; the receiver resolves once the binding has caught up with
    /// the cached or immediately available remote value
    pub fn bind_sink_acked(
        &self,
        key: KeyId,
        sink: Arc<dyn ValueSink>,
    ) -> Result<oneshot::Receiver<()>, StoreClosed> {
        trace!(%key, processor = %sink.id(), "Bind (acked)");
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::Bind {
            key,
            sink,
            response: Some(tx),
        })?;
        Ok(rx)
    }

    /// Remove a binding; the last one closes the remote subscription
    pub fn unbind<T: KeyValue>(&self, key: &Key<T>, processor: &DataProcessor<T>) -> Result<(), StoreClosed> {
        self.unbind_sink(key.id(), processor.id())
    }

    pub fn unbind_sink(&self, key: &KeyId, processor: ProcessorId) -> Result<(), StoreClosed> {
        trace!(%key, %processor, "Unbind");
        self.send(StoreCommand::Unbind {
            key: key.clone(),
            processor,
            response: None,
        })
    }

    /// Remove a binding and report whether it existed
    pub async fn unbind_confirmed(&self, key: &KeyId, processor: ProcessorId) -> Result<bool, StoreClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::Unbind {
            key: key.clone(),
            processor,
            response: Some(tx),
        })?;
        rx.await.map_err(|_| StoreClosed)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Last value pushed for a bound key
    ///
    /// `None` when nothing is bound, nothing arrived yet, or the value does
    /// not decode as `T`.
    pub fn get_value<T: KeyValue>(&self, key: &Key<T>) -> Option<T> {
        let value = self.cache.get(key.id())?;
        T::deserialize(value.value()).ok()
    }

    /// Untyped variant of [`KeyedStore::get_value`]
    pub fn get_raw(&self, key: &KeyId) -> Option<Value> {
        self.cache.get(key).map(|v| v.value().clone())
    }

    /// Read the current value from the remote
    pub async fn get_value_async<T: KeyValue>(&self, key: &Key<T>) -> Result<T, CommandError> {
        self.get_remote(key.id()).await
    }

    /// Read any decodable value from the remote
    pub async fn get_remote<R: DeserializeOwned>(&self, key: &KeyId) -> Result<R, CommandError> {
        self.ensure_alive()?;
        action::get(self.transport.as_ref(), key, self.options.command_timeout).await
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Write a value
    pub fn set_value<T: KeyValue>(&self, key: &Key<T>, value: T) -> ActionTicket<()> {
        match serde_json::to_value(&value) {
            Ok(value) => self.set_raw(key.id(), value),
            Err(e) => ActionTicket::ready(key.id().clone(), Err(CommandError::decode(key.id(), e))),
        }
    }

    /// Write an already encoded value
    pub fn set_raw(&self, key: &KeyId, value: Value) -> ActionTicket<()> {
        if let Err(err) = self.ensure_alive() {
            return ActionTicket::ready(key.clone(), Err(err));
        }
        debug!(%key, %value, "Set value");
        action::set(
            Arc::clone(&self.transport),
            key.clone(),
            value,
            self.options.command_timeout,
        )
    }

    /// Invoke an action and resolve to its result
    pub fn perform_action<A, R>(&self, key: &Key<R>, arg: A) -> ActionTicket<R>
    where
        A: Serialize,
        R: KeyValue,
    {
        match serde_json::to_value(arg) {
            Ok(arg) => self.perform_action_raw(key.id(), arg),
            Err(e) => ActionTicket::ready(key.id().clone(), Err(CommandError::decode(key.id(), e))),
        }
    }

    /// Invoke an action with an already encoded argument
    pub fn perform_action_raw<R>(&self, key: &KeyId, arg: Value) -> ActionTicket<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        if let Err(err) = self.ensure_alive() {
            return ActionTicket::ready(key.clone(), Err(err));
        }
        debug!(%key, %arg, "Perform action");
        action::perform(
            Arc::clone(&self.transport),
            key.clone(),
            arg,
            self.options.action_timeout,
        )
    }

    /// Invoke an action and stream its progress
    pub fn perform_action_with_progress<A, R>(&self, key: &Key<R>, arg: A) -> ActionProgress<R>
    where
        A: Serialize,
        R: KeyValue,
    {
        let arg = match serde_json::to_value(arg) {
            Ok(arg) => arg,
            Err(e) => return ActionProgress::failed(key.id().clone(), CommandError::decode(key.id(), e)),
        };
        if let Err(err) = self.ensure_alive() {
            return ActionProgress::failed(key.id().clone(), err);
        }
        debug!(key = %key.id(), %arg, "Perform action with progress");
        action::perform_with_progress(
            Arc::clone(&self.transport),
            key.id().clone(),
            arg,
            self.options.action_timeout,
        )
    }

    // =========================================================================
    // Connection and diagnostics
    // =========================================================================

    /// Process-wide product connection signal
    pub fn connection(&self) -> DataProcessor<bool> {
        self.connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.value()
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::Stats { response: tx })?;
        rx.await.map_err(|_| StoreClosed)
    }

    /// Open subscriptions, sorted by key
    pub async fn subscriptions(&self) -> Result<Vec<SubscriptionInfo>, StoreClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::ListSubscriptions { response: tx })?;
        rx.await.map_err(|_| StoreClosed)
    }

    /// Close every subscription and stop the actor
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(StoreCommand::Shutdown);
    }

    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    fn send(&self, cmd: StoreCommand) -> Result<(), StoreClosed> {
        self.cmd_tx.send(cmd).map_err(|_| StoreClosed)
    }

    fn ensure_alive(&self) -> Result<(), CommandError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(StoreClosed.into())
        }
    }
}
