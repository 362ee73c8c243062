//! In-process simulated endpoint
//!
//! `MemoryTransport` behaves like a remote product: it holds values per key,
//! pushes changes to subscribers, runs scripted actions, and can lose and
//! regain its connection. Failure injection hooks (rejected subscriptions,
//! failing or stalled commands) and per-key call counters make it the test
//! double for the store, and the demo host uses it as its product.

use super::{
    ActionStream, ConnectionStatus, RemoteActionEvent, StatusCallback, Transport, ValueStream,
};
use crate::catalog::KeyCatalog;
use crate::error::TransportError;
use crate::key::KeyId;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_stream::StreamExt;
use tracing::{debug, info, trace};

/// Per-key push channel capacity
const CHANNEL_CAPACITY: usize = 256;

/// Scripted behaviour of a simulated action
#[derive(Debug, Clone)]
pub struct ActionScript {
    /// Events emitted in order
    pub steps: Vec<Result<RemoteActionEvent, TransportError>>,
    /// Delay before each step
    pub step_delay: Duration,
    /// Keep the stream open after the last step (an action that never ends)
    pub hold_open: bool,
}

impl ActionScript {
    /// Completes immediately with `result`
    pub fn completes_with(result: Value) -> Self {
        Self {
            steps: vec![Ok(RemoteActionEvent::Completed(result))],
            step_delay: Duration::ZERO,
            hold_open: false,
        }
    }

    /// Reports each progress value, then completes with `result`
    pub fn with_progress(progress: Vec<Value>, result: Value, step_delay: Duration) -> Self {
        let mut steps: Vec<_> = progress
            .into_iter()
            .map(|p| Ok(RemoteActionEvent::Progress(p)))
            .collect();
        steps.push(Ok(RemoteActionEvent::Completed(result)));
        Self {
            steps,
            step_delay,
            hold_open: false,
        }
    }

    /// Fails with `error` after `step_delay`
    pub fn fails(error: TransportError, step_delay: Duration) -> Self {
        Self {
            steps: vec![Err(error)],
            step_delay,
            hold_open: false,
        }
    }

    /// Reports progress and then never finishes
    pub fn never_completes(progress: Vec<Value>, step_delay: Duration) -> Self {
        Self {
            steps: progress
                .into_iter()
                .map(|p| Ok(RemoteActionEvent::Progress(p)))
                .collect(),
            step_delay,
            hold_open: true,
        }
    }
}

/// Simulated product endpoint
pub struct MemoryTransport {
    name: String,
    values: DashMap<KeyId, Value>,
    channels: DashMap<KeyId, broadcast::Sender<Value>>,
    subscribe_calls: DashMap<KeyId, usize>,
    unsubscribe_calls: DashMap<KeyId, usize>,
    rejected: DashMap<KeyId, TransportError>,
    command_failures: DashMap<KeyId, TransportError>,
    stalled: DashSet<KeyId>,
    actions: DashMap<KeyId, ActionScript>,
    last_action_args: DashMap<KeyId, Value>,
    action_calls: AtomicUsize,
    cancelled_actions: Arc<AtomicUsize>,
    status: RwLock<ConnectionStatus>,
    status_callbacks: RwLock<Vec<StatusCallback>>,
}

impl MemoryTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: DashMap::new(),
            channels: DashMap::new(),
            subscribe_calls: DashMap::new(),
            unsubscribe_calls: DashMap::new(),
            rejected: DashMap::new(),
            command_failures: DashMap::new(),
            stalled: DashSet::new(),
            actions: DashMap::new(),
            last_action_args: DashMap::new(),
            action_calls: AtomicUsize::new(0),
            cancelled_actions: Arc::new(AtomicUsize::new(0)),
            status: RwLock::new(ConnectionStatus::Connected),
            status_callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Seed default values for every catalogue key
    ///
    /// Indexed keys are seeded for sub-indices `0..instances`.
    pub fn seed_from_catalog(&self, catalog: &KeyCatalog, instances: u32) {
        let mut seeded = 0;
        for descriptor in catalog.descriptors() {
            let Some(default) = descriptor.default_value() else {
                continue;
            };
            for key in descriptor.key_ids(instances) {
                self.values.insert(key, default.clone());
                seeded += 1;
            }
        }
        debug!(transport = %self.name, seeded, "Seeded simulated values");
    }

    /// Store a value without notifying subscribers
    pub fn seed(&self, key: KeyId, value: Value) {
        self.values.insert(key, value);
    }

    /// Simulate a remote push
    pub fn push(&self, key: &KeyId, value: Value) {
        trace!(%key, %value, "Simulated push");
        self.values.insert(key.clone(), value.clone());
        if let Some(tx) = self.channels.get(key) {
            let _ = tx.send(value);
        }
    }

    /// Current simulated value
    pub fn value(&self, key: &KeyId) -> Option<Value> {
        self.values.get(key).map(|v| v.clone())
    }

    /// Make future subscriptions to `key` fail
    pub fn reject_subscriptions(&self, key: KeyId, error: TransportError) {
        self.rejected.insert(key, error);
    }

    pub fn accept_subscriptions(&self, key: &KeyId) {
        self.rejected.remove(key);
    }

    /// Make get/set/actions on `key` fail
    pub fn fail_commands(&self, key: KeyId, error: TransportError) {
        self.command_failures.insert(key, error);
    }

    /// Make get/set on `key` never answer
    pub fn stall_commands(&self, key: KeyId) {
        self.stalled.insert(key);
    }

    /// Script the action behind `key`
    pub fn register_action(&self, key: KeyId, script: ActionScript) {
        self.actions.insert(key, script);
    }

    /// Drop every live push stream for `key`, as a remote reset would
    pub fn close_subscriptions(&self, key: &KeyId) {
        self.channels.remove(key);
    }

    pub fn subscribe_count(&self, key: &KeyId) -> usize {
        self.subscribe_calls.get(key).map(|c| *c).unwrap_or(0)
    }

    pub fn unsubscribe_count(&self, key: &KeyId) -> usize {
        self.unsubscribe_calls.get(key).map(|c| *c).unwrap_or(0)
    }

    pub fn total_subscribes(&self) -> usize {
        self.subscribe_calls.iter().map(|c| *c.value()).sum()
    }

    pub fn action_calls(&self) -> usize {
        self.action_calls.load(Ordering::SeqCst)
    }

    /// Actions whose consumer went away before the script finished
    pub fn cancelled_actions(&self) -> usize {
        self.cancelled_actions.load(Ordering::SeqCst)
    }

    pub fn last_action_arg(&self, key: &KeyId) -> Option<Value> {
        self.last_action_args.get(key).map(|v| v.clone())
    }

    /// Change connection status and notify subscribers
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        {
            let mut current = self.status.write();
            if *current == status {
                return;
            }
            *current = status.clone();
        }
        info!(transport = %self.name, ?status, "Connection status changed");

        let callbacks = self.status_callbacks.read().clone();
        for callback in callbacks.iter() {
            callback(status.clone());
        }
    }

    pub fn connect(&self) {
        self.set_connection_status(ConnectionStatus::Connected);
    }

    pub fn disconnect(&self) {
        self.set_connection_status(ConnectionStatus::Disconnected);
    }

    /// Simulate a link loss followed by reconnection with backoff
    ///
    /// Emits `Disconnected`, then one `Reconnecting` per attempt with a
    /// growing delay (capped at 30 s), then `Connected`.
    pub fn simulate_link_loss(self: &Arc<Self>, attempts: usize, base_delay: Duration) {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            transport.set_connection_status(ConnectionStatus::Disconnected);
            for attempt in 1..=attempts {
                let delay = std::cmp::min(Duration::from_secs(30), base_delay * attempt as u32);
                debug!(attempt, ?delay, "Simulated reconnect attempt");
                transport.set_connection_status(ConnectionStatus::Reconnecting { attempt });
                tokio::time::sleep(delay).await;
            }
            transport.set_connection_status(ConnectionStatus::Connected);
        });
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.status.read().is_connected() {
            Ok(())
        } else {
            Err(TransportError::disconnected())
        }
    }

    fn command_failure(&self, key: &KeyId) -> Result<(), TransportError> {
        match self.command_failures.get(key) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn wait_if_stalled(&self, key: &KeyId) {
        if self.stalled.contains(key) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, key: &KeyId) -> Result<ValueStream, TransportError> {
        *self.subscribe_calls.entry(key.clone()).or_insert(0) += 1;

        if let Some(err) = self.rejected.get(key) {
            debug!(%key, error = %err.value(), "Simulated subscription rejected");
            return Err(err.clone());
        }

        // Subscribe before reading the current value so nothing pushed in
        // between is lost; a duplicate is suppressed downstream.
        let rx = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let initial = self.value(key);

        debug!(%key, has_value = initial.is_some(), "Simulated subscription opened");

        let updates = BroadcastStream::new(rx).filter_map(|item| item.ok());
        Ok(Box::pin(tokio_stream::iter(initial).chain(updates)))
    }

    fn unsubscribe(&self, key: &KeyId) {
        *self.unsubscribe_calls.entry(key.clone()).or_insert(0) += 1;
        debug!(%key, "Simulated subscription closed");
    }

    async fn get(&self, key: &KeyId) -> Result<Value, TransportError> {
        self.wait_if_stalled(key).await;
        self.ensure_connected()?;
        self.command_failure(key)?;
        self.value(key).ok_or_else(|| TransportError::not_found(key))
    }

    async fn set(&self, key: &KeyId, value: Value) -> Result<(), TransportError> {
        self.wait_if_stalled(key).await;
        self.ensure_connected()?;
        self.command_failure(key)?;
        // The product echoes accepted writes back as a push.
        self.push(key, value);
        Ok(())
    }

    fn invoke_action(&self, key: &KeyId, arg: Value) -> Result<ActionStream, TransportError> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        self.command_failure(key)?;

        let script = self
            .actions
            .get(key)
            .map(|s| s.clone())
            .ok_or_else(|| TransportError::unsupported(key, "actions"))?;
        self.last_action_args.insert(key.clone(), arg);

        let (tx, rx) = mpsc::channel(16);
        let cancelled = Arc::clone(&self.cancelled_actions);
        let key = key.clone();

        tokio::spawn(async move {
            for step in script.steps {
                if !script.step_delay.is_zero() {
                    tokio::time::sleep(script.step_delay).await;
                }
                if tx.send(step).await.is_err() {
                    debug!(%key, "Simulated action abandoned by caller");
                    cancelled.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
            if script.hold_open {
                tx.closed().await;
                debug!(%key, "Simulated open-ended action released");
                cancelled.fetch_add(1, Ordering::SeqCst);
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    fn subscribe_connection_status(&self, callback: StatusCallback) {
        self.status_callbacks.write().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn height_limit() -> KeyId {
        KeyId::new("FlightController", "HeightLimit")
    }

    #[tokio::test]
    async fn test_subscription_replays_value_then_pushes() {
        let transport = MemoryTransport::new("sim");
        transport.seed(height_limit(), json!(120));

        let mut stream = transport.subscribe(&height_limit()).unwrap();
        assert_eq!(stream.next().await, Some(json!(120)));

        transport.push(&height_limit(), json!(150));
        assert_eq!(stream.next().await, Some(json!(150)));
        assert_eq!(transport.subscribe_count(&height_limit()), 1);
    }

    #[tokio::test]
    async fn test_rejected_subscription() {
        let transport = MemoryTransport::new("sim");
        transport.reject_subscriptions(height_limit(), TransportError::new(-3, "no such key"));

        let err = transport.subscribe(&height_limit()).err().unwrap();
        assert_eq!(err.code, -3);
    }

    #[tokio::test]
    async fn test_set_echoes_as_push_and_requires_connection() {
        let transport = MemoryTransport::new("sim");
        let mut stream = transport.subscribe(&height_limit()).unwrap();

        transport.set(&height_limit(), json!(80)).await.unwrap();
        assert_eq!(stream.next().await, Some(json!(80)));
        assert_eq!(transport.get(&height_limit()).await.unwrap(), json!(80));

        transport.disconnect();
        let err = transport.set(&height_limit(), json!(90)).await.unwrap_err();
        assert_eq!(err.code, TransportError::CODE_DISCONNECTED);
    }

    #[tokio::test]
    async fn test_status_callbacks_fire_on_change_only() {
        let transport = MemoryTransport::new("sim");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        transport.subscribe_connection_status(Arc::new(move |status| {
            seen_clone.lock().push(status);
        }));

        transport.disconnect();
        transport.disconnect();
        transport.connect();

        assert_eq!(
            *seen.lock(),
            vec![ConnectionStatus::Disconnected, ConnectionStatus::Connected]
        );
    }

    #[tokio::test]
    async fn test_scripted_action_runs_in_order() {
        let transport = MemoryTransport::new("sim");
        let key = KeyId::new("Camera", "FormatSDCard");
        transport.register_action(
            key.clone(),
            ActionScript::with_progress(vec![json!(50)], json!("done"), Duration::ZERO),
        );

        let events: Vec<_> = transport
            .invoke_action(&key, json!({"index": 0}))
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                Ok(RemoteActionEvent::Progress(json!(50))),
                Ok(RemoteActionEvent::Completed(json!("done"))),
            ]
        );
        assert_eq!(transport.last_action_arg(&key), Some(json!({"index": 0})));
    }

    #[tokio::test]
    async fn test_unknown_action_is_unsupported() {
        let transport = MemoryTransport::new("sim");
        let err = transport
            .invoke_action(&KeyId::new("Camera", "Nope"), Value::Null)
            .err()
            .unwrap();
        assert_eq!(err.code, TransportError::CODE_UNSUPPORTED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_reconnects() {
        let transport = Arc::new(MemoryTransport::new("sim"));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        transport.subscribe_connection_status(Arc::new(move |status| {
            seen_clone.lock().push(status);
        }));

        transport.simulate_link_loss(2, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            *seen.lock(),
            vec![
                ConnectionStatus::Disconnected,
                ConnectionStatus::Reconnecting { attempt: 1 },
                ConnectionStatus::Reconnecting { attempt: 2 },
                ConnectionStatus::Connected,
            ]
        );
    }
}
