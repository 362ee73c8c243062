//! StoreActor - owner of the key to subscription map
//!
//! Every bind, unbind and remote push is a command processed in order by a
//! single task. That task is the only place the subscription map is touched,
//! so concurrent binders never race the push path and there is never more
//! than one live remote subscription per key.
//!
//! ```text
//!  handles ──Bind/Unbind──┐
//!                         ▼
//!  forwarder(key, gen) ──Push──▶ command_rx ──▶ StoreActor ──accept──▶ processors
//!  status callback ─ConnectionChanged─┘           │
//!                                                 └─subscribe/unsubscribe──▶ Transport
//! ```

use super::commands::StoreCommand;
use super::handle::KeyedStore;
use super::types::{StoreOptions, StoreStats, SubscriptionInfo, SubscriptionState};
use crate::error::BindFailure;
use crate::key::KeyId;
use crate::processor::{DataProcessor, ProcessorId, ValueSink};
use crate::transport::{ConnectionStatus, Transport, ValueStream};
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};

/// One remote subscription and everything bound to it
struct SubscriptionRecord {
    sinks: Vec<Arc<dyn ValueSink>>,
    forwarder: Option<JoinHandle<()>>,
    generation: u64,
    state: SubscriptionState,
}

impl SubscriptionRecord {
    fn close_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

pub(crate) struct StoreActor {
    transport: Arc<dyn Transport>,
    options: StoreOptions,

    records: HashMap<KeyId, SubscriptionRecord>,

    /// Last value pushed per open key, shared with handles for synchronous reads
    cache: Arc<DashMap<KeyId, Value>>,

    command_rx: mpsc::UnboundedReceiver<StoreCommand>,

    /// Given to forwarders; weak so they never keep the actor alive
    weak_tx: mpsc::WeakUnboundedSender<StoreCommand>,

    next_generation: u64,
    connected: bool,
    stats: StoreStats,
}

impl StoreActor {
    /// Spawn the actor and return a handle to it
    pub(crate) fn spawn(transport: Arc<dyn Transport>, options: StoreOptions) -> KeyedStore {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(DashMap::new());

        let connection = DataProcessor::new(false);

        // The transport keeps the callback for its whole life; it must only
        // hold weak references to the store.
        let weak_tx = cmd_tx.downgrade();
        let callback_connection = connection.clone();
        transport.subscribe_connection_status(Arc::new(move |status: ConnectionStatus| {
            let connected = status.is_connected();
            if callback_connection.on_next(connected) {
                if let Some(tx) = weak_tx.upgrade() {
                    let _ = tx.send(StoreCommand::ConnectionChanged { connected });
                }
            }
        }));

        // Read only once the callback is in place so no flip goes unseen
        connection.on_next(transport.connection_status().is_connected());
        let connected = connection.value();

        let actor = StoreActor {
            transport: Arc::clone(&transport),
            options: options.clone(),
            records: HashMap::new(),
            cache: Arc::clone(&cache),
            command_rx: cmd_rx,
            weak_tx: cmd_tx.downgrade(),
            next_generation: 1,
            connected,
            stats: StoreStats::default(),
        };

        tokio::spawn(actor.run());

        info!(
            transport = transport.name(),
            connected, "KeyedStore spawned"
        );

        KeyedStore::new(cmd_tx, cache, transport, connection, options)
    }

    async fn run(mut self) {
        debug!("KeyedStore run loop started");

        while let Some(cmd) = self.command_rx.recv().await {
            trace!(?cmd, "Processing command");

            match cmd {
                StoreCommand::Bind {
                    key,
                    sink,
                    response,
                } => {
                    self.handle_bind(key, sink);
                    if let Some(response) = response {
                        let _ = response.send(());
                    }
                }
                StoreCommand::Unbind {
                    key,
                    processor,
                    response,
                } => {
                    let removed = self.handle_unbind(&key, processor);
                    if let Some(response) = response {
                        let _ = response.send(removed);
                    }
                }
                StoreCommand::Push {
                    key,
                    generation,
                    value,
                } => {
                    self.handle_push(&key, generation, value);
                }
                StoreCommand::StreamEnded { key, generation } => {
                    self.handle_stream_ended(&key, generation);
                }
                StoreCommand::ConnectionChanged { connected } => {
                    self.handle_connection_changed(connected);
                }
                StoreCommand::Stats { response } => {
                    let _ = response.send(self.snapshot_stats());
                }
                StoreCommand::ListSubscriptions { response } => {
                    let _ = response.send(self.list_subscriptions());
                }
                StoreCommand::Shutdown => {
                    info!("KeyedStore received shutdown command");
                    break;
                }
            }
        }

        self.close_all();
        info!(
            pushes = self.stats.pushes_received,
            "KeyedStore run loop terminated"
        );
    }

    fn handle_bind(&mut self, key: KeyId, sink: Arc<dyn ValueSink>) {
        self.stats.bindings += 1;

        let failed = self
            .records
            .get(&key)
            .is_some_and(|r| r.state == SubscriptionState::Failed);
        if failed {
            // No live subscription behind this record: try again for everyone bound
            if let Some(mut record) = self.records.remove(&key) {
                record.sinks.push(sink);
                self.stats.resubscriptions += 1;
                debug!(%key, bindings = record.sinks.len(), "Retrying failed subscription");
                self.open(&key, &mut record);
                self.records.insert(key, record);
            }
            return;
        }

        if let Some(record) = self.records.get_mut(&key) {
            // Late binder: catch up with the last pushed value
            if let Some(value) = self.cache.get(&key) {
                if let Err(source) = sink.accept(value.value()) {
                    self.stats.decode_failures += 1;
                    warn!("{}", BindFailure::Decode { key: key.clone(), source });
                }
            }
            record.sinks.push(sink);
            debug!(%key, bindings = record.sinks.len(), "Reusing subscription");
            return;
        }

        let mut record = SubscriptionRecord {
            sinks: vec![sink],
            forwarder: None,
            generation: 0,
            state: SubscriptionState::Failed,
        };
        self.open(&key, &mut record);
        self.records.insert(key, record);
    }

    /// Open the remote subscription for a record under a fresh generation
    ///
    /// A value the transport already holds is delivered before returning, so
    /// a confirmed bind has caught up with the remote.
    fn open(&mut self, key: &KeyId, record: &mut SubscriptionRecord) {
        let generation = self.next_generation;
        self.next_generation += 1;
        record.generation = generation;

        let mut stream = match self.transport.subscribe(key) {
            Ok(stream) => stream,
            Err(source) => {
                record.state = SubscriptionState::Failed;
                self.stats.bind_failures += 1;
                warn!(
                    "{}",
                    BindFailure::Rejected {
                        key: key.clone(),
                        source
                    }
                );
                return;
            }
        };

        // Whatever the stream holds right now; the forwarder waits for the rest
        match stream.next().now_or_never() {
            Some(Some(value)) => {
                self.stats.pushes_received += 1;
                trace!(%key, %value, "Initial value");
                if fan_out(&mut self.stats, key, &record.sinks, &value) {
                    self.stats.pushes_delivered += 1;
                }
                self.cache.insert(key.clone(), value);
            }
            Some(None) => {
                record.state = SubscriptionState::Failed;
                warn!(%key, generation, "Remote ended subscription on open");
                return;
            }
            None => {}
        }

        record.forwarder = Some(self.spawn_forwarder(key.clone(), generation, stream));
        record.state = SubscriptionState::Live;
        debug!(%key, generation, "Subscription opened");
    }

    fn spawn_forwarder(&self, key: KeyId, generation: u64, mut stream: ValueStream) -> JoinHandle<()> {
        let weak_tx = self.weak_tx.clone();
        tokio::spawn(async move {
            while let Some(value) = stream.next().await {
                let Some(tx) = weak_tx.upgrade() else {
                    return;
                };
                let push = StoreCommand::Push {
                    key: key.clone(),
                    generation,
                    value,
                };
                if tx.send(push).is_err() {
                    return;
                }
            }
            if let Some(tx) = weak_tx.upgrade() {
                let _ = tx.send(StoreCommand::StreamEnded { key, generation });
            }
        })
    }

    fn handle_unbind(&mut self, key: &KeyId, processor: ProcessorId) -> bool {
        let Some(record) = self.records.get_mut(key) else {
            trace!(%key, %processor, "Unbind for unknown key");
            return false;
        };
        let Some(position) = record.sinks.iter().position(|s| s.id() == processor) else {
            trace!(%key, %processor, "Unbind for unknown processor");
            return false;
        };

        record.sinks.remove(position);
        self.stats.bindings = self.stats.bindings.saturating_sub(1);

        if record.sinks.is_empty() {
            if let Some(mut record) = self.records.remove(key) {
                record.close_forwarder();
                if record.state == SubscriptionState::Live {
                    self.transport.unsubscribe(key);
                }
            }
            self.cache.remove(key);
            debug!(%key, "Subscription closed");
        } else {
            debug!(%key, bindings = record.sinks.len(), "Binding removed");
        }
        true
    }

    fn handle_push(&mut self, key: &KeyId, generation: u64, value: Value) {
        self.stats.pushes_received += 1;

        let Some(record) = self.records.get(key) else {
            self.stats.stale_pushes += 1;
            trace!(%key, generation, "Push for closed subscription discarded");
            return;
        };
        if record.generation != generation {
            self.stats.stale_pushes += 1;
            trace!(%key, generation, current = record.generation, "Push from replaced subscription discarded");
            return;
        }

        trace!(%key, %value, "Push");
        if fan_out(&mut self.stats, key, &record.sinks, &value) {
            self.stats.pushes_delivered += 1;
        }
        self.cache.insert(key.clone(), value);
    }

    fn handle_stream_ended(&mut self, key: &KeyId, generation: u64) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        if record.generation != generation || record.state != SubscriptionState::Live {
            return;
        }

        record.forwarder = None;
        record.state = SubscriptionState::Failed;
        warn!(%key, generation, "Remote ended subscription; bindings kept until reconnect");
    }

    fn handle_connection_changed(&mut self, connected: bool) {
        let was_connected = self.connected;
        self.connected = connected;
        info!(connected, "Product connection changed");

        if !connected || was_connected || !self.options.resubscribe_on_reconnect {
            return;
        }

        let failed: Vec<KeyId> = self
            .records
            .iter()
            .filter(|(_, r)| r.state == SubscriptionState::Failed)
            .map(|(k, _)| k.clone())
            .collect();

        for key in failed {
            // Take the record out so `open` can borrow the actor mutably
            if let Some(mut record) = self.records.remove(&key) {
                self.stats.resubscriptions += 1;
                self.open(&key, &mut record);
                self.records.insert(key, record);
            }
        }
    }

    fn snapshot_stats(&self) -> StoreStats {
        let live = self
            .records
            .values()
            .filter(|r| r.state == SubscriptionState::Live)
            .count();
        StoreStats {
            live_subscriptions: live,
            failed_subscriptions: self.records.len() - live,
            ..self.stats.clone()
        }
    }

    fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut list: Vec<_> = self
            .records
            .iter()
            .map(|(key, record)| SubscriptionInfo {
                key: key.clone(),
                state: record.state,
                bindings: record.sinks.len(),
                generation: record.generation,
            })
            .collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        list
    }

    fn close_all(&mut self) {
        for (key, mut record) in self.records.drain() {
            record.close_forwarder();
            if record.state == SubscriptionState::Live {
                self.transport.unsubscribe(&key);
            }
        }
        self.cache.clear();
    }
}

/// Offer a wire value to every sink; returns whether any processor changed
fn fan_out(stats: &mut StoreStats, key: &KeyId, sinks: &[Arc<dyn ValueSink>], value: &Value) -> bool {
    let mut changed = false;
    for sink in sinks {
        match sink.accept(value) {
            Ok(notified) => changed |= notified,
            Err(source) => {
                stats.decode_failures += 1;
                warn!(
                    processor = %sink.id(),
                    "{}",
                    BindFailure::Decode {
                        key: key.clone(),
                        source
                    }
                );
            }
        }
    }
    changed
}
