//! Command enum for the store actor
//!
//! Binding changes and remote pushes share one channel, so the actor sees
//! them in a single order and the subscription map never needs a lock.

use super::types::{StoreStats, SubscriptionInfo};
use crate::key::KeyId;
use crate::processor::{ProcessorId, ValueSink};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) enum StoreCommand {
    // -------------------------------------------------------------------------
    // Bindings (fire and forget, optional acknowledgment)
    // -------------------------------------------------------------------------
    /// Register a processor for a key, opening the remote subscription if
    /// this is the first binding
    Bind {
        key: KeyId,
        sink: Arc<dyn ValueSink>,
        response: Option<oneshot::Sender<()>>,
    },

    /// Remove one binding; the last one closes the remote subscription
    Unbind {
        key: KeyId,
        processor: ProcessorId,
        /// Receives whether a binding was removed
        response: Option<oneshot::Sender<bool>>,
    },

    // -------------------------------------------------------------------------
    // Remote events (sent by forwarder tasks and the status callback)
    // -------------------------------------------------------------------------
    /// Value pushed by the remote on subscription `generation`
    Push {
        key: KeyId,
        generation: u64,
        value: Value,
    },

    /// Remote stream of subscription `generation` ended
    StreamEnded { key: KeyId, generation: u64 },

    /// Product connection flipped
    ConnectionChanged { connected: bool },

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------
    Stats {
        response: oneshot::Sender<StoreStats>,
    },

    ListSubscriptions {
        response: oneshot::Sender<Vec<SubscriptionInfo>>,
    },

    /// Close every subscription and stop the actor
    Shutdown,
}

impl fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreCommand::Bind { key, sink, .. } => f
                .debug_struct("Bind")
                .field("key", key)
                .field("processor", &sink.id())
                .finish(),
            StoreCommand::Unbind { key, processor, .. } => f
                .debug_struct("Unbind")
                .field("key", key)
                .field("processor", processor)
                .finish(),
            StoreCommand::Push {
                key,
                generation,
                value,
            } => f
                .debug_struct("Push")
                .field("key", key)
                .field("generation", generation)
                .field("value", value)
                .finish(),
            StoreCommand::StreamEnded { key, generation } => f
                .debug_struct("StreamEnded")
                .field("key", key)
                .field("generation", generation)
                .finish(),
            StoreCommand::ConnectionChanged { connected } => f
                .debug_struct("ConnectionChanged")
                .field("connected", connected)
                .finish(),
            StoreCommand::Stats { .. } => f.write_str("Stats"),
            StoreCommand::ListSubscriptions { .. } => f.write_str("ListSubscriptions"),
            StoreCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}
