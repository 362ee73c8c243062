//! Transports - the remote (or local) key-value endpoints behind the store
//!
//! The store only ever talks to a [`Transport`]. Values cross this boundary
//! as JSON; decoding into typed values happens in processors and commands.

use crate::error::TransportError;
use crate::key::KeyId;
use async_trait::async_trait;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

pub mod memory;
pub mod preferences;
pub mod routing;

pub use memory::{ActionScript, MemoryTransport};
pub use preferences::PreferenceTransport;
pub use routing::DomainRouter;

/// Values pushed by the remote for one subscription
pub type ValueStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// Events produced by one remote action invocation
pub type ActionStream = Pin<Box<dyn Stream<Item = Result<RemoteActionEvent, TransportError>> + Send>>;

/// One event of a remote action
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteActionEvent {
    /// Intermediate progress (percentage, stage name, ...)
    Progress(Value),
    /// Terminal result
    Completed(Value),
}

/// Connection status of a transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    /// Product is connected and operational
    Connected,
    /// Product is disconnected
    Disconnected,
    /// Transport is attempting to reconnect
    Reconnecting { attempt: usize },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Type alias for connection status callbacks
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Remote key-value endpoint
///
/// All methods take `&self`; implementations use interior mutability.
/// `subscribe` and `unsubscribe` are registrations and must not block: the
/// store calls them from its actor loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Open a push subscription for a key
    fn subscribe(&self, key: &KeyId) -> Result<ValueStream, TransportError>;

    /// Release the push subscription for a key
    fn unsubscribe(&self, key: &KeyId);

    /// Read the current value
    async fn get(&self, key: &KeyId) -> Result<Value, TransportError>;

    /// Write a value
    async fn set(&self, key: &KeyId, value: Value) -> Result<(), TransportError>;

    /// Start an action; dropping the returned stream cancels it best-effort
    fn invoke_action(&self, key: &KeyId, arg: Value) -> Result<ActionStream, TransportError>;

    /// Get current connection status
    ///
    /// Default implementation: always connected (for local transports)
    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    /// Subscribe to connection status changes
    ///
    /// Default implementation: no-op (status never changes)
    fn subscribe_connection_status(&self, _callback: StatusCallback) {}
}
