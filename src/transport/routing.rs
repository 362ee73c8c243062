//! Domain routing
//!
//! Sends each key to the transport registered for its domain, falling back
//! to the default (remote) transport. Connection status always comes from
//! the default transport: local preferences stay readable while the product
//! is away, but widget models still see the product as disconnected.

use super::{ActionStream, ConnectionStatus, StatusCallback, Transport, ValueStream};
use crate::error::TransportError;
use crate::key::KeyId;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Transport multiplexer keyed by domain
pub struct DomainRouter {
    default: Arc<dyn Transport>,
    routes: HashMap<String, Arc<dyn Transport>>,
}

impl DomainRouter {
    pub fn new(default: Arc<dyn Transport>) -> Self {
        Self {
            default,
            routes: HashMap::new(),
        }
    }

    /// Route every key of `domain` to `transport`
    pub fn route(mut self, domain: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.routes.insert(domain.into(), transport);
        self
    }

    /// Transport responsible for `key`
    pub fn pick(&self, key: &KeyId) -> &Arc<dyn Transport> {
        self.routes.get(key.domain()).unwrap_or(&self.default)
    }
}

#[async_trait]
impl Transport for DomainRouter {
    fn name(&self) -> &str {
        self.default.name()
    }

    fn subscribe(&self, key: &KeyId) -> Result<ValueStream, TransportError> {
        self.pick(key).subscribe(key)
    }

    fn unsubscribe(&self, key: &KeyId) {
        self.pick(key).unsubscribe(key)
    }

    async fn get(&self, key: &KeyId) -> Result<Value, TransportError> {
        self.pick(key).get(key).await
    }

    async fn set(&self, key: &KeyId, value: Value) -> Result<(), TransportError> {
        self.pick(key).set(key, value).await
    }

    fn invoke_action(&self, key: &KeyId, arg: Value) -> Result<ActionStream, TransportError> {
        self.pick(key).invoke_action(key, arg)
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.default.connection_status()
    }

    fn subscribe_connection_status(&self, callback: StatusCallback) {
        self.default.subscribe_connection_status(callback)
    }
}
