//! Store configuration and diagnostics types

use crate::key::KeyId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Default timeout for get/set
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for actions (overall, or between progress events)
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Store tuning
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    pub command_timeout: Duration,
    pub action_timeout: Duration,
    /// Re-open failed subscriptions when the product reconnects
    pub resubscribe_on_reconnect: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            resubscribe_on_reconnect: true,
        }
    }
}

/// State of one remote subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionState {
    /// Remote stream open and forwarding pushes
    Live,
    /// Rejected or ended by the remote; bindings kept, waiting for a reconnect
    Failed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Live => write!(f, "live"),
            SubscriptionState::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of one subscription record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub key: KeyId,
    pub state: SubscriptionState,
    /// Processors bound to the key
    pub bindings: usize,
    /// Incremented every time the remote subscription is (re)opened
    pub generation: u64,
}

/// Store counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub live_subscriptions: usize,
    pub failed_subscriptions: usize,
    pub bindings: usize,
    /// Values received from the remote
    pub pushes_received: u64,
    /// Values that changed at least one processor
    pub pushes_delivered: u64,
    /// Values discarded because their subscription was closed or replaced
    pub stale_pushes: u64,
    pub decode_failures: u64,
    pub bind_failures: u64,
    pub resubscriptions: u64,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subscriptions {} live / {} failed, {} bindings, pushes {} received / {} delivered / {} stale, {} decode failures, {} bind failures, {} resubscriptions",
            self.live_subscriptions,
            self.failed_subscriptions,
            self.bindings,
            self.pushes_received,
            self.pushes_delivered,
            self.stale_pushes,
            self.decode_failures,
            self.bind_failures,
            self.resubscriptions
        )
    }
}
