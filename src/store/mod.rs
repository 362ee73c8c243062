//! Keyed store - one remote subscription per key, fanned out to processors
//!
//! The store is a single tokio actor owning the key to subscription map.
//! [`KeyedStore`] is the cloneable handle widget models use to bind
//! processors, read snapshots and issue commands.

mod actor;
mod commands;
mod handle;
mod types;


pub use handle::KeyedStore;
pub use types::{
    StoreOptions, StoreStats, SubscriptionInfo, SubscriptionState, DEFAULT_ACTION_TIMEOUT,
    DEFAULT_COMMAND_TIMEOUT,
};
