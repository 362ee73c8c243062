//! keylink - reactive key-based state binding
//!
//! Widget models bind typed [`DataProcessor`]s to device keys through a
//! [`KeyedStore`], which keeps at most one remote subscription per key and
//! fans pushed values out to every bound processor. Models derive a single
//! tagged state from their processors and the product connection, and issue
//! writes and actions through the same store.

pub mod action;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod host;
pub mod key;
pub mod paths;
pub mod processor;
pub mod simulation;
pub mod store;
pub mod transport;
pub mod widget;
pub mod widgets;

pub use action::{ActionEvent, ActionProgress, ActionTicket};
pub use error::{BindFailure, CommandError, StoreClosed, TransportError};
pub use key::{Key, KeyId, KeyValue};
pub use processor::{DataProcessor, ProcessorStream};
pub use store::{KeyedStore, StoreOptions};
pub use widget::{Lifecycle, LifecycleState, StateEmitter, WidgetLogic, WidgetModel};
