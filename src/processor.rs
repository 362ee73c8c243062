//! DataProcessor - latest-value holder with change suppression
//!
//! A processor always has a value (an explicit default until something
//! arrives). [`DataProcessor::on_next`] replaces it only when the new value is
//! structurally different, and only then notifies subscribers. Streams from
//! [`DataProcessor::to_stream`] start with the current value, like a behavior
//! subject, and end once every clone of the processor has been dropped.

use crate::key::KeyValue;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::trace;

/// Buffered notifications per subscriber before it is considered lagging
pub const DEFAULT_CAPACITY: usize = 64;

static NEXT_PROCESSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique processor identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(u64);

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

struct Shared<T> {
    current: Mutex<T>,
    tx: broadcast::Sender<T>,
}

/// Single-slot reactive holder for one binding
pub struct DataProcessor<T> {
    id: ProcessorId,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for DataProcessor<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> DataProcessor<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(default: T) -> Self {
        Self::with_capacity(default, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(default: T, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            id: ProcessorId(NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed)),
            shared: Arc::new(Shared {
                current: Mutex::new(default),
                tx,
            }),
        }
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    /// Offer a new value
    ///
    /// Returns `true` if the value differed from the current one and
    /// subscribers were notified.
    pub fn on_next(&self, value: T) -> bool {
        // Compare, replace and send under one lock so subscribers observe
        // values in the order they were accepted.
        let mut current = self.shared.current.lock();
        if *current == value {
            return false;
        }
        *current = value.clone();
        // No receivers is not an error: the value is still retained.
        let _ = self.shared.tx.send(value);
        true
    }

    /// Current value (never blocks on I/O)
    pub fn value(&self) -> T {
        self.shared.current.lock().clone()
    }

    /// Hot stream replaying the current value first
    pub fn to_stream(&self) -> ProcessorStream<T> {
        let current = self.shared.current.lock();
        let rx = self.shared.tx.subscribe();
        ProcessorStream {
            pending: Some(current.clone()),
            inner: BroadcastStream::new(rx),
        }
    }

    /// Number of live streams
    pub fn subscriber_count(&self) -> usize {
        self.shared.tx.receiver_count()
    }
}

impl<T: fmt::Debug> fmt::Debug for DataProcessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProcessor")
            .field("id", &self.id)
            .field("value", &*self.shared.current.lock())
            .finish()
    }
}

/// Stream of processor values
pub struct ProcessorStream<T> {
    pending: Option<T>,
    inner: BroadcastStream<T>,
}

// `pending` is never pinned.
impl<T> Unpin for ProcessorStream<T> {}

impl<T> Stream for ProcessorStream<T>
where
    T: Clone + Send + 'static,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if let Some(value) = this.pending.take() {
            return Poll::Ready(Some(value));
        }

        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => return Poll::Ready(Some(value)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    trace!(skipped, "Processor stream lagged");
                    continue;
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Unit notification per change, used to trigger state derivation
pub type ChangeStream = Pin<Box<dyn Stream<Item = ()> + Send>>;

/// Type-erased view of a processor bound to a key
///
/// The store fans wire values out through [`ValueSink::accept`]; widget
/// models watch [`ValueSink::changes`].
pub trait ValueSink: Send + Sync {
    fn id(&self) -> ProcessorId;

    /// Decode a wire value and offer it to the processor
    fn accept(&self, value: &Value) -> Result<bool, serde_json::Error>;

    /// One item for the current value, then one per accepted change
    fn changes(&self) -> ChangeStream;
}

impl<T: KeyValue> ValueSink for DataProcessor<T> {
    fn id(&self) -> ProcessorId {
        self.id
    }

    fn accept(&self, value: &Value) -> Result<bool, serde_json::Error> {
        let decoded = T::deserialize(value)?;
        Ok(self.on_next(decoded))
    }

    fn changes(&self) -> ChangeStream {
        Box::pin(self.to_stream().map(|_| ()))
    }
}
