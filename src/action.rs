//! Action bridge - commands with exactly one terminal outcome
//!
//! [`ActionTicket`] resolves once, to the command result or to an error.
//! Cancelling races with completion without ever producing two outcomes:
//! whichever happens first wins, and a cancelled ticket resolves to
//! [`CommandError::Cancelled`].
//!
//! [`ActionProgress`] streams zero or more progress events followed by one
//! [`ActionEvent::Finished`], then ends. Dropping it aborts the driving task
//! and with it the remote invocation.

use crate::error::CommandError;
use crate::key::KeyId;
use crate::transport::{RemoteActionEvent, Transport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace, warn};

/// Pending command with a single resolution
///
/// Dropping the ticket detaches the command: it still runs to completion.
#[must_use = "a ticket does nothing unless awaited or cancelled"]
pub struct ActionTicket<R> {
    key: KeyId,
    handle: JoinHandle<Result<R, CommandError>>,
}

impl<R: Send + 'static> ActionTicket<R> {
    pub(crate) fn spawn<F>(key: KeyId, command: F) -> Self
    where
        F: Future<Output = Result<R, CommandError>> + Send + 'static,
    {
        Self {
            key,
            handle: tokio::spawn(command),
        }
    }

    /// Ticket that resolves immediately to `result`
    pub(crate) fn ready(key: KeyId, result: Result<R, CommandError>) -> Self {
        Self::spawn(key, async move { result })
    }

    pub fn key(&self) -> &KeyId {
        &self.key
    }

    /// Cancel the command
    ///
    /// Has no effect once the command finished; the ticket then still
    /// resolves to that result.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Handle that can cancel the command from elsewhere
    pub fn canceller(&self) -> ActionCanceller {
        ActionCanceller(self.handle.abort_handle())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<R> Future for ActionTicket<R> {
    type Output = Result<R, CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) if err.is_cancelled() => Poll::Ready(Err(CommandError::Cancelled {
                key: self.key.clone(),
            })),
            Poll::Ready(Err(err)) => Poll::Ready(Err(CommandError::Internal {
                key: self.key.clone(),
                reason: format!("command task failed: {}", err),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cancels an [`ActionTicket`] from another task
#[derive(Debug, Clone)]
pub struct ActionCanceller(AbortHandle);

impl ActionCanceller {
    pub fn cancel(&self) {
        self.0.abort();
    }
}

/// One item of an [`ActionProgress`] stream
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEvent<R> {
    /// Intermediate progress as reported by the remote
    Progress(Value),
    /// Terminal outcome; always the last item
    Finished(Result<R, CommandError>),
}

impl<R> ActionEvent<R> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionEvent::Finished(_))
    }
}

/// Progress events of a running action
pub struct ActionProgress<R> {
    key: KeyId,
    events: ReceiverStream<ActionEvent<R>>,
    task: JoinHandle<()>,
    finished: bool,
}

impl<R: Send + 'static> ActionProgress<R> {
    /// Progress stream that finishes immediately with `err`
    pub(crate) fn failed(key: KeyId, err: CommandError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(ActionEvent::Finished(Err(err)));
        Self {
            key,
            events: ReceiverStream::new(rx),
            task: tokio::spawn(async {}),
            finished: false,
        }
    }

    /// Drain progress events and return the terminal outcome
    pub async fn outcome(mut self) -> Result<R, CommandError> {
        while let Some(event) = self.next().await {
            if let ActionEvent::Finished(result) = event {
                return result;
            }
        }
        // The stream always ends with a terminal item
        Err(CommandError::NoResult { key: self.key.clone() })
    }

    pub fn key(&self) -> &KeyId {
        &self.key
    }
}

impl<R> Stream for ActionProgress<R> {
    type Item = ActionEvent<R>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.events).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // Driver ended without a terminal item (it panicked)
                self.finished = true;
                Poll::Ready(Some(ActionEvent::Finished(Err(CommandError::Internal {
                    key: self.key.clone(),
                    reason: "action driver stopped".to_string(),
                }))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<R> Unpin for ActionProgress<R> {}

impl<R> Drop for ActionProgress<R> {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            debug!(key = %self.key, "Action progress dropped, aborting");
            self.task.abort();
        }
    }
}

fn decode<R: DeserializeOwned>(key: &KeyId, value: Value) -> Result<R, CommandError> {
    serde_json::from_value(value).map_err(|e| CommandError::decode(key, e))
}

/// Write a value, bounded by `timeout`
pub(crate) fn set(
    transport: Arc<dyn Transport>,
    key: KeyId,
    value: Value,
    timeout: Duration,
) -> ActionTicket<()> {
    let command_key = key.clone();
    ActionTicket::spawn(key, async move {
        trace!(key = %command_key, %value, "Set");
        match tokio::time::timeout(timeout, transport.set(&command_key, value)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(CommandError::remote(&command_key, err)),
            Err(_) => Err(CommandError::Timeout {
                key: command_key,
                timeout,
            }),
        }
    })
}

/// Read a value from the remote, bounded by `timeout`
pub(crate) async fn get<R: DeserializeOwned>(
    transport: &dyn Transport,
    key: &KeyId,
    timeout: Duration,
) -> Result<R, CommandError> {
    match tokio::time::timeout(timeout, transport.get(key)).await {
        Ok(Ok(value)) => decode(key, value),
        Ok(Err(err)) => Err(CommandError::remote(key, err)),
        Err(_) => Err(CommandError::Timeout {
            key: key.clone(),
            timeout,
        }),
    }
}

/// Invoke an action and resolve to its result, ignoring progress
pub(crate) fn perform<R>(
    transport: Arc<dyn Transport>,
    key: KeyId,
    arg: Value,
    timeout: Duration,
) -> ActionTicket<R>
where
    R: DeserializeOwned + Send + 'static,
{
    let command_key = key.clone();
    ActionTicket::spawn(key, async move {
        let key = command_key;
        let mut events = transport
            .invoke_action(&key, arg)
            .map_err(|err| CommandError::remote(&key, err))?;

        let run = async {
            while let Some(event) = events.next().await {
                match event {
                    Ok(RemoteActionEvent::Progress(progress)) => {
                        trace!(%key, %progress, "Action progress ignored");
                    }
                    Ok(RemoteActionEvent::Completed(result)) => return decode(&key, result),
                    Err(err) => return Err(CommandError::remote(&key, err)),
                }
            }
            Err(CommandError::NoResult { key: key.clone() })
        };

        let outcome = tokio::time::timeout(timeout, run).await;
        outcome.unwrap_or_else(|_| {
            Err(CommandError::Timeout {
                key: key.clone(),
                timeout,
            })
        })
    })
}

/// Invoke an action and stream its progress
///
/// `idle_timeout` bounds the wait between two events.
pub(crate) fn perform_with_progress<R>(
    transport: Arc<dyn Transport>,
    key: KeyId,
    arg: Value,
    idle_timeout: Duration,
) -> ActionProgress<R>
where
    R: DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let driver_key = key.clone();

    let task = tokio::spawn(async move {
        let key = driver_key;
        let mut events = match transport.invoke_action(&key, arg) {
            Ok(events) => events,
            Err(err) => {
                let _ = tx
                    .send(ActionEvent::Finished(Err(CommandError::remote(&key, err))))
                    .await;
                return;
            }
        };

        loop {
            let terminal = match tokio::time::timeout(idle_timeout, events.next()).await {
                Ok(Some(Ok(RemoteActionEvent::Progress(progress)))) => {
                    if tx.send(ActionEvent::Progress(progress)).await.is_err() {
                        debug!(%key, "Action progress receiver gone");
                        return;
                    }
                    continue;
                }
                Ok(Some(Ok(RemoteActionEvent::Completed(result)))) => decode(&key, result),
                Ok(Some(Err(err))) => Err(CommandError::remote(&key, err)),
                Ok(None) => Err(CommandError::NoResult { key: key.clone() }),
                Err(_) => {
                    warn!(%key, ?idle_timeout, "Action went quiet");
                    Err(CommandError::Timeout {
                        key: key.clone(),
                        timeout: idle_timeout,
                    })
                }
            };
            let _ = tx.send(ActionEvent::Finished(terminal)).await;
            return;
        }
    });

    ActionProgress {
        key,
        events: ReceiverStream::new(rx),
        task,
        finished: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{ActionScript, MemoryTransport};
    use serde_json::json;

    fn format_key() -> KeyId {
        KeyId::indexed("Camera", "FormatSDCard", 0)
    }

    fn transport_with(script: ActionScript) -> Arc<MemoryTransport> {
        let transport = Arc::new(MemoryTransport::new("sim"));
        transport.register_action(format_key(), script);
        transport
    }

    #[tokio::test]
    async fn test_ticket_resolves_to_result() {
        let transport = transport_with(ActionScript::completes_with(json!("ok")));
        let result: Result<String, _> =
            perform(transport, format_key(), Value::Null, Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_ticket_carries_remote_error() {
        let transport = transport_with(ActionScript::fails(
            TransportError::new(-12, "card busy"),
            Duration::ZERO,
        ));
        let err = perform::<Value>(transport, format_key(), Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(-12));
        assert_eq!(err.description(), "card busy");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_times_out() {
        let transport = transport_with(ActionScript::never_completes(vec![], Duration::ZERO));
        let err = perform::<Value>(transport, format_key(), Value::Null, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_completion() {
        let transport = transport_with(ActionScript::completes_with(json!(1)));
        let ticket = perform::<Value>(transport, format_key(), Value::Null, Duration::from_secs(5));
        ticket.cancel();
        assert!(matches!(ticket.await, Err(CommandError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_keeps_result() {
        let transport = transport_with(ActionScript::completes_with(json!(7)));
        let ticket = perform::<i32>(transport, format_key(), Value::Null, Duration::from_secs(5));
        while !ticket.is_finished() {
            tokio::task::yield_now().await;
        }
        ticket.canceller().cancel();
        assert_eq!(ticket.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_progress_then_single_terminal() {
        let transport = transport_with(ActionScript::with_progress(
            vec![json!(25), json!(75)],
            json!(true),
            Duration::ZERO,
        ));
        let events: Vec<ActionEvent<bool>> =
            perform_with_progress(transport, format_key(), Value::Null, Duration::from_secs(1))
                .collect()
                .await;

        assert_eq!(
            events,
            vec![
                ActionEvent::Progress(json!(25)),
                ActionEvent::Progress(json!(75)),
                ActionEvent::Finished(Ok(true)),
            ]
        );
    }

    #[tokio::test]
    async fn test_progress_invoke_failure_is_terminal() {
        let transport = Arc::new(MemoryTransport::new("sim"));
        let events: Vec<ActionEvent<Value>> =
            perform_with_progress(transport, format_key(), Value::Null, Duration::from_secs(1))
                .collect()
                .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ActionEvent::Finished(Err(CommandError::Remote { code, .. }))
                if *code == TransportError::CODE_UNSUPPORTED
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_progress_cancels_remote() {
        let transport = transport_with(ActionScript::never_completes(
            vec![json!(10)],
            Duration::from_millis(10),
        ));
        let mut progress: ActionProgress<Value> = perform_with_progress(
            transport.clone(),
            format_key(),
            Value::Null,
            Duration::from_secs(60),
        );
        assert_eq!(progress.next().await, Some(ActionEvent::Progress(json!(10))));

        drop(progress);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.cancelled_actions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_idle_timeout() {
        let transport = transport_with(ActionScript::never_completes(vec![], Duration::ZERO));
        let progress: ActionProgress<Value> =
            perform_with_progress(transport, format_key(), Value::Null, Duration::from_secs(3));
        assert!(matches!(
            progress.outcome().await,
            Err(CommandError::Timeout { .. })
        ));
    }
}
