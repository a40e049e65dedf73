//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes events produced by a single owner to any number of
//! application subscribers (UI, analytics, tests).
//!
//! - **Broadcast semantics**: each subscription gets a copy of every event
//!   published after it subscribed.
//! - **Publish order is preserved** per subscription.
//! - **No persistence**: events published with no subscribers are dropped.
//! - **Non-blocking publish**: the publisher never waits on a slow consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// A subscription to an event stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let mut subscription = client.subscribe();
///
/// while let Some(envelope) = subscription.recv().await {
///     render(envelope.payload());
/// }
/// // `None`: the producer unsubscribed everyone (shutdown) or went away.
/// ```
///
/// Subscriptions are designed for single-consumer use.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message; `None` once the subscription was closed and drained.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Wait for up to `timeout` for a message.
    ///
    /// Returns `None` on timeout or when the subscription is closed.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<M> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drain every message currently buffered.
    pub fn drain(&mut self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(m) = self.receiver.try_recv() {
            out.push(m);
        }
        out
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ## Error Handling
///
/// `publish()` can fail (e.g. poisoned internal state). Publishers log the
/// failure and continue; a failed publish never aborts the operation that
/// produced the event.
///
/// ## Thread Safety
///
/// The trait requires `Send + Sync`; multiple threads may publish and
/// subscribe concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;

    /// Close every current subscription. Later subscriptions are unaffected.
    fn unsubscribe_all(&self);
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }

    fn unsubscribe_all(&self) {
        (**self).unsubscribe_all()
    }
}
