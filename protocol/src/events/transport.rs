//! # Event Log Transport
//!
//! The wallet talks to the public log through [`EventTransport`], an
//! explicitly constructed component handed around as `Arc<dyn EventTransport>`.
//! There is no global connection.
//!
//! A subscription is a typed stream. Stored events are replayed first, then
//! [`SubscriptionItem::EndOfStoredEvents`] marks the switch to live events.
//! Dropping the [`Subscription`] cancels it.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::event::{Event, EventError, Filter};

/// The log's answer to a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub event_id: [u8; 32],
    /// `false` when the log already had this event.
    pub fresh: bool,
}

/// One item of a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItem {
    Event(Event),
    EndOfStoredEvents,
}

/// Publish/subscribe access to the public event log.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn connect(&self) -> Result<(), EventError>;

    async fn disconnect(&self) -> Result<(), EventError>;

    async fn publish(&self, event: &Event) -> Result<PublishAck, EventError>;

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, EventError>;
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

type CancelHook = Box<dyn FnOnce(Uuid) + Send + Sync>;

/// A live subscription. Implements [`Stream`].
pub struct Subscription {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<SubscriptionItem>,
    on_drop: Option<CancelHook>,
}

impl Subscription {
    /// Wrap a channel. `on_drop` runs once when the subscription is dropped.
    pub fn new(
        id: Uuid,
        receiver: mpsc::UnboundedReceiver<SubscriptionItem>,
        on_drop: impl FnOnce(Uuid) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            receiver,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Stream for Subscription {
    type Item = SubscriptionItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook(self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Publish with a deadline. A deadline miss is [`EventError::Timeout`].
pub async fn publish_with_timeout(
    transport: &dyn EventTransport,
    event: &Event,
    timeout: Duration,
) -> Result<PublishAck, EventError> {
    match tokio::time::timeout(timeout, transport.publish(event)).await {
        Ok(result) => result,
        Err(_) => Err(EventError::Timeout),
    }
}

/// Subscribe and collect the stored events up to end-of-stored-events.
/// Events that fail verification are dropped. A replay that does not reach
/// end-of-stored-events is never returned: a deadline miss is
/// [`EventError::Timeout`], a stream that closes first is
/// [`EventError::NotConnected`].
pub async fn fetch_stored(
    transport: &dyn EventTransport,
    filter: Filter,
    timeout: Duration,
) -> Result<Vec<Event>, EventError> {
    let mut subscription = transport.subscribe(filter).await?;
    let mut events = Vec::new();

    let drain = async {
        while let Some(item) = subscription.next().await {
            match item {
                SubscriptionItem::Event(event) => match event.verify() {
                    Ok(()) => events.push(event),
                    Err(e) => warn!(event = %event.id_hex(), error = %e, "discarding event"),
                },
                SubscriptionItem::EndOfStoredEvents => return true,
            }
        }
        false
    };

    match tokio::time::timeout(timeout, drain).await {
        Ok(true) => Ok(events),
        Ok(false) => {
            debug!(collected = events.len(), "subscription closed before end of stored events");
            Err(EventError::NotConnected)
        }
        Err(_) => {
            debug!(collected = events.len(), "stored-event replay timed out");
            Err(EventError::Timeout)
        }
    }
}
