//! # Local Event Log
//!
//! A sled-backed [`EventTransport`] for single-machine markets, tests and
//! the `bon-node` CLI. Events are stored in one tree keyed by event id:
//!
//! | Tree     | Key             | Value           |
//! |----------|-----------------|-----------------|
//! | `events` | event id (32B)  | `bincode(Event)` |
//!
//! Live subscribers sit in a `DashMap` keyed by subscription id. Dropping a
//! [`Subscription`] removes its entry; disconnecting closes every stream.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use super::event::{Event, EventError, Filter};
use super::transport::{EventTransport, PublishAck, Subscription, SubscriptionItem};

struct Subscriber {
    filter: Filter,
    sender: mpsc::UnboundedSender<SubscriptionItem>,
}

/// Append-only event log on top of sled.
pub struct LocalEventLog {
    events: sled::Tree,
    subscribers: Arc<DashMap<Uuid, Subscriber>>,
    connected: AtomicBool,
}

fn storage_error(e: impl std::fmt::Display) -> EventError {
    EventError::Transport(e.to_string())
}

impl LocalEventLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EventError> {
        let db = sled::open(path).map_err(storage_error)?;
        Self::from_db(&db)
    }

    /// In-memory log that disappears when dropped.
    pub fn open_temporary() -> Result<Self, EventError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_error)?;
        Self::from_db(&db)
    }

    /// Share an already open database (the node keeps vouchers and events
    /// in one sled instance).
    pub fn from_db(db: &sled::Db) -> Result<Self, EventError> {
        Ok(Self {
            events: db.open_tree("events").map_err(storage_error)?,
            subscribers: Arc::new(DashMap::new()),
            connected: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn ensure_connected(&self) -> Result<(), EventError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EventError::NotConnected)
        }
    }

    fn stored_matching(&self, filter: &Filter) -> Result<Vec<Event>, EventError> {
        let mut out = Vec::new();
        for entry in self.events.iter() {
            let (_, value) = entry.map_err(storage_error)?;
            let event: Event = bincode::deserialize(&value).map_err(storage_error)?;
            if filter.matches(&event) {
                out.push(event);
            }
        }
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }

    fn fan_out(&self, event: &Event) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.filter.matches(event)
                && entry
                    .sender
                    .send(SubscriptionItem::Event(event.clone()))
                    .is_err()
            {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }
    }
}

#[async_trait]
impl EventTransport for LocalEventLog {
    async fn connect(&self) -> Result<(), EventError> {
        self.connected.store(true, Ordering::SeqCst);
        debug!(events = self.events.len(), "local event log connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EventError> {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribers.clear();
        debug!("local event log disconnected");
        Ok(())
    }

    async fn publish(&self, event: &Event) -> Result<PublishAck, EventError> {
        self.ensure_connected()?;
        event.verify()?;

        if self.events.contains_key(event.id).map_err(storage_error)? {
            trace!(event = %event.id_hex(), "duplicate publish");
            return Ok(PublishAck {
                event_id: event.id,
                fresh: false,
            });
        }

        let bytes = bincode::serialize(event).map_err(storage_error)?;
        self.events.insert(event.id, bytes).map_err(storage_error)?;
        self.events.flush_async().await.map_err(storage_error)?;
        self.fan_out(event);

        trace!(event = %event.id_hex(), kind = event.kind, "published");
        Ok(PublishAck {
            event_id: event.id,
            fresh: true,
        })
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, EventError> {
        self.ensure_connected()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        // Register before replaying so nothing published in between is lost.
        self.subscribers.insert(
            id,
            Subscriber {
                filter: filter.clone(),
                sender: sender.clone(),
            },
        );

        for event in self.stored_matching(&filter)? {
            let _ = sender.send(SubscriptionItem::Event(event));
        }
        let _ = sender.send(SubscriptionItem::EndOfStoredEvents);

        let registry = Arc::clone(&self.subscribers);
        Ok(Subscription::new(id, receiver, move |id| {
            registry.remove(&id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KIND_TRANSFER;
    use crate::crypto::schnorr::generate_key;
    use crate::events::event::{transfer, TransferRecord};
    use futures::StreamExt;

    fn transfer_event(timestamp: u64) -> Event {
        let (key, id) = generate_key();
        let (_, from) = generate_key();
        let record = TransferRecord {
            voucher_id: id,
            from_identity: from,
            to_identity: None,
            value: 10,
            timestamp,
            transfer_count: 1,
        };
        transfer(&record, &key).unwrap()
    }

    async fn connected_log() -> LocalEventLog {
        let log = LocalEventLog::open_temporary().unwrap();
        log.connect().await.unwrap();
        log
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let log = LocalEventLog::open_temporary().unwrap();
        let event = transfer_event(1);
        assert_eq!(log.publish(&event).await, Err(EventError::NotConnected));
        log.connect().await.unwrap();
        assert!(log.publish(&event).await.unwrap().fresh);
        log.disconnect().await.unwrap();
        assert!(log.subscribe(Filter::new()).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_publish_is_idempotent() {
        let log = connected_log().await;
        let event = transfer_event(1);
        assert!(log.publish(&event).await.unwrap().fresh);
        assert!(!log.publish(&event).await.unwrap().fresh);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn tampered_events_are_refused() {
        let log = connected_log().await;
        let mut event = transfer_event(1);
        event.content.push(' ');
        assert_eq!(log.publish(&event).await, Err(EventError::TamperedEvent));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn replay_then_eose_then_live() {
        let log = connected_log().await;
        let stored = transfer_event(5);
        log.publish(&stored).await.unwrap();

        let mut sub = log
            .subscribe(Filter::new().kinds([KIND_TRANSFER]))
            .await
            .unwrap();
        assert_eq!(sub.next().await, Some(SubscriptionItem::Event(stored)));
        assert_eq!(sub.next().await, Some(SubscriptionItem::EndOfStoredEvents));

        let live = transfer_event(6);
        log.publish(&live).await.unwrap();
        assert_eq!(sub.next().await, Some(SubscriptionItem::Event(live)));
    }

    #[tokio::test]
    async fn filter_limits_replay() {
        let log = connected_log().await;
        let a = transfer_event(1);
        let b = transfer_event(2);
        log.publish(&a).await.unwrap();
        log.publish(&b).await.unwrap();

        let id = a.voucher_id().unwrap();
        let mut sub = log.subscribe(Filter::new().vouchers([id])).await.unwrap();
        assert_eq!(sub.next().await, Some(SubscriptionItem::Event(a)));
        assert_eq!(sub.next().await, Some(SubscriptionItem::EndOfStoredEvents));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_it() {
        let log = connected_log().await;
        let sub = log.subscribe(Filter::new()).await.unwrap();
        assert_eq!(log.subscriber_count(), 1);
        drop(sub);
        assert_eq!(log.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_closes_streams() {
        let log = connected_log().await;
        let mut sub = log.subscribe(Filter::new()).await.unwrap();
        assert_eq!(sub.next().await, Some(SubscriptionItem::EndOfStoredEvents));
        log.disconnect().await.unwrap();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let event = transfer_event(3);
        {
            let log = LocalEventLog::open(dir.path()).unwrap();
            log.connect().await.unwrap();
            log.publish(&event).await.unwrap();
        }
        let log = LocalEventLog::open(dir.path()).unwrap();
        assert_eq!(log.len(), 1);
    }
}
