//! Background subscription pumps.
//!
//! One task per topic reads the transport's push stream and applies each
//! event to the matching store. A pump lives until its stream ends (or its
//! target store is dropped); the next watch of the topic starts a new one.

use convo_sync_core::reconcile;
use convo_sync_types::{Conversation, ConversationId, RemoteEvent};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

use crate::store::{ItemStores, Store};
use crate::transport::{Topic, Transport};

/// Receiver of push events.
pub trait EventSink: Send + Sync + 'static {
    /// Apply one event. Must be idempotent.
    fn apply(&self, event: RemoteEvent);
}

impl EventSink for Store<Conversation> {
    fn apply(&self, event: RemoteEvent) {
        if let RemoteEvent::Conversations(event) = event {
            let change = self.mutate(|timeline| reconcile::apply_list_event(timeline, event));
            tracing::trace!(?change, "applied conversation list event");
        }
    }
}

impl EventSink for ItemStores {
    fn apply(&self, event: RemoteEvent) {
        if let RemoteEvent::Conversation {
            conversation_id,
            event,
        } = event
        {
            let store = self.get_or_create(ConversationId::Remote(conversation_id));
            let change =
                store.mutate(|timeline| reconcile::apply_conversation_event(timeline, event));
            tracing::trace!(%conversation_id, ?change, "applied conversation event");
        }
    }
}

/// Running pumps, one per topic.
pub struct Subscriptions {
    transport: Arc<dyn Transport>,
    pumps: DashMap<Topic, JoinHandle<()>>,
}

impl Subscriptions {
    /// No pumps running.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pumps: DashMap::new(),
        }
    }

    /// Make sure a pump is feeding `topic` into `sink`.
    ///
    /// No-op while a pump for the topic is running. Must be called from
    /// within a tokio runtime.
    pub fn ensure(&self, topic: Topic, sink: Weak<dyn EventSink>) {
        match self.pumps.entry(topic) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_finished() {
                    tracing::debug!(?topic, "restarting subscription");
                    entry.insert(self.spawn_pump(topic, sink));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_pump(topic, sink));
            }
        }
    }

    /// Whether a pump for `topic` is running.
    pub fn is_running(&self, topic: &Topic) -> bool {
        self.pumps
            .get(topic)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn spawn_pump(&self, topic: Topic, sink: Weak<dyn EventSink>) -> JoinHandle<()> {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let mut events = match transport.subscribe(topic).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(?topic, error = %e, "subscription failed");
                    return;
                }
            };
            tracing::info!(?topic, "subscription started");

            while let Some(event) = events.next().await {
                let Some(sink) = sink.upgrade() else {
                    break;
                };
                sink.apply(event);
            }
            tracing::info!(?topic, "subscription ended");
        })
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for pump in self.pumps.iter() {
            pump.value().abort();
        }
    }
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("topics", &self.pumps.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportError};
    use convo_sync_types::{ConversationEvent, RemoteId};
    use std::time::Duration;

    async fn wait_for_subscribers(transport: &MockTransport, count: usize) {
        for _ in 0..100 {
            if transport.subscriber_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscription never opened");
    }

    #[tokio::test]
    async fn pump_applies_events_to_item_stores() {
        let transport = MockTransport::new();
        let subscriptions = Subscriptions::new(Arc::new(transport.clone()));
        let stores = Arc::new(ItemStores::new());
        let id = RemoteId::random();
        let sink: Weak<dyn EventSink> = Arc::downgrade(&stores) as Weak<dyn EventSink>;

        subscriptions.ensure(Topic::Conversation(id), sink.clone());
        subscriptions.ensure(Topic::Conversation(id), sink);
        wait_for_subscribers(&transport, 1).await;
        assert_eq!(transport.subscriptions(), vec![Topic::Conversation(id)]);

        let store = stores.get_or_create(ConversationId::Remote(id));
        let mut snapshots = store.snapshots();
        snapshots.next().await.unwrap();

        transport.emit(RemoteEvent::Conversation {
            conversation_id: id,
            event: ConversationEvent::MessageDeleted {
                remote_id: RemoteId::random(),
            },
        });
        // Unknown deletion: nothing published, pump still alive
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(subscriptions.is_running(&Topic::Conversation(id)));
    }

    #[tokio::test]
    async fn failed_subscription_is_restarted_by_next_ensure() {
        let transport = MockTransport::new();
        transport.fail_next_subscribe(TransportError::Closed);
        let subscriptions = Subscriptions::new(Arc::new(transport.clone()));
        let stores = Arc::new(ItemStores::new());
        let sink: Weak<dyn EventSink> = Arc::downgrade(&stores) as Weak<dyn EventSink>;

        subscriptions.ensure(Topic::Conversations, sink.clone());
        for _ in 0..100 {
            if !subscriptions.is_running(&Topic::Conversations) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!subscriptions.is_running(&Topic::Conversations));

        subscriptions.ensure(Topic::Conversations, sink);
        wait_for_subscribers(&transport, 1).await;
        assert!(subscriptions.is_running(&Topic::Conversations));
    }
}
