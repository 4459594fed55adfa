//! Observable timeline stores.
//!
//! A [`Store`] owns one [`Timeline`] inside a `tokio::sync::watch` cell.
//! Every mutation is a single synchronous closure that runs under the cell's
//! write lock and publishes the result, so subscribers only ever see complete
//! transitions, and only when something actually changed.

use convo_sync_core::{Timeline, TimelineEntry};
use convo_sync_types::{
    ClientId, ConversationId, ConversationItem, PaginatedList, StableId, SyncError,
};
use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;

/// A watched timeline.
#[derive(Debug)]
pub struct Store<T: TimelineEntry> {
    cell: watch::Sender<Timeline<T>>,
}

impl<T> Store<T>
where
    T: TimelineEntry + Send + Sync + 'static,
    T::Key: Send + Sync,
{
    /// A store expecting history to be loaded.
    pub fn new() -> Self {
        Self::with_timeline(Timeline::new())
    }

    /// A store with no history to load.
    pub fn exhausted() -> Self {
        Self::with_timeline(Timeline::exhausted())
    }

    fn with_timeline(timeline: Timeline<T>) -> Self {
        let (cell, _) = watch::channel(timeline);
        Self { cell }
    }

    /// Mutate the timeline atomically. Subscribers are notified only if the
    /// timeline reports a change.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Timeline<T>) -> R) -> R {
        let mut output = None;
        self.cell.send_if_modified(|timeline| {
            output = Some(f(timeline));
            timeline.take_dirty()
        });
        match output {
            Some(output) => output,
            None => unreachable!("send_if_modified always runs its closure"),
        }
    }

    /// Read the current timeline.
    pub fn read<R>(&self, f: impl FnOnce(&Timeline<T>) -> R) -> R {
        f(&self.cell.borrow())
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> PaginatedList<T> {
        self.read(Timeline::snapshot)
    }

    /// Stream of snapshots: the current one first, then one per effective
    /// change. Intermediate states may be skipped by slow consumers; the
    /// latest state never is.
    pub fn snapshots(&self) -> BoxStream<'static, PaginatedList<T>> {
        let receiver = self.cell.subscribe();
        stream::unfold((receiver, true), |(mut receiver, first)| async move {
            if !first && receiver.changed().await.is_err() {
                return None;
            }
            let snapshot = receiver.borrow_and_update().snapshot();
            Some((snapshot, (receiver, false)))
        })
        .boxed()
    }

    /// Ticks once immediately, then once per effective change.
    pub fn changes(&self) -> BoxStream<'static, ()> {
        changes(self.cell.subscribe())
    }

    /// Number of live snapshot streams.
    pub fn subscriber_count(&self) -> usize {
        self.cell.receiver_count()
    }
}

/// Ticks once immediately, then once per value published on `receiver`.
pub fn changes<V>(receiver: watch::Receiver<V>) -> BoxStream<'static, ()>
where
    V: Send + Sync + 'static,
{
    stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first && receiver.changed().await.is_err() {
            return None;
        }
        receiver.borrow_and_update();
        Some(((), (receiver, false)))
    })
    .boxed()
}

impl<T> Default for Store<T>
where
    T: TimelineEntry + Send + Sync + 'static,
    T::Key: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshots of `store`, preceded by `initial_load` when it has not loaded
/// yet. A failed initial load is reported as the first element; the stream
/// then continues with whatever the store holds.
pub fn watch_paginated<T>(
    store: Arc<Store<T>>,
    initial_load: Option<BoxFuture<'static, Result<(), SyncError>>>,
) -> BoxStream<'static, Result<PaginatedList<T>, SyncError>>
where
    T: TimelineEntry + Send + Sync + 'static,
    T::Key: Send + Sync,
{
    let snapshots = store.snapshots().map(Ok::<_, SyncError>);
    match initial_load {
        None => snapshots.boxed(),
        Some(load) => stream::once(load)
            .filter_map(|result: Result<(), SyncError>| {
                future::ready(result.err().map(Err::<PaginatedList<T>, _>))
            })
            .chain(snapshots)
            .boxed(),
    }
}

/// Publish every value of `source` on `target` until `target` has no
/// receivers left or `source` goes away.
async fn mirror<T>(mut source: watch::Receiver<Timeline<T>>, target: Arc<Store<T>>)
where
    T: TimelineEntry + Send + Sync + 'static,
    T::Key: Send + Sync,
{
    loop {
        let timeline = source.borrow_and_update().clone();
        target.cell.send_replace(timeline);
        tokio::select! {
            changed = source.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = target.cell.closed() => break,
        }
    }
}

/// Item stores of every conversation, keyed by conversation id.
///
/// After a draft is promoted the same store is registered under both the
/// draft id and the remote id, so watchers of either see one timeline.
#[derive(Debug, Default)]
pub struct ItemStores {
    stores: DashMap<ConversationId, Arc<Store<ConversationItem>>>,
}

impl ItemStores {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The store for `id`, created on first use. Draft stores start with no
    /// history to load.
    pub fn get_or_create(&self, id: ConversationId) -> Arc<Store<ConversationItem>> {
        self.stores
            .entry(id)
            .or_insert_with(|| {
                Arc::new(if id.is_local() {
                    Store::exhausted()
                } else {
                    Store::new()
                })
            })
            .clone()
    }

    /// The store for `id`, if any.
    pub fn get(&self, id: ConversationId) -> Option<Arc<Store<ConversationItem>>> {
        self.stores.get(&id).map(|store| store.clone())
    }

    /// Register the draft's store under `to` and move its items there.
    ///
    /// Anything already filed under `to` (events that raced the creation
    /// response) is merged into the draft's timeline first. The replaced
    /// store keeps publishing the draft's timeline for as long as someone
    /// watches it, which needs a running tokio runtime. Returns how many
    /// items changed conversation.
    pub fn rekey(&self, from: ConversationId, to: ConversationId) -> usize {
        let store = self.get_or_create(from);
        let displaced = self
            .stores
            .insert(to, store.clone())
            .filter(|other| !Arc::ptr_eq(other, &store));

        let early = displaced
            .as_ref()
            .map(|other| other.read(|timeline| timeline.entries().to_vec()))
            .unwrap_or_default();

        let moved = store.mutate(|timeline| {
            for item in early {
                timeline.upsert_live(item);
            }
            convo_sync_core::rekey(timeline, from, to)
        });

        if let Some(other) = displaced {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(mirror(store.cell.subscribe(), other));
                }
                Err(_) => {
                    tracing::warn!(conversation = %to, "no runtime to forward promoted draft to earlier watchers");
                }
            }
        }
        moved
    }

    /// The store holding the message created with `client_id`.
    pub fn find_by_client_id(&self, client_id: ClientId) -> Option<Arc<Store<ConversationItem>>> {
        let id = StableId::from(client_id);
        self.stores
            .iter()
            .find(|entry| entry.value().read(|timeline| timeline.get(&id).is_some()))
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use convo_sync_core::send;
    use convo_sync_types::{MessageContent, RemoteId};
    use std::time::Duration;

    fn pending(conversation_id: ConversationId) -> ConversationItem {
        ConversationItem::Message(send::pending_message(
            ClientId::new(),
            conversation_id,
            MessageContent::Text { text: "hi".into() },
            Utc::now(),
            None,
        ))
    }

    #[tokio::test]
    async fn snapshots_replay_then_follow_changes() {
        let store: Store<ConversationItem> = Store::new();
        let conversation_id = ConversationId::Remote(RemoteId::random());
        store.mutate(|t| t.upsert_live(pending(conversation_id)));

        let mut snapshots = store.snapshots();
        assert_eq!(snapshots.next().await.unwrap().items.len(), 1);

        store.mutate(|t| t.upsert_live(pending(conversation_id)));
        assert_eq!(snapshots.next().await.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn no_op_mutation_does_not_notify() {
        let store: Store<ConversationItem> = Store::new();
        let item = pending(ConversationId::Remote(RemoteId::random()));
        store.mutate(|t| t.upsert_live(item.clone()));

        let mut snapshots = store.snapshots();
        snapshots.next().await.unwrap();

        store.mutate(|t| t.upsert_live(item.clone()));
        let next = tokio::time::timeout(std::time::Duration::from_millis(20), snapshots.next()).await;
        assert!(next.is_err(), "unchanged timeline must not publish");
    }

    #[tokio::test]
    async fn failed_initial_load_is_reported_first() {
        let store: Arc<Store<ConversationItem>> = Arc::new(Store::new());
        let load: BoxFuture<'static, Result<(), SyncError>> =
            Box::pin(async { Err(SyncError::Network("offline".into())) });

        let mut stream = watch_paginated(store, Some(load));
        assert_eq!(
            stream.next().await.unwrap(),
            Err(SyncError::Network("offline".into()))
        );
        assert_eq!(stream.next().await.unwrap().unwrap().items.len(), 0);
    }

    #[test]
    fn rekey_aliases_store_under_both_ids() {
        let stores = ItemStores::new();
        let draft = ConversationId::Local(ClientId::new());
        let remote = ConversationId::Remote(RemoteId::random());
        stores.get_or_create(draft).mutate(|t| t.upsert_live(pending(draft)));

        assert_eq!(stores.rekey(draft, remote), 1);

        let by_draft = stores.get(draft).unwrap();
        let by_remote = stores.get(remote).unwrap();
        assert!(Arc::ptr_eq(&by_draft, &by_remote));
        assert!(by_remote
            .snapshot()
            .items
            .iter()
            .all(|item| item.conversation_id() == remote));
    }

    #[tokio::test]
    async fn early_remote_watcher_follows_promoted_draft() {
        let stores = ItemStores::new();
        let draft = ConversationId::Local(ClientId::new());
        let remote = ConversationId::Remote(RemoteId::random());
        stores.get_or_create(draft).mutate(|t| t.upsert_live(pending(draft)));

        // Someone watches the remote id before the creation response lands
        let mut early = stores.get_or_create(remote).snapshots();
        assert!(early.next().await.unwrap().items.is_empty());

        stores.rekey(draft, remote);
        let promoted = tokio::time::timeout(Duration::from_secs(1), early.next())
            .await
            .expect("watcher got the promoted draft")
            .unwrap();
        assert_eq!(promoted.items.len(), 1);

        stores.get(remote).unwrap().mutate(|t| t.upsert_live(pending(remote)));
        let updated = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let snapshot = early.next().await.unwrap();
                if snapshot.items.len() == 2 {
                    return snapshot;
                }
            }
        })
        .await
        .expect("watcher got the later update");
        assert!(updated.items.iter().all(|item| item.conversation_id() == remote));
    }

    #[test]
    fn draft_store_has_no_history() {
        let stores = ItemStores::new();
        let store = stores.get_or_create(ConversationId::Local(ClientId::new()));
        assert!(!store.snapshot().has_more);
        let remote = stores.get_or_create(ConversationId::Remote(RemoteId::random()));
        assert!(remote.snapshot().has_more);
    }
}
