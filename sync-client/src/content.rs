//! Conversation items: sending, retrying, deleting and paging messages.
//!
//! Every operation updates the conversation's item store synchronously
//! (optimistic UI) and runs its network part in a spawned task, which either
//! confirms the optimistic state or rolls it back.

use chrono::{DateTime, Utc};
use convo_sync_core::send::{self, Outcome, SendEvent};
use convo_sync_types::{
    ClientId, Conversation, ConversationId, ConversationItem, FileSource, MessageContent,
    MessageId, MessageInput, PaginatedList, RemoteId, StableId, SyncError, UserId,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

use crate::context::SyncContext;
use crate::conversations::{unexpected, ConversationRepository};
use crate::inflight::{settle, InFlight};
use crate::store::{watch_paginated, ItemStores, Store};
use crate::subscriptions::{EventSink, Subscriptions};
use crate::transport::{
    Mutation, MutationResponse, OutgoingContent, Page, PageEntries, PageRequest, PageScope, Topic,
};

type ItemStore = Arc<Store<ConversationItem>>;

/// Handle on a message being delivered.
///
/// Dropping the handle does not cancel delivery.
#[derive(Debug)]
pub struct PendingSend {
    id: MessageId,
    handle: JoinHandle<Result<MessageId, SyncError>>,
}

impl PendingSend {
    /// The local id the message was created with.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Wait for delivery. Resolves to the promoted id, or to the failure
    /// that left the message in `ErrorSending`.
    pub async fn delivered(self) -> Result<MessageId, SyncError> {
        settle(self.handle).await
    }
}

/// Items of every conversation and the message-level mutations.
#[derive(Clone)]
pub struct ConversationContentRepository {
    ctx: Arc<SyncContext>,
    items: Arc<ItemStores>,
    conversations: ConversationRepository,
    subscriptions: Arc<Subscriptions>,
    loads: Arc<InFlight<RemoteId, ()>>,
    typing_sent: Arc<DashMap<RemoteId, DateTime<Utc>>>,
}

impl ConversationContentRepository {
    /// Create a repository sharing `items` and `subscriptions` with
    /// `conversations`.
    pub fn new(
        ctx: Arc<SyncContext>,
        items: Arc<ItemStores>,
        conversations: ConversationRepository,
        subscriptions: Arc<Subscriptions>,
    ) -> Self {
        Self {
            ctx,
            items,
            conversations,
            subscriptions,
            loads: Arc::new(InFlight::new()),
            typing_sent: Arc::new(DashMap::new()),
        }
    }

    /// Watch the items of a conversation, newest first.
    ///
    /// The first watch of a remote conversation loads its newest page and
    /// starts its subscription. A draft's stream keeps going after promotion.
    pub fn watch_items(
        &self,
        id: ConversationId,
    ) -> BoxStream<'static, Result<PaginatedList<ConversationItem>, SyncError>> {
        let resolved = self.conversations.resolve(id);
        if let ConversationId::Local(local) = resolved {
            if !self.conversations.has_draft(local) {
                return stream::once(async move {
                    Err(SyncError::NotFound(format!("conversation {}", id)))
                })
                .boxed();
            }
        }

        let store = self.items.get_or_create(resolved);
        let initial_load = match resolved {
            ConversationId::Remote(remote_id) => {
                self.subscriptions
                    .ensure(Topic::Conversation(remote_id), self.items_sink());
                self.initial_load(&store, remote_id)
            }
            ConversationId::Local(_) => None,
        };
        watch_paginated(store, initial_load)
    }

    /// Fetch the next older page of a conversation's items.
    ///
    /// Concurrent calls for the same conversation share one request and its
    /// result. Drafts have no history.
    pub async fn load_more_items(&self, id: ConversationId) -> Result<(), SyncError> {
        let ConversationId::Remote(remote_id) = self.conversations.resolve(id) else {
            return Ok(());
        };
        let repo = self.clone();
        self.loads
            .run(remote_id, move || repo.fetch_item_page(remote_id))
            .await
    }

    /// Send a message.
    ///
    /// The message is visible as `Local/Sending` when this returns; delivery
    /// (draft promotion, upload, send) continues in the background.
    pub fn send_message(
        &self,
        input: MessageInput,
        conversation_id: ConversationId,
        reply_to: Option<RemoteId>,
    ) -> Result<PendingSend, SyncError> {
        let resolved = self.conversations.resolve(conversation_id);
        if let ConversationId::Local(local) = resolved {
            if !self.conversations.has_draft(local) {
                return Err(SyncError::NotFound(format!("conversation {}", conversation_id)));
            }
        }

        let client_id = self.ctx.ids.next_id();
        let message = send::pending_message(
            client_id,
            resolved,
            input.into_content(),
            self.ctx.clock.now(),
            reply_to,
        );
        let store = self.items.get_or_create(resolved);
        store.mutate(|timeline| timeline.upsert_live(ConversationItem::Message(message)));
        tracing::debug!(message = %client_id, conversation = %resolved, "queued message");

        let handle = tokio::spawn(self.clone().deliver(store, client_id));
        Ok(PendingSend {
            id: MessageId::local(client_id),
            handle,
        })
    }

    /// Create a conversation server-side and send its first message.
    ///
    /// Creation and queuing of the message run in one background task, so a
    /// dropped caller never leaves a created conversation without its first
    /// message. A failed first message does not undo the creation: the
    /// message stays in `ErrorSending` for retry.
    pub async fn start_conversation(
        &self,
        title: Option<String>,
        participant_ids: Vec<UserId>,
        initial_message: Option<MessageInput>,
    ) -> Result<Conversation, SyncError> {
        let repo = self.clone();
        settle(tokio::spawn(async move {
            let conversation = repo
                .conversations
                .create_conversation(title, participant_ids)
                .await?;
            if let Some(input) = initial_message {
                let delivered = match repo.send_message(input, conversation.id, None) {
                    Ok(pending) => pending.delivered().await.map(|_| ()),
                    Err(e) => Err(e),
                };
                if let Err(e) = delivered {
                    tracing::warn!(
                        conversation = %conversation.id,
                        error = %e,
                        "initial message failed"
                    );
                }
            }
            Ok(conversation)
        }))
        .await
    }

    /// Resend a failed message with the same id and content.
    pub async fn retry_sending_message(
        &self,
        message_id: MessageId,
        conversation_id: ConversationId,
    ) -> Result<MessageId, SyncError> {
        let MessageId::Local { client_id } = message_id else {
            return Err(SyncError::InvalidState(format!(
                "message {} was already sent",
                message_id.stable_id()
            )));
        };
        let store = self.store_of(conversation_id)?;
        store.mutate(|timeline| send::apply(timeline, client_id.into(), SendEvent::RetryRequested))?;
        tracing::info!(message = %client_id, "retrying message");

        settle(tokio::spawn(self.clone().deliver(store, client_id))).await
    }

    /// Delete a message.
    ///
    /// Sent messages are tombstoned right away and restored if the server
    /// refuses, unless a server push deleted them meanwhile. Failed local
    /// messages are simply dropped. Deleting a tombstone is a no-op.
    pub async fn delete_message(
        &self,
        message_id: MessageId,
        conversation_id: ConversationId,
    ) -> Result<(), SyncError> {
        let store = self.store_of(conversation_id)?;
        let id = message_id.stable_id();
        let outcome =
            store.mutate(|timeline| send::apply(timeline, id, SendEvent::DeleteRequested))?;

        let previous = match outcome {
            Outcome::Changed { previous } => previous,
            Outcome::Removed { .. } => {
                tracing::debug!(message = %id, "dropped unsent message");
                return Ok(());
            }
            Outcome::Unchanged => return Ok(()),
        };
        let (Some(remote_id), Some(conversation)) =
            (previous.id.remote_id(), previous.conversation_id.remote_id())
        else {
            store.mutate(|timeline| send::rollback_delete(timeline, previous));
            return Err(SyncError::Internal(format!("message {} has no server id", id)));
        };

        let transport = self.ctx.transport.clone();
        settle(tokio::spawn(async move {
            let mutation = Mutation::DeleteMessage {
                conversation_id: conversation,
                remote_id,
            };
            match transport.send(mutation).await.map_err(SyncError::from) {
                Ok(_) => {
                    store.mutate(|timeline| send::confirm_delete(timeline, id));
                    Ok(())
                }
                Err(cause) => {
                    tracing::warn!(message = %id, error = %cause, "delete failed, restoring message");
                    store.mutate(|timeline| send::rollback_delete(timeline, previous));
                    Err(cause)
                }
            }
        }))
        .await
    }

    /// Update the current user's typing indicator.
    ///
    /// "Typing" goes out at most once per throttle window; "stopped typing"
    /// always goes out and resets the window. Drafts ignore typing.
    pub async fn set_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), SyncError> {
        let ConversationId::Remote(remote_id) = self.conversations.resolve(conversation_id) else {
            return Ok(());
        };

        if is_typing {
            let now = self.ctx.clock.now();
            let window = self.ctx.config.typing_throttle();
            let throttled = match self.typing_sent.entry(remote_id) {
                Entry::Occupied(mut entry) => {
                    // A clock that moved backwards counts as inside the window
                    let inside = (now - *entry.get())
                        .to_std()
                        .map_or(true, |elapsed| elapsed < window);
                    if !inside {
                        entry.insert(now);
                    }
                    inside
                }
                Entry::Vacant(entry) => {
                    entry.insert(now);
                    false
                }
            };
            if throttled {
                return Ok(());
            }
        } else {
            self.typing_sent.remove(&remote_id);
        }

        let repo = self.clone();
        settle(tokio::spawn(async move {
            let mutation = Mutation::SetTyping {
                conversation_id: remote_id,
                is_typing,
            };
            match repo.ctx.transport.send(mutation).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    if is_typing {
                        repo.typing_sent.remove(&remote_id);
                    }
                    Err(e.into())
                }
            }
        }))
        .await
    }

    /// Record a server acknowledgment received out of band.
    ///
    /// Idempotent: acknowledging a promoted message changes nothing.
    pub fn on_send_acknowledged(
        &self,
        client_id: ClientId,
        remote_id: RemoteId,
    ) -> Result<(), SyncError> {
        let store = self.store_with_message(client_id)?;
        store.mutate(|timeline| {
            send::apply(timeline, client_id.into(), SendEvent::Acknowledged { remote_id })
        })?;
        Ok(())
    }

    /// Record a delivery failure received out of band.
    ///
    /// Ignored once the message has been acknowledged.
    pub fn on_send_failed(&self, client_id: ClientId, cause: SyncError) -> Result<(), SyncError> {
        let store = self.store_with_message(client_id)?;
        store.mutate(|timeline| send::apply(timeline, client_id.into(), SendEvent::Failed { cause }))?;
        Ok(())
    }

    fn items_sink(&self) -> Weak<dyn EventSink> {
        Arc::downgrade(&self.items) as Weak<dyn EventSink>
    }

    fn store_of(&self, conversation_id: ConversationId) -> Result<ItemStore, SyncError> {
        let resolved = self.conversations.resolve(conversation_id);
        self.items
            .get(resolved)
            .ok_or_else(|| SyncError::NotFound(format!("conversation {}", conversation_id)))
    }

    fn store_with_message(&self, client_id: ClientId) -> Result<ItemStore, SyncError> {
        self.items
            .find_by_client_id(client_id)
            .ok_or_else(|| SyncError::NotFound(format!("message {}", client_id)))
    }

    fn initial_load(
        &self,
        store: &ItemStore,
        remote_id: RemoteId,
    ) -> Option<BoxFuture<'static, Result<(), SyncError>>> {
        if store.read(|timeline| timeline.is_loaded()) {
            return None;
        }
        let repo = self.clone();
        let store = store.clone();
        Some(
            async move {
                if store.read(|timeline| timeline.is_loaded()) {
                    return Ok(());
                }
                repo.load_more_items(ConversationId::Remote(remote_id)).await
            }
            .boxed(),
        )
    }

    async fn fetch_item_page(self, remote_id: RemoteId) -> Result<(), SyncError> {
        let store = self.items.get_or_create(ConversationId::Remote(remote_id));
        let (has_more, cursor) =
            store.read(|timeline| (timeline.has_more(), timeline.next_cursor().cloned()));
        if !has_more {
            return Ok(());
        }

        let request = PageRequest {
            scope: PageScope::ConversationItems(remote_id),
            cursor,
            limit: self.ctx.config.pagination.page_size,
        };
        let Page {
            entries,
            next_cursor,
            has_more,
        } = self.ctx.transport.fetch_page(request).await?;

        match entries {
            PageEntries::Items(items) => {
                let appended =
                    store.mutate(|timeline| timeline.append_page(items, next_cursor, has_more));
                tracing::debug!(conversation = %remote_id, appended, has_more, "loaded item page");
                Ok(())
            }
            PageEntries::Conversations(_) => Err(SyncError::Internal(
                "expected conversation items, got a conversation page".into(),
            )),
        }
    }

    /// Deliver a pending message and settle its status.
    async fn deliver(self, store: ItemStore, client_id: ClientId) -> Result<MessageId, SyncError> {
        let id = StableId::from(client_id);
        match self.try_deliver(&store, client_id).await {
            Ok((remote_id, created_at)) => {
                store.mutate(|timeline| send::acknowledge(timeline, id, remote_id, created_at))?;
                tracing::debug!(message = %client_id, remote = %remote_id, "message sent");
                Ok(store
                    .read(|timeline| send::find_message(timeline, id).map(|message| message.id))
                    .unwrap_or(MessageId::remote(Some(client_id), remote_id)))
            }
            Err(cause) => {
                tracing::warn!(message = %client_id, error = %cause, "message delivery failed");
                // Absent when the message was removed meanwhile
                let _ = store.mutate(|timeline| {
                    send::apply(
                        timeline,
                        id,
                        SendEvent::Failed {
                            cause: cause.clone(),
                        },
                    )
                });
                Err(cause)
            }
        }
    }

    async fn try_deliver(
        &self,
        store: &ItemStore,
        client_id: ClientId,
    ) -> Result<(RemoteId, DateTime<Utc>), SyncError> {
        let id = StableId::from(client_id);
        let message = store
            .read(|timeline| send::find_message(timeline, id).cloned())
            .ok_or_else(|| SyncError::NotFound(format!("message {}", client_id)))?;

        let conversation_id = match message.conversation_id {
            ConversationId::Remote(remote_id) => remote_id,
            ConversationId::Local(local) => {
                let remote_id = self.conversations.promote_draft(local).await?;
                // Items queued while the creation request was in flight
                self.items
                    .rekey(ConversationId::Local(local), ConversationId::Remote(remote_id));
                remote_id
            }
        };

        let content = match &message.content {
            MessageContent::Text { text } => OutgoingContent::Text { text: text.clone() },
            MessageContent::Media(media) => {
                let upload = match &media.source {
                    FileSource::Local { file } => {
                        let upload = self.ctx.uploader.upload(file).await?;
                        store.mutate(|timeline| send::attach_upload(timeline, id, upload.clone()));
                        upload
                    }
                    FileSource::Uploaded { upload, .. } => upload.clone(),
                };
                OutgoingContent::Media {
                    kind: media.kind,
                    upload_id: upload.id,
                }
            }
            MessageContent::Deleted => {
                return Err(SyncError::InvalidState(format!(
                    "message {} was deleted",
                    client_id
                )))
            }
        };

        let mutation = Mutation::SendMessage {
            conversation_id,
            client_id,
            content,
            reply_to: message.reply_to,
        };
        match self.ctx.transport.send(mutation).await? {
            MutationResponse::MessageSent {
                remote_id,
                created_at,
                ..
            } => Ok((remote_id, created_at)),
            other => Err(unexpected("message send", &other)),
        }
    }
}

impl std::fmt::Debug for ConversationContentRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContentRepository")
            .finish_non_exhaustive()
    }
}
