//! MessagingClient - the main interface for convo-sync.
//!
//! This module provides [`MessagingClient`], the API the UI layer talks to.
//!
//! # Architecture
//!
//! The client checks the session, then hands each call to the repository
//! that owns the data. Repositories keep their state in observable stores
//! and use the pure transitions from sync-core to change it.
//!
//! ```text
//! UI → MessagingClient → ConversationRepository ─┐
//!                      → ConversationContentRepository → Transport → Server
//!                                 ↓
//!                     sync-core (pure transitions)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use convo_sync_client::{MessagingClient, MockTransport, MockUploader, StaticSession, SyncConfig, SyncContext};
//!
//! let ctx = SyncContext::new(SyncConfig::default(), MockTransport::new(), MockUploader::new(), StaticSession::default());
//! let client = MessagingClient::new(ctx);
//!
//! let draft = client.create_draft_conversation(None, vec![doctor]);
//! let pending = client.send_message(MessageInput::text("Hello"), draft, None).await?;
//! let mut items = client.watch_conversation_items(draft);
//! ```

use convo_sync_types::{
    ClientId, Conversation, ConversationId, ConversationItem, MessageId, MessageInput,
    PaginatedList, RemoteEvent, RemoteId, SyncError, UserId,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use crate::content::{ConversationContentRepository, PendingSend};
use crate::context::SyncContext;
use crate::conversations::ConversationRepository;
use crate::store::ItemStores;
use crate::subscriptions::{EventSink, Subscriptions};

/// The messaging client.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct MessagingClient {
    ctx: Arc<SyncContext>,
    items: Arc<ItemStores>,
    conversations: ConversationRepository,
    content: ConversationContentRepository,
}

impl MessagingClient {
    /// Create a new MessagingClient.
    pub fn new(ctx: SyncContext) -> Self {
        let ctx = Arc::new(ctx);
        let items = Arc::new(ItemStores::new());
        let subscriptions = Arc::new(Subscriptions::new(ctx.transport.clone()));
        let conversations =
            ConversationRepository::new(ctx.clone(), items.clone(), subscriptions.clone());
        let content = ConversationContentRepository::new(
            ctx.clone(),
            items.clone(),
            conversations.clone(),
            subscriptions,
        );
        Self {
            ctx,
            items,
            conversations,
            content,
        }
    }

    /// The shared context.
    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Watch the conversation list, newest activity first.
    pub fn watch_conversations(
        &self,
    ) -> BoxStream<'static, Result<PaginatedList<Conversation>, SyncError>> {
        let conversations = self.conversations.clone();
        self.guarded(move || conversations.watch_conversations())
    }

    /// Watch one conversation, draft or remote.
    ///
    /// A draft's stream follows it through promotion.
    pub fn watch_conversation(
        &self,
        id: ConversationId,
    ) -> BoxStream<'static, Result<Conversation, SyncError>> {
        let conversations = self.conversations.clone();
        self.guarded(move || conversations.watch_conversation(id))
    }

    /// Watch a conversation's items, newest first.
    pub fn watch_conversation_items(
        &self,
        id: ConversationId,
    ) -> BoxStream<'static, Result<PaginatedList<ConversationItem>, SyncError>> {
        let content = self.content.clone();
        self.guarded(move || content.watch_items(id))
    }

    /// Load the next page of conversations.
    pub async fn load_more_conversations(&self) -> Result<(), SyncError> {
        self.authenticated().await?;
        self.conversations
            .load_more_conversations()
            .await
            .map_err(SyncError::into_domain)
    }

    /// Load the next page of a conversation's items.
    pub async fn load_more_items(&self, id: ConversationId) -> Result<(), SyncError> {
        self.authenticated().await?;
        self.content
            .load_more_items(id)
            .await
            .map_err(SyncError::into_domain)
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Create a conversation server-side, optionally sending a first message.
    ///
    /// A failed first message does not undo the creation: the conversation
    /// is returned and the message stays in `ErrorSending` for retry.
    /// Dropping the call never creates the conversation without queuing the
    /// message.
    pub async fn create_conversation(
        &self,
        title: Option<String>,
        participant_ids: Vec<UserId>,
        initial_message: Option<MessageInput>,
    ) -> Result<Conversation, SyncError> {
        self.authenticated().await?;
        self.content
            .start_conversation(title, participant_ids, initial_message)
            .await
            .map_err(SyncError::into_domain)
    }

    /// Create a local draft conversation. No network, no session needed.
    pub fn create_draft_conversation(
        &self,
        title: Option<String>,
        participant_ids: Vec<UserId>,
    ) -> ConversationId {
        self.conversations.create_draft(title, participant_ids)
    }

    /// Create a draft server-side. Returns its remote id.
    pub async fn promote_draft_conversation(&self, id: ClientId) -> Result<RemoteId, SyncError> {
        self.authenticated().await?;
        self.conversations
            .promote_draft(id)
            .await
            .map_err(SyncError::into_domain)
    }

    /// Mark a conversation as read.
    pub async fn mark_conversation_as_read(&self, id: ConversationId) -> Result<(), SyncError> {
        self.authenticated().await?;
        self.conversations
            .mark_as_read(id)
            .await
            .map_err(SyncError::into_domain)
    }

    /// Update the current user's typing indicator.
    pub async fn set_typing(&self, id: ConversationId, is_typing: bool) -> Result<(), SyncError> {
        self.authenticated().await?;
        self.content
            .set_typing(id, is_typing)
            .await
            .map_err(SyncError::into_domain)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Send a message. It shows up as `Sending` before this returns.
    pub async fn send_message(
        &self,
        input: MessageInput,
        conversation_id: ConversationId,
        reply_to: Option<RemoteId>,
    ) -> Result<PendingSend, SyncError> {
        self.authenticated().await?;
        self.content
            .send_message(input, conversation_id, reply_to)
            .map_err(SyncError::into_domain)
    }

    /// Retry a message in `ErrorSending`.
    pub async fn retry_sending_message(
        &self,
        message_id: MessageId,
        conversation_id: ConversationId,
    ) -> Result<MessageId, SyncError> {
        self.authenticated().await?;
        self.content
            .retry_sending_message(message_id, conversation_id)
            .await
            .map_err(SyncError::into_domain)
    }

    /// Delete a message.
    pub async fn delete_message(
        &self,
        message_id: MessageId,
        conversation_id: ConversationId,
    ) -> Result<(), SyncError> {
        self.authenticated().await?;
        self.content
            .delete_message(message_id, conversation_id)
            .await
            .map_err(SyncError::into_domain)
    }

    /// Apply a send acknowledgment delivered out of band.
    pub fn on_send_acknowledged(
        &self,
        client_id: ClientId,
        remote_id: RemoteId,
    ) -> Result<(), SyncError> {
        self.content.on_send_acknowledged(client_id, remote_id)
    }

    /// Apply a send failure delivered out of band.
    pub fn on_send_failed(&self, client_id: ClientId, cause: SyncError) -> Result<(), SyncError> {
        self.content.on_send_failed(client_id, cause)
    }

    /// Apply a push event received outside the subscriptions.
    ///
    /// Goes through the same reconciliation as subscribed events, so
    /// duplicates are harmless.
    pub fn apply_remote_event(&self, event: RemoteEvent) {
        match event {
            RemoteEvent::Conversations(_) => {
                if let Some(list) = self.conversations.list_sink().upgrade() {
                    list.apply(event);
                }
            }
            RemoteEvent::Conversation { .. } => self.items.apply(event),
        }
    }

    // =========================================================================
    // Session
    // =========================================================================

    async fn authenticated(&self) -> Result<(), SyncError> {
        self.ctx.session.ensure_authenticated().await.map_err(|e| {
            tracing::debug!(error = %e, "session check failed");
            e.into_domain()
        })
    }

    /// Defer `open` until the session check passes. An unauthenticated
    /// watch yields one error and ends.
    fn guarded<T, F>(&self, open: F) -> BoxStream<'static, Result<T, SyncError>>
    where
        T: Send + 'static,
        F: FnOnce() -> BoxStream<'static, Result<T, SyncError>> + Send + 'static,
    {
        let client = self.clone();
        stream::once(async move {
            match client.authenticated().await {
                Ok(()) => open(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            }
        })
        .flatten()
        .boxed()
    }
}

impl std::fmt::Debug for MessagingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingClient")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
