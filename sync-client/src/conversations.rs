//! Conversation list and draft conversations.
//!
//! The list is a [`Store`] fed by pages and the list subscription. Drafts
//! live in their own watch cell until they are promoted, at which point the
//! server conversation joins the list and the draft's items move to the
//! remote id.

use convo_sync_core::{DraftConversation, DraftEvent, DraftRegistry};
use convo_sync_types::{
    ClientId, Conversation, ConversationId, CreationState, PaginatedList, RemoteId, SyncError,
    UserId,
};
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

use crate::context::SyncContext;
use crate::inflight::{settle, InFlight};
use crate::store::{self, watch_paginated, ItemStores, Store};
use crate::subscriptions::{EventSink, Subscriptions};
use crate::transport::{Mutation, MutationResponse, Page, PageEntries, PageRequest, PageScope, Topic};

/// Where a promotion attempt stands when it begins.
enum Begin {
    /// This caller owns the creation request.
    Start(DraftConversation),
    /// Another request is in flight.
    Wait,
    /// Already created.
    Done(RemoteId),
}

/// Conversation list, drafts and conversation-level mutations.
#[derive(Clone)]
pub struct ConversationRepository {
    ctx: Arc<SyncContext>,
    list: Arc<Store<Conversation>>,
    drafts: Arc<watch::Sender<DraftRegistry>>,
    items: Arc<ItemStores>,
    subscriptions: Arc<Subscriptions>,
    list_loads: Arc<InFlight<(), ()>>,
    promotions: Arc<InFlight<ClientId, RemoteId>>,
}

impl ConversationRepository {
    /// Create a repository sharing `items` and `subscriptions` with the
    /// content repository.
    pub fn new(
        ctx: Arc<SyncContext>,
        items: Arc<ItemStores>,
        subscriptions: Arc<Subscriptions>,
    ) -> Self {
        let (drafts, _) = watch::channel(DraftRegistry::new());
        Self {
            ctx,
            list: Arc::new(Store::new()),
            drafts: Arc::new(drafts),
            items,
            subscriptions,
            list_loads: Arc::new(InFlight::new()),
            promotions: Arc::new(InFlight::new()),
        }
    }

    /// Watch the conversation list.
    ///
    /// The first watch loads the first page and starts the list subscription.
    pub fn watch_conversations(
        &self,
    ) -> BoxStream<'static, Result<PaginatedList<Conversation>, SyncError>> {
        self.subscriptions.ensure(Topic::Conversations, self.list_sink());
        watch_paginated(self.list.clone(), self.initial_list_load())
    }

    /// Watch one conversation (draft or remote).
    ///
    /// A draft is followed through its promotion: after creation the stream
    /// continues with the server conversation. The stream yields
    /// [`SyncError::NotFound`] for unknown drafts, and when a watched
    /// conversation is removed.
    pub fn watch_conversation(
        &self,
        id: ConversationId,
    ) -> BoxStream<'static, Result<Conversation, SyncError>> {
        if let ConversationId::Local(local) = id {
            if !self.has_draft(local) {
                return stream::once(future::ready(Err(SyncError::NotFound(format!(
                    "conversation {}",
                    id
                )))))
                .boxed();
            }
        }
        self.subscriptions.ensure(Topic::Conversations, self.list_sink());

        let load_errors: BoxStream<'static, Result<Conversation, SyncError>> =
            match self.initial_list_load() {
                Some(load) if !id.is_local() => stream::once(load)
                    .filter_map(|result| future::ready(result.err().map(Err)))
                    .boxed(),
                _ => stream::empty().boxed(),
            };

        let repo = self.clone();
        let ticks = stream::select(self.list.changes(), store::changes(self.drafts.subscribe()));
        let updates = ticks
            .scan(None::<Conversation>, move |last, ()| {
                let current = repo.current_conversation(id);
                let output = if current.is_some() && current != *last {
                    last.clone_from(&current);
                    current.map(Ok)
                } else if current.is_none() && last.take().is_some() {
                    Some(Err(SyncError::NotFound(format!("conversation {}", id))))
                } else {
                    None
                };
                future::ready(Some(output))
            })
            .filter_map(future::ready);

        load_errors.chain(updates).boxed()
    }

    /// Fetch the next older page of conversations.
    ///
    /// Concurrent calls share one request and its result.
    pub async fn load_more_conversations(&self) -> Result<(), SyncError> {
        let repo = self.clone();
        self.list_loads
            .run((), move || repo.fetch_conversation_page())
            .await
    }

    /// Create a local draft. No network.
    pub fn create_draft(&self, title: Option<String>, participant_ids: Vec<UserId>) -> ConversationId {
        let id = self.ctx.ids.next_id();
        let draft = DraftConversation::new(id, title, participant_ids, self.ctx.clock.now());
        self.drafts.send_modify(|registry| registry.insert(draft));
        tracing::debug!(draft = %id, "created draft conversation");
        ConversationId::Local(id)
    }

    /// Create a conversation server-side and add it to the list.
    pub async fn create_conversation(
        &self,
        title: Option<String>,
        participant_ids: Vec<UserId>,
    ) -> Result<Conversation, SyncError> {
        let repo = self.clone();
        settle(tokio::spawn(async move {
            let mutation = Mutation::CreateConversation {
                title,
                participant_ids,
            };
            match repo.ctx.transport.send(mutation).await? {
                MutationResponse::ConversationCreated(conversation) => {
                    repo.list
                        .mutate(|timeline| timeline.upsert_live(conversation.clone()));
                    tracing::info!(conversation = %conversation.id, "conversation created");
                    Ok(conversation)
                }
                other => Err(unexpected("conversation creation", &other)),
            }
        }))
        .await
    }

    /// Create a draft server-side and move its items to the remote id.
    ///
    /// Concurrent promotions of the same draft share one creation request;
    /// promoting a created draft returns its remote id. The request runs as
    /// a background task, so dropping the caller never leaves the draft
    /// half-promoted.
    pub async fn promote_draft(&self, local: ClientId) -> Result<RemoteId, SyncError> {
        let repo = self.clone();
        self.promotions
            .run(local, move || settle(tokio::spawn(repo.create_remote(local))))
            .await
    }

    /// Mark a conversation as read.
    ///
    /// The unread count drops to zero immediately and is restored if the
    /// server refuses. Drafts have nothing to mark.
    pub async fn mark_as_read(&self, id: ConversationId) -> Result<(), SyncError> {
        let ConversationId::Remote(remote_id) = self.resolve(id) else {
            return Ok(());
        };
        let key = ConversationId::Remote(remote_id);
        let previous = self
            .list
            .mutate(|timeline| timeline.update(&key, |c| std::mem::take(&mut c.unread_count)));

        let repo = self.clone();
        settle(tokio::spawn(async move {
            let mutation = Mutation::MarkAsRead {
                conversation_id: remote_id,
            };
            match repo.ctx.transport.send(mutation).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    let cause = SyncError::from(e);
                    if let Some(unread) = previous.filter(|&count| count > 0) {
                        tracing::warn!(
                            conversation = %remote_id,
                            error = %cause,
                            "mark as read failed, restoring unread count"
                        );
                        repo.list.mutate(|timeline| {
                            timeline.update(&key, |c| {
                                if c.unread_count == 0 {
                                    c.unread_count = unread;
                                }
                            })
                        });
                    }
                    Err(cause)
                }
            }
        }))
        .await
    }

    /// Map a created draft's id to its remote id. Other ids pass through.
    pub fn resolve(&self, id: ConversationId) -> ConversationId {
        self.drafts.borrow().resolve(id)
    }

    /// Whether a draft with this id exists.
    pub fn has_draft(&self, id: ClientId) -> bool {
        self.drafts.borrow().contains(id)
    }

    /// Creation state of a draft.
    pub fn creation_state(&self, id: ClientId) -> Option<CreationState> {
        self.drafts.borrow().get(id).map(|draft| draft.state.clone())
    }

    /// Current view of a conversation.
    pub fn current_conversation(&self, id: ConversationId) -> Option<Conversation> {
        let draft = match id {
            ConversationId::Local(local) => self.drafts.borrow().get(local).cloned(),
            ConversationId::Remote(_) => None,
        };
        let resolved = match &draft {
            Some(draft) => draft.remote_id().map(ConversationId::Remote),
            None => Some(id),
        };
        resolved
            .and_then(|key| self.list.read(|timeline| timeline.get(&key).cloned()))
            .or_else(|| {
                draft.map(|draft| draft.as_conversation(&self.ctx.config.drafts.placeholder_title))
            })
    }

    /// Event sink for the list subscription.
    pub(crate) fn list_sink(&self) -> Weak<dyn EventSink> {
        Arc::downgrade(&self.list) as Weak<dyn EventSink>
    }

    fn items_sink(&self) -> Weak<dyn EventSink> {
        Arc::downgrade(&self.items) as Weak<dyn EventSink>
    }

    fn initial_list_load(&self) -> Option<BoxFuture<'static, Result<(), SyncError>>> {
        if self.list.read(|timeline| timeline.is_loaded()) {
            return None;
        }
        let repo = self.clone();
        Some(
            async move {
                if repo.list.read(|timeline| timeline.is_loaded()) {
                    return Ok(());
                }
                repo.load_more_conversations().await
            }
            .boxed(),
        )
    }

    async fn fetch_conversation_page(self) -> Result<(), SyncError> {
        let (has_more, cursor) = self
            .list
            .read(|timeline| (timeline.has_more(), timeline.next_cursor().cloned()));
        if !has_more {
            return Ok(());
        }

        let request = PageRequest {
            scope: PageScope::Conversations,
            cursor,
            limit: self.ctx.config.pagination.page_size,
        };
        let Page {
            entries,
            next_cursor,
            has_more,
        } = self.ctx.transport.fetch_page(request).await?;

        match entries {
            PageEntries::Conversations(conversations) => {
                let appended = self
                    .list
                    .mutate(|timeline| timeline.append_page(conversations, next_cursor, has_more));
                tracing::debug!(appended, has_more, "loaded conversation page");
                Ok(())
            }
            PageEntries::Items(_) => Err(SyncError::Internal(
                "expected a conversation page, got conversation items".into(),
            )),
        }
    }

    async fn create_remote(self, local: ClientId) -> Result<RemoteId, SyncError> {
        let draft = match self.begin_creation(local)? {
            Begin::Done(remote_id) => return Ok(remote_id),
            Begin::Wait => return self.await_creation(local).await,
            Begin::Start(draft) => draft,
        };
        tracing::info!(draft = %local, "creating draft conversation");

        let mutation = Mutation::CreateConversation {
            title: draft.title.clone(),
            participant_ids: draft.participant_ids.clone(),
        };
        let conversation = match self.ctx.transport.send(mutation).await {
            Ok(MutationResponse::ConversationCreated(conversation)) => conversation,
            Ok(other) => {
                return Err(self.fail_creation(local, unexpected("conversation creation", &other)))
            }
            Err(e) => return Err(self.fail_creation(local, e.into())),
        };
        let Some(remote_id) = conversation.id.remote_id() else {
            return Err(self.fail_creation(
                local,
                SyncError::Internal("server returned a local conversation id".into()),
            ));
        };

        let moved = self
            .items
            .rekey(ConversationId::Local(local), ConversationId::Remote(remote_id));
        self.drafts.send_if_modified(|registry| {
            registry
                .apply(local, DraftEvent::CreationSucceeded { remote_id })
                .is_ok()
        });
        self.list
            .mutate(|timeline| timeline.upsert_live(conversation));
        self.subscriptions
            .ensure(Topic::Conversation(remote_id), self.items_sink());

        tracing::info!(draft = %local, conversation = %remote_id, moved, "draft conversation created");
        Ok(remote_id)
    }

    /// Atomically decide who creates the draft.
    fn begin_creation(&self, local: ClientId) -> Result<Begin, SyncError> {
        let mut begin = Err(SyncError::NotFound(format!("draft conversation {}", local)));
        self.drafts.send_if_modified(|registry| {
            let Some(state) = registry.get(local).map(|draft| draft.state.clone()) else {
                return false;
            };
            match state {
                CreationState::Created { remote_id } => {
                    begin = Ok(Begin::Done(remote_id));
                    false
                }
                CreationState::Creating => {
                    begin = Ok(Begin::Wait);
                    false
                }
                CreationState::ToBeCreated | CreationState::ErrorCreating { .. } => {
                    match registry.apply(local, DraftEvent::CreationStarted) {
                        Ok(draft) => {
                            begin = Ok(Begin::Start(draft));
                            true
                        }
                        Err(e) => {
                            begin = Err(e);
                            false
                        }
                    }
                }
            }
        });
        begin
    }

    /// Wait for a creation started by an earlier, abandoned promotion.
    async fn await_creation(&self, local: ClientId) -> Result<RemoteId, SyncError> {
        let mut drafts = self.drafts.subscribe();
        loop {
            {
                let registry = drafts.borrow_and_update();
                match registry.get(local).map(|draft| &draft.state) {
                    Some(CreationState::Created { remote_id }) => return Ok(*remote_id),
                    Some(CreationState::ErrorCreating { cause }) => return Err(cause.clone()),
                    Some(_) => {}
                    None => {
                        return Err(SyncError::NotFound(format!("draft conversation {}", local)))
                    }
                }
            }
            if drafts.changed().await.is_err() {
                return Err(SyncError::Internal("draft registry closed".into()));
            }
        }
    }

    fn fail_creation(&self, local: ClientId, cause: SyncError) -> SyncError {
        tracing::warn!(draft = %local, error = %cause, "draft conversation creation failed");
        self.drafts.send_if_modified(|registry| {
            registry
                .apply(
                    local,
                    DraftEvent::CreationFailed {
                        cause: cause.clone(),
                    },
                )
                .is_ok()
        });
        cause
    }
}

impl std::fmt::Debug for ConversationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRepository")
            .field("conversations", &self.list.read(|timeline| timeline.len()))
            .finish_non_exhaustive()
    }
}

pub(crate) fn unexpected(operation: &str, response: &MutationResponse) -> SyncError {
    SyncError::Internal(format!("unexpected response to {}: {:?}", operation, response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::session::StaticSession;
    use crate::transport::{MockTransport, TransportError};
    use crate::upload::MockUploader;
    use chrono::Utc;
    use std::time::Duration;

    fn repository(transport: &MockTransport) -> ConversationRepository {
        let ctx = Arc::new(SyncContext::new(
            SyncConfig::default().with_page_size(2),
            transport.clone(),
            MockUploader::new(),
            StaticSession::default(),
        ));
        let subscriptions = Arc::new(Subscriptions::new(ctx.transport.clone()));
        ConversationRepository::new(ctx, Arc::new(ItemStores::new()), subscriptions)
    }

    fn conversation(unread: u32) -> Conversation {
        Conversation {
            id: ConversationId::Remote(RemoteId::random()),
            title: Some("Follow-up".into()),
            subtitle: None,
            inbox_preview_title: "Follow-up".into(),
            last_message_preview: None,
            last_modified: Utc::now(),
            unread_count: unread,
            participants: vec![],
        }
    }

    // ===========================================
    // Draft Tests
    // ===========================================

    #[tokio::test]
    async fn draft_is_local_and_uses_placeholder() {
        let transport = MockTransport::new();
        let repo = repository(&transport);

        let id = repo.create_draft(None, vec![UserId::random()]);

        assert!(id.is_local());
        assert!(transport.sent_mutations().is_empty());
        let draft = repo.current_conversation(id).unwrap();
        assert_eq!(draft.inbox_preview_title, "New conversation");
    }

    #[tokio::test]
    async fn concurrent_promotions_create_once() {
        let transport = MockTransport::new();
        transport.set_send_delay(Duration::from_millis(20));
        let repo = repository(&transport);
        let ConversationId::Local(local) = repo.create_draft(Some("Check-up".into()), vec![]) else {
            unreachable!()
        };

        let (a, b) = tokio::join!(repo.promote_draft(local), repo.promote_draft(local));

        assert_eq!(a.clone().unwrap(), b.unwrap());
        assert_eq!(transport.sent_mutations().len(), 1);
        assert_eq!(
            repo.creation_state(local),
            Some(CreationState::Created {
                remote_id: a.unwrap()
            })
        );

        // Promoting again is answered locally
        repo.promote_draft(local).await.unwrap();
        assert_eq!(transport.sent_mutations().len(), 1);
    }

    #[tokio::test]
    async fn failed_promotion_can_be_retried() {
        let transport = MockTransport::new();
        transport.fail_next_send(TransportError::Network("offline".into()));
        let repo = repository(&transport);
        let ConversationId::Local(local) = repo.create_draft(None, vec![]) else {
            unreachable!()
        };

        let result = repo.promote_draft(local).await;
        assert!(matches!(result, Err(SyncError::Network(_))));
        assert!(matches!(
            repo.creation_state(local),
            Some(CreationState::ErrorCreating { .. })
        ));

        let remote_id = repo.promote_draft(local).await.unwrap();
        assert_eq!(
            repo.resolve(ConversationId::Local(local)),
            ConversationId::Remote(remote_id)
        );
    }

    #[tokio::test]
    async fn promoted_draft_joins_the_list() {
        let transport = MockTransport::new();
        let repo = repository(&transport);
        let id = repo.create_draft(Some("Check-up".into()), vec![]);
        let ConversationId::Local(local) = id else {
            unreachable!()
        };

        let remote_id = repo.promote_draft(local).await.unwrap();

        let current = repo.current_conversation(id).unwrap();
        assert_eq!(current.id, ConversationId::Remote(remote_id));
        assert_eq!(current.title.as_deref(), Some("Check-up"));
    }

    #[tokio::test]
    async fn promote_unknown_draft_is_not_found() {
        let transport = MockTransport::new();
        let repo = repository(&transport);
        let result = repo.promote_draft(ClientId::new()).await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    // ===========================================
    // Mark As Read Tests
    // ===========================================

    #[tokio::test]
    async fn mark_as_read_rolls_back_on_failure() {
        let transport = MockTransport::new();
        let repo = repository(&transport);
        let conversation = conversation(4);
        let id = conversation.id;
        repo.list.mutate(|t| t.upsert_live(conversation));

        transport.fail_next_send(TransportError::Timeout);
        let result = repo.mark_as_read(id).await;

        assert!(matches!(result, Err(SyncError::Network(_))));
        assert_eq!(repo.current_conversation(id).unwrap().unread_count, 4);

        repo.mark_as_read(id).await.unwrap();
        assert_eq!(repo.current_conversation(id).unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn mark_draft_as_read_is_local_noop() {
        let transport = MockTransport::new();
        let repo = repository(&transport);
        let id = repo.create_draft(None, vec![]);

        repo.mark_as_read(id).await.unwrap();
        assert!(transport.sent_mutations().is_empty());
    }

    // ===========================================
    // Pagination Tests
    // ===========================================

    #[tokio::test]
    async fn conversation_pages_append_until_exhausted() {
        let transport = MockTransport::new();
        transport.queue_page(Ok(Page {
            entries: PageEntries::Conversations(vec![conversation(0), conversation(0)]),
            next_cursor: Some(convo_sync_types::PageCursor::new("p2")),
            has_more: true,
        }));
        transport.queue_page(Ok(Page {
            entries: PageEntries::Conversations(vec![conversation(1)]),
            next_cursor: None,
            has_more: false,
        }));
        let repo = repository(&transport);

        let mut list = repo.watch_conversations();
        let first = list.next().await.unwrap().unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);

        repo.load_more_conversations().await.unwrap();
        let second = list.next().await.unwrap().unwrap();
        assert_eq!(second.items.len(), 3);
        assert!(!second.has_more);

        // Exhausted: no further requests
        repo.load_more_conversations().await.unwrap();
        let requests = transport.page_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].limit, 2);
        assert_eq!(
            requests[1].cursor,
            Some(convo_sync_types::PageCursor::new("p2"))
        );
    }

    #[tokio::test]
    async fn wrong_page_kind_is_internal_error() {
        let transport = MockTransport::new();
        transport.queue_page(Ok(Page {
            entries: PageEntries::Items(vec![]),
            next_cursor: None,
            has_more: false,
        }));
        let repo = repository(&transport);

        let result = repo.load_more_conversations().await;
        assert!(matches!(result, Err(SyncError::Internal(_))));
    }

    #[tokio::test]
    async fn watch_unknown_draft_yields_not_found() {
        let transport = MockTransport::new();
        let repo = repository(&transport);
        let mut stream = repo.watch_conversation(ConversationId::Local(ClientId::new()));
        assert!(matches!(stream.next().await, Some(Err(SyncError::NotFound(_)))));
        assert!(stream.next().await.is_none());
    }
}
