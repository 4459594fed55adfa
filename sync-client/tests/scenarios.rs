//! End-to-end scenarios against the mock transport.
//!
//! Each scenario drives a [`MessagingClient`] the way a UI would and checks
//! what the watch streams show.

use chrono::{Duration as ChronoDuration, Utc};
use convo_sync_client::{
    ManualClock, MessagingClient, MockTransport, MockUploader, Mutation, OutgoingContent, Page,
    PageEntries, StaticSession, SyncConfig, SyncContext, TransportError,
};
use convo_sync_types::{
    Author, Conversation, ConversationEvent, ConversationId, ConversationItem,
    ConversationListEvent, FileLocal, MediaKind, Message, MessageContent, MessageId,
    MessageInput, PaginatedList, RemoteEvent, RemoteId, SendStatus, SyncError,
};
use futures_util::stream::{BoxStream, StreamExt};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

struct World {
    transport: MockTransport,
    uploader: MockUploader,
    session: StaticSession,
    clock: ManualClock,
    client: MessagingClient,
}

fn world() -> World {
    init_tracing();
    let transport = MockTransport::new();
    let uploader = MockUploader::new();
    let session = StaticSession::default();
    let clock = ManualClock::new(Utc::now());
    let ctx = SyncContext::new(
        SyncConfig::default()
            .with_page_size(20)
            .with_typing_throttle(Duration::from_secs(3)),
        transport.clone(),
        uploader.clone(),
        session.clone(),
    )
    .with_clock(clock.clone());
    World {
        client: MessagingClient::new(ctx),
        transport,
        uploader,
        session,
        clock,
    }
}

fn remote_message(conversation_id: RemoteId, text: &str, minutes_ago: i64) -> ConversationItem {
    ConversationItem::Message(Message {
        id: MessageId::remote(None, RemoteId::random()),
        conversation_id: ConversationId::Remote(conversation_id),
        author: Author::Unknown,
        created_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        status: SendStatus::Sent,
        content: MessageContent::Text { text: text.into() },
        reply_to: None,
    })
}

fn text_of(item: &ConversationItem) -> &str {
    match item.as_message().map(|message| &message.content) {
        Some(MessageContent::Text { text }) => text,
        _ => "",
    }
}

/// Pull snapshots until one satisfies `done`.
async fn until<T>(
    stream: &mut BoxStream<'static, Result<PaginatedList<T>, SyncError>>,
    done: impl Fn(&PaginatedList<T>) -> bool,
) -> PaginatedList<T> {
    let wait = async {
        loop {
            let snapshot = stream
                .next()
                .await
                .expect("stream ended")
                .expect("stream failed");
            if done(&snapshot) {
                return snapshot;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("condition never reached")
}

async fn wait_for_subscribers(transport: &MockTransport, count: usize) {
    for _ in 0..200 {
        if transport.subscriber_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("subscription never opened");
}

// ============================================================================
// Identity
// ============================================================================

#[tokio::test]
async fn ack_and_push_echo_leave_one_sent_message() {
    let w = world();
    let conversation = RemoteId::random();
    let id = ConversationId::Remote(conversation);
    let mut items = w.client.watch_conversation_items(id);
    until(&mut items, |s| !s.has_more).await;
    wait_for_subscribers(&w.transport, 1).await;

    let pending = w
        .client
        .send_message(MessageInput::text("hello"), id, None)
        .await
        .unwrap();
    let stable = pending.id().stable_id();
    let sent = pending.delivered().await.unwrap();

    // The server echoes our own message on the subscription
    let Some(remote_id) = sent.remote_id() else {
        panic!("delivered message must be remote");
    };
    let echo = Message {
        id: MessageId::remote(sent.client_id(), remote_id),
        conversation_id: id,
        author: Author::CurrentUser,
        created_at: Utc::now(),
        status: SendStatus::Sent,
        content: MessageContent::Text {
            text: "hello".into(),
        },
        reply_to: None,
    };
    w.transport.emit(RemoteEvent::Conversation {
        conversation_id: conversation,
        event: ConversationEvent::ItemCreated(ConversationItem::Message(echo.clone())),
    });
    w.transport.emit(RemoteEvent::Conversation {
        conversation_id: conversation,
        event: ConversationEvent::ItemCreated(ConversationItem::Message(echo)),
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snapshot = until(&mut items, |s| s.items.len() == 1).await;
    let message = snapshot.items[0].as_message().unwrap();
    assert_eq!(message.status, SendStatus::Sent);
    assert_eq!(message.id.stable_id(), stable);
    assert_eq!(message.id.remote_id(), Some(remote_id));
}

#[tokio::test]
async fn message_keeps_stable_id_through_promotion() {
    let w = world();
    w.transport.set_send_delay(Duration::from_millis(20));
    let id = ConversationId::Remote(RemoteId::random());
    let mut items = w.client.watch_conversation_items(id);

    let pending = w
        .client
        .send_message(MessageInput::text("hi"), id, None)
        .await
        .unwrap();
    let stable = pending.id().stable_id();

    let is_sent = |s: &PaginatedList<ConversationItem>| {
        s.items
            .first()
            .and_then(ConversationItem::as_message)
            .is_some_and(|m| m.status == SendStatus::Sent)
    };

    let sending = until(&mut items, |s| !s.items.is_empty()).await;
    assert_eq!(sending.items[0].stable_id(), stable);

    let sent = if is_sent(&sending) {
        sending
    } else {
        until(&mut items, is_sent).await
    };
    assert_eq!(sent.items[0].stable_id(), stable);
    assert!(sent.items[0].remote_id().is_some());
}

// ============================================================================
// Ordering & Pagination
// ============================================================================

#[tokio::test]
async fn live_item_before_first_page_is_ordered_by_time() {
    let w = world();
    let conversation = RemoteId::random();
    w.transport.set_fetch_delay(Duration::from_millis(50));
    w.transport.queue_page(Ok(Page {
        entries: PageEntries::Items(vec![
            remote_message(conversation, "older", 10),
            remote_message(conversation, "oldest", 20),
        ]),
        next_cursor: None,
        has_more: false,
    }));

    let mut items = w
        .client
        .watch_conversation_items(ConversationId::Remote(conversation));
    let first = items.next();
    let live = async {
        wait_for_subscribers(&w.transport, 1).await;
        w.transport.emit(RemoteEvent::Conversation {
            conversation_id: conversation,
            event: ConversationEvent::ItemCreated(remote_message(conversation, "live", 0)),
        });
    };
    let (first, ()) = tokio::join!(first, live);
    let first = first.unwrap().unwrap();

    let snapshot = if first.items.len() == 3 {
        first
    } else {
        until(&mut items, |s| s.items.len() == 3).await
    };
    let texts: Vec<&str> = snapshot.items.iter().map(text_of).collect();
    assert_eq!(texts, vec!["live", "older", "oldest"]);
}

#[tokio::test]
async fn concurrent_load_more_fetches_once() {
    let w = world();
    w.transport.set_fetch_delay(Duration::from_millis(30));

    let (a, b, c) = tokio::join!(
        w.client.load_more_conversations(),
        w.client.load_more_conversations(),
        w.client.load_more_conversations(),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(w.transport.fetch_count(), 1);
}

#[tokio::test]
async fn duplicate_created_event_is_listed_once() {
    let w = world();
    let mut list = w.client.watch_conversations();
    until(&mut list, |s| !s.has_more).await;
    wait_for_subscribers(&w.transport, 1).await;

    let conversation = Conversation {
        id: ConversationId::Remote(RemoteId::random()),
        title: Some("Lab results".into()),
        subtitle: None,
        inbox_preview_title: "Lab results".into(),
        last_message_preview: None,
        last_modified: Utc::now(),
        unread_count: 1,
        participants: vec![],
    };
    for _ in 0..2 {
        w.transport.emit(RemoteEvent::Conversations(
            ConversationListEvent::Created(conversation.clone()),
        ));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snapshot = until(&mut list, |s| !s.items.is_empty()).await;
    assert_eq!(snapshot.items, vec![conversation]);
}

// ============================================================================
// Drafts
// ============================================================================

#[tokio::test]
async fn draft_promotion_moves_queued_messages() {
    let w = world();
    w.transport.set_send_delay(Duration::from_millis(20));
    let draft = w
        .client
        .create_draft_conversation(Some("Follow-up".into()), vec![]);
    let mut draft_items = w.client.watch_conversation_items(draft);

    let first = w
        .client
        .send_message(MessageInput::text("one"), draft, None)
        .await
        .unwrap();
    let second = w
        .client
        .send_message(MessageInput::text("two"), draft, None)
        .await
        .unwrap();
    let (a, b) = tokio::join!(first.delivered(), second.delivered());
    assert!(a.is_ok() && b.is_ok());

    let creations = w
        .transport
        .sent_mutations()
        .iter()
        .filter(|m| matches!(m, Mutation::CreateConversation { .. }))
        .count();
    assert_eq!(creations, 1);

    let snapshot = until(&mut draft_items, |s| {
        s.items.len() == 2 && s.items.iter().all(|item| !item.conversation_id().is_local())
    })
    .await;
    let remote = snapshot.items[0].conversation_id();

    // The remote id shows the same timeline
    let mut remote_items = w.client.watch_conversation_items(remote);
    let by_remote = until(&mut remote_items, |s| s.items.len() == 2).await;
    assert_eq!(by_remote.items, snapshot.items);

    // And the draft's conversation stream follows it
    let mut conversation = w.client.watch_conversation(draft);
    let current = tokio::time::timeout(Duration::from_secs(1), conversation.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(current.id, remote);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn retry_is_only_allowed_after_failure() {
    let w = world();
    let id = ConversationId::Remote(RemoteId::random());
    let mut items = w.client.watch_conversation_items(id);
    w.transport.set_send_delay(Duration::from_millis(50));
    w.transport
        .fail_next_send(TransportError::Network("offline".into()));

    let pending = w
        .client
        .send_message(MessageInput::text("hi"), id, None)
        .await
        .unwrap();
    let local = pending.id();

    // Still in flight
    let early = w.client.retry_sending_message(local, id).await;
    assert!(matches!(early, Err(SyncError::InvalidState(_))));
    assert!(pending.delivered().await.is_err());

    let sent = w.client.retry_sending_message(local, id).await.unwrap();
    assert_eq!(sent.stable_id(), local.stable_id());

    let again = w.client.retry_sending_message(sent, id).await;
    assert!(matches!(again, Err(SyncError::InvalidState(_))));

    let snapshot = until(&mut items, |s| {
        s.items.iter().any(|item| {
            item.as_message()
                .is_some_and(|message| message.status == SendStatus::Sent)
        })
    })
    .await;
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].stable_id(), local.stable_id());
    assert_eq!(text_of(&snapshot.items[0]), "hi");

    let contents: Vec<_> = w
        .transport
        .sent_mutations()
        .into_iter()
        .filter_map(|mutation| match mutation {
            Mutation::SendMessage { content, .. } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(
        contents,
        vec![
            OutgoingContent::Text { text: "hi".into() },
            OutgoingContent::Text { text: "hi".into() },
        ]
    );
}

#[tokio::test]
async fn media_retry_does_not_upload_twice() {
    let w = world();
    let id = ConversationId::Remote(RemoteId::random());
    w.transport.fail_next_send(TransportError::Timeout);
    let input = MessageInput::Media {
        kind: MediaKind::Document,
        file: FileLocal {
            uri: "file:///docs/referral.pdf".into(),
            file_name: Some("referral.pdf".into()),
            mime_type: "application/pdf".into(),
        },
    };

    let pending = w.client.send_message(input, id, None).await.unwrap();
    let local = pending.id();
    assert!(pending.delivered().await.is_err());
    w.client.retry_sending_message(local, id).await.unwrap();

    assert_eq!(w.uploader.uploads().len(), 1);
}

#[tokio::test]
async fn rejected_delete_restores_message() {
    let w = world();
    let id = ConversationId::Remote(RemoteId::random());
    let mut items = w.client.watch_conversation_items(id);

    let sent = w
        .client
        .send_message(MessageInput::text("keep me"), id, None)
        .await
        .unwrap()
        .delivered()
        .await
        .unwrap();

    w.transport.fail_next_send(TransportError::Rejected {
        code: 403,
        message: "not allowed".into(),
    });
    let result = w.client.delete_message(sent, id).await;
    assert!(matches!(result, Err(SyncError::ServerRejected { code: 403, .. })));

    let snapshot = until(&mut items, |s| {
        s.items.len() == 1 && text_of(&s.items[0]) == "keep me"
    })
    .await;
    assert_eq!(snapshot.items[0].stable_id(), sent.stable_id());
}

// ============================================================================
// Session & Typing
// ============================================================================

#[tokio::test]
async fn signed_out_client_touches_nothing() {
    let w = world();
    w.session.set_authenticated(false);
    let id = ConversationId::Remote(RemoteId::random());

    let mut items = w.client.watch_conversation_items(id);
    assert_eq!(items.next().await, Some(Err(SyncError::AuthenticationRequired)));
    assert!(items.next().await.is_none());

    assert_eq!(
        w.client.set_typing(id, true).await,
        Err(SyncError::AuthenticationRequired)
    );
    assert!(w.transport.sent_mutations().is_empty());
    assert!(w.transport.subscriptions().is_empty());
    assert_eq!(w.transport.fetch_count(), 0);
}

#[tokio::test]
async fn typing_goes_out_once_per_window() {
    let w = world();
    let id = ConversationId::Remote(RemoteId::random());

    for _ in 0..5 {
        w.client.set_typing(id, true).await.unwrap();
        w.clock.advance(ChronoDuration::milliseconds(500));
    }
    w.clock.advance(ChronoDuration::seconds(1));
    w.client.set_typing(id, true).await.unwrap();

    let typing: Vec<bool> = w
        .transport
        .sent_mutations()
        .into_iter()
        .filter_map(|m| match m {
            Mutation::SetTyping { is_typing, .. } => Some(is_typing),
            _ => None,
        })
        .collect();
    assert_eq!(typing, vec![true, true]);
}
