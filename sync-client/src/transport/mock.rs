//! Mock transport for testing.
//!
//! Allows queueing responses and pages, forcing failures, pushing events to
//! subscribers and capturing sent mutations for verification.

use super::{
    Mutation, MutationResponse, Page, PageEntries, PageRequest, Topic, Transport, TransportError,
};
use async_trait::async_trait;
use chrono::Utc;
use convo_sync_types::{Conversation, ConversationId, RemoteEvent, RemoteId};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Mock transport for testing.
///
/// Mutations without a queued response get a plausible default (a fresh
/// conversation, a fresh message id, or `Done`). Fetches without a queued
/// page get an empty last page.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    events: broadcast::Sender<RemoteEvent>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    sent_mutations: Vec<Mutation>,
    responses: VecDeque<Result<MutationResponse, TransportError>>,
    pages: VecDeque<Result<Page, TransportError>>,
    page_requests: Vec<PageRequest>,
    subscriptions: Vec<Topic>,
    fail_next_send: Option<TransportError>,
    fail_next_subscribe: Option<TransportError>,
    send_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            events,
        }
    }

    /// Queue the answer for the next `send()` call.
    pub fn queue_response(&self, response: Result<MutationResponse, TransportError>) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.push_back(response);
    }

    /// Queue the answer for the next `fetch_page()` call.
    pub fn queue_page(&self, page: Result<Page, TransportError>) {
        let mut inner = self.inner.lock().unwrap();
        inner.pages.push_back(page);
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error);
    }

    /// Cause the next subscribe() to fail with the given error.
    pub fn fail_next_subscribe(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_subscribe = Some(error);
    }

    /// Delay every send() answer (the mutation is recorded immediately).
    pub fn set_send_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.send_delay = Some(delay);
    }

    /// Delay every fetch_page() answer (the request is recorded immediately).
    pub fn set_fetch_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.fetch_delay = Some(delay);
    }

    /// Get all mutations that were sent.
    pub fn sent_mutations(&self) -> Vec<Mutation> {
        let inner = self.inner.lock().unwrap();
        inner.sent_mutations.clone()
    }

    /// Get all page requests.
    pub fn page_requests(&self) -> Vec<PageRequest> {
        let inner = self.inner.lock().unwrap();
        inner.page_requests.clone()
    }

    /// Number of fetch_page() calls.
    pub fn fetch_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.page_requests.len()
    }

    /// Topics subscribed to so far (one entry per subscribe() call).
    pub fn subscriptions(&self) -> Vec<Topic> {
        let inner = self.inner.lock().unwrap();
        inner.subscriptions.clone()
    }

    /// Push an event to every open subscription stream. Returns how many
    /// streams received it.
    pub fn emit(&self, event: RemoteEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    /// Number of open subscription streams.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
        }
    }
}

fn default_response(mutation: &Mutation) -> MutationResponse {
    match mutation {
        Mutation::CreateConversation { title, .. } => {
            MutationResponse::ConversationCreated(Conversation {
                id: ConversationId::Remote(RemoteId::random()),
                title: title.clone(),
                subtitle: None,
                inbox_preview_title: title.clone().unwrap_or_else(|| "Conversation".to_string()),
                last_message_preview: None,
                last_modified: Utc::now(),
                unread_count: 0,
                participants: Vec::new(),
            })
        }
        Mutation::SendMessage { client_id, .. } => MutationResponse::MessageSent {
            client_id: *client_id,
            remote_id: RemoteId::random(),
            created_at: Utc::now(),
        },
        _ => MutationResponse::Done,
    }
}

fn empty_page(request: &PageRequest) -> Page {
    let entries = match request.scope {
        super::PageScope::Conversations => PageEntries::Conversations(Vec::new()),
        super::PageScope::ConversationItems(_) => PageEntries::Items(Vec::new()),
    };
    Page {
        entries,
        next_cursor: None,
        has_more: false,
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, mutation: Mutation) -> Result<MutationResponse, TransportError> {
        let (result, delay) = {
            let mut inner = self.inner.lock().unwrap();
            inner.sent_mutations.push(mutation.clone());

            // Check for forced failure
            let result = match inner.fail_next_send.take() {
                Some(error) => Err(error),
                None => inner
                    .responses
                    .pop_front()
                    .unwrap_or_else(|| Ok(default_response(&mutation))),
            };
            (result, inner.send_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn subscribe(
        &self,
        topic: Topic,
    ) -> Result<BoxStream<'static, RemoteEvent>, TransportError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(error) = inner.fail_next_subscribe.take() {
                return Err(error);
            }
            inner.subscriptions.push(topic);
        }

        let receiver = self.events.subscribe();
        let events = stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if topic.matches(&event) => return Some((event, receiver)),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page, TransportError> {
        let (result, delay) = {
            let mut inner = self.inner.lock().unwrap();
            inner.page_requests.push(request.clone());
            let result = inner
                .pages
                .pop_front()
                .unwrap_or_else(|| Ok(empty_page(&request)));
            (result, inner.fetch_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}
