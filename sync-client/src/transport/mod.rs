//! Transport abstraction for convo-sync.
//!
//! This module provides a pluggable boundary to the messaging backend
//! (GraphQL, REST + websocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and request-oriented:
//! - `send()` executes one mutation and returns the server's answer
//! - `subscribe()` opens a push stream for a topic
//! - `fetch_page()` fetches one page of history
//!
//! Timeouts and reconnection are the transport's business; they surface here
//! as ordinary [`TransportError`]s.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let response = transport.send(Mutation::MarkAsRead { conversation_id }).await?;
//! let mut events = transport.subscribe(Topic::Conversations).await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convo_sync_types::{
    ClientId, Conversation, ConversationItem, MediaKind, PageCursor, RemoteEvent, RemoteId,
    SyncError, UserId,
};
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network failure (retryable).
    #[error("network failure: {0}")]
    Network(String),

    /// The server refused the request.
    #[error("rejected by server (code {code}): {message}")]
    Rejected {
        /// Server error code.
        code: i32,
        /// Server-provided message.
        message: String,
    },

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Connection closed.
    #[error("connection closed")]
    Closed,
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected { code, message } => SyncError::ServerRejected { code, message },
            other => SyncError::Network(other.to_string()),
        }
    }
}

/// Message content as sent over the wire. Media is always referenced by its
/// upload id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingContent {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// Previously uploaded media.
    Media {
        /// What the file is.
        kind: MediaKind,
        /// Server id of the upload.
        upload_id: RemoteId,
    },
}

/// A state-changing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create a conversation server-side.
    CreateConversation {
        /// Requested title.
        title: Option<String>,
        /// Participants to invite.
        participant_ids: Vec<UserId>,
    },
    /// Send a message. `client_id` lets the server echo it back for matching.
    SendMessage {
        /// Target conversation.
        conversation_id: RemoteId,
        /// Device-made message id.
        client_id: ClientId,
        /// Content.
        content: OutgoingContent,
        /// Message replied to.
        reply_to: Option<RemoteId>,
    },
    /// Delete a message.
    DeleteMessage {
        /// Owning conversation.
        conversation_id: RemoteId,
        /// The message.
        remote_id: RemoteId,
    },
    /// Mark everything in a conversation as read.
    MarkAsRead {
        /// The conversation.
        conversation_id: RemoteId,
    },
    /// Update the current user's typing indicator.
    SetTyping {
        /// The conversation.
        conversation_id: RemoteId,
        /// Typing or not.
        is_typing: bool,
    },
}

/// Server answer to a [`Mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResponse {
    /// The created conversation.
    ConversationCreated(Conversation),
    /// The server accepted a message.
    MessageSent {
        /// Echo of the device-made id.
        client_id: ClientId,
        /// Server id.
        remote_id: RemoteId,
        /// Server timestamp.
        created_at: DateTime<Utc>,
    },
    /// Accepted, nothing to return.
    Done,
}

/// A push subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Conversation list changes.
    Conversations,
    /// Items of one conversation.
    Conversation(RemoteId),
}

impl Topic {
    /// Whether `event` belongs to this topic.
    pub fn matches(&self, event: &RemoteEvent) -> bool {
        match (self, event) {
            (Topic::Conversations, RemoteEvent::Conversations(_)) => true,
            (Topic::Conversation(id), RemoteEvent::Conversation { conversation_id, .. }) => {
                id == conversation_id
            }
            _ => false,
        }
    }
}

/// Which list a page request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageScope {
    /// The conversation list.
    Conversations,
    /// Items of one conversation.
    ConversationItems(RemoteId),
}

/// Request for one page of history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Which list.
    pub scope: PageScope,
    /// Continue after this cursor (`None` = newest page).
    pub cursor: Option<PageCursor>,
    /// Maximum page size.
    pub limit: u32,
}

/// Entries of a [`Page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEntries {
    /// Conversations, most recently active first.
    Conversations(Vec<Conversation>),
    /// Conversation items, newest first.
    Items(Vec<ConversationItem>),
}

/// One page of history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// The entries.
    pub entries: PageEntries,
    /// Cursor for the next older page.
    pub next_cursor: Option<PageCursor>,
    /// Whether older pages exist.
    pub has_more: bool,
}

/// Transport trait for talking to the messaging backend.
///
/// Implementations handle the underlying protocol (GraphQL over HTTP and
/// websocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Execute a mutation.
    async fn send(&self, mutation: Mutation) -> Result<MutationResponse, TransportError>;

    /// Open a push stream for `topic`.
    ///
    /// The stream ends when the underlying subscription closes; callers
    /// re-subscribe to resume.
    async fn subscribe(&self, topic: Topic)
        -> Result<BoxStream<'static, RemoteEvent>, TransportError>;

    /// Fetch one page of history.
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, TransportError>;
}
