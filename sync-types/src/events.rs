//! Remote push events.
//!
//! Events arrive over per-topic subscriptions: one for the conversation list,
//! one per remote conversation for its items.

use serde::{Deserialize, Serialize};

use crate::{Conversation, ConversationId, ConversationItem, RemoteId};

/// Events on the conversation list topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationListEvent {
    /// A conversation was created (possibly by another device or participant).
    Created(Conversation),
    /// Participants, unread count, preview or typing state changed.
    Updated(Conversation),
    /// A conversation was removed.
    Deleted {
        /// Which one.
        conversation_id: ConversationId,
    },
}

/// Events on a single conversation's topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// A message or activity was created.
    ItemCreated(ConversationItem),
    /// A message or activity changed (status, content).
    ItemUpdated(ConversationItem),
    /// A message was deleted server-side.
    MessageDeleted {
        /// Server id of the deleted message.
        remote_id: RemoteId,
    },
}

/// Anything a subscription can deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum RemoteEvent {
    /// Conversation list topic.
    Conversations(ConversationListEvent),
    /// A conversation topic.
    Conversation {
        /// The conversation the event belongs to.
        conversation_id: RemoteId,
        /// The event.
        event: ConversationEvent,
    },
}
