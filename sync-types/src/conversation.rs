//! Conversations, drafts and paginated lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, Participant, RemoteId, SyncError};

/// A participant as seen from a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInConversation {
    /// The participant.
    pub participant: Participant,
    /// Typing indicator expiry, if the participant is typing.
    pub typing_until: Option<DateTime<Utc>>,
    /// Read marker: everything up to this instant was seen.
    pub seen_until: Option<DateTime<Utc>>,
}

impl ParticipantInConversation {
    /// Whether the typing indicator is live at `now`.
    pub fn is_typing(&self, now: DateTime<Utc>) -> bool {
        self.typing_until.is_some_and(|until| until > now)
    }
}

/// A conversation as shown in an inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Local (draft) or remote id.
    pub id: ConversationId,
    /// User-chosen title.
    pub title: Option<String>,
    /// Secondary line.
    pub subtitle: Option<String>,
    /// Title to show in the inbox (falls back to a placeholder for drafts).
    pub inbox_preview_title: String,
    /// Preview of the latest content.
    pub last_message_preview: Option<String>,
    /// Last activity.
    pub last_modified: DateTime<Utc>,
    /// Messages the current user has not read.
    pub unread_count: u32,
    /// Current participants, in server order.
    pub participants: Vec<ParticipantInConversation>,
}

/// Creation lifecycle of a draft conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CreationState {
    /// Exists only on this device.
    ToBeCreated,
    /// Creation request in flight.
    Creating,
    /// Last creation attempt failed; can be retried.
    ErrorCreating {
        /// Why creation failed.
        cause: SyncError,
    },
    /// Created server-side.
    Created {
        /// The server id.
        remote_id: RemoteId,
    },
}

/// An ordered snapshot plus whether older history is available.
///
/// Snapshots are values: consumers never mutate them, every update is a new
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedList<T> {
    /// Items, newest first.
    pub items: Vec<T>,
    /// More history can be loaded.
    pub has_more: bool,
}

impl<T> PaginatedList<T> {
    /// An empty list.
    pub fn empty(has_more: bool) -> Self {
        Self {
            items: Vec::new(),
            has_more,
        }
    }
}

impl<T> Default for PaginatedList<T> {
    fn default() -> Self {
        Self::empty(true)
    }
}
