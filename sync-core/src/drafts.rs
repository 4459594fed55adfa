//! Draft conversation lifecycle.
//!
//! A draft is created locally and only reaches the server when its first
//! message is sent (or when creation is requested explicitly).
//!
//! ```text
//! ToBeCreated ──start──▶ Creating ──ok──▶ Created
//!                          │  ▲
//!                        fail │
//!                          ▼  │ start
//!                       ErrorCreating
//! ```

use chrono::{DateTime, Utc};
use convo_sync_types::{
    ClientId, Conversation, ConversationId, CreationState, RemoteId, SyncError, UserId,
};
use std::collections::HashMap;

/// Events that drive draft creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftEvent {
    /// A creation request is being sent.
    CreationStarted,
    /// The creation request failed.
    CreationFailed {
        /// Why.
        cause: SyncError,
    },
    /// The server created the conversation.
    CreationSucceeded {
        /// Server id of the new conversation.
        remote_id: RemoteId,
    },
}

/// A conversation that may only exist on this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftConversation {
    /// Local id, used as `ConversationId::Local`.
    pub id: ClientId,
    /// Creation lifecycle.
    pub state: CreationState,
    /// Title requested by the user.
    pub title: Option<String>,
    /// Participants to invite on creation.
    pub participant_ids: Vec<UserId>,
    /// When the draft was made.
    pub created_at: DateTime<Utc>,
}

impl DraftConversation {
    /// A new draft in `ToBeCreated`.
    pub fn new(
        id: ClientId,
        title: Option<String>,
        participant_ids: Vec<UserId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state: CreationState::ToBeCreated,
            title,
            participant_ids,
            created_at,
        }
    }

    /// Process an event, returning the next creation state.
    pub fn on_event(&self, event: DraftEvent) -> Result<CreationState, SyncError> {
        match (&self.state, event) {
            (
                CreationState::ToBeCreated | CreationState::ErrorCreating { .. },
                DraftEvent::CreationStarted,
            ) => Ok(CreationState::Creating),
            (CreationState::Creating, DraftEvent::CreationFailed { cause }) => {
                Ok(CreationState::ErrorCreating { cause })
            }
            (CreationState::Creating, DraftEvent::CreationSucceeded { remote_id }) => {
                Ok(CreationState::Created { remote_id })
            }
            (
                CreationState::Created { remote_id: existing },
                DraftEvent::CreationSucceeded { remote_id },
            ) if *existing == remote_id => Ok(self.state.clone()),
            (state, event) => Err(SyncError::InvalidState(format!(
                "draft {} cannot handle {:?} while {:?}",
                self.id, event, state
            ))),
        }
    }

    /// The server id, once created.
    pub fn remote_id(&self) -> Option<RemoteId> {
        match self.state {
            CreationState::Created { remote_id } => Some(remote_id),
            _ => None,
        }
    }

    /// Inbox view of the draft.
    pub fn as_conversation(&self, placeholder_title: &str) -> Conversation {
        Conversation {
            id: ConversationId::Local(self.id),
            title: self.title.clone(),
            subtitle: None,
            inbox_preview_title: self
                .title
                .clone()
                .unwrap_or_else(|| placeholder_title.to_string()),
            last_message_preview: None,
            last_modified: self.created_at,
            unread_count: 0,
            participants: Vec::new(),
        }
    }
}

/// All drafts known to this client.
#[derive(Debug, Clone, Default)]
pub struct DraftRegistry {
    drafts: HashMap<ClientId, DraftConversation>,
}

impl DraftRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new draft.
    pub fn insert(&mut self, draft: DraftConversation) {
        self.drafts.insert(draft.id, draft);
    }

    /// Look up a draft.
    pub fn get(&self, id: ClientId) -> Option<&DraftConversation> {
        self.drafts.get(&id)
    }

    /// Whether a draft with this id exists.
    pub fn contains(&self, id: ClientId) -> bool {
        self.drafts.contains_key(&id)
    }

    /// Apply an event to a draft and return its updated value.
    pub fn apply(&mut self, id: ClientId, event: DraftEvent) -> Result<DraftConversation, SyncError> {
        let draft = self
            .drafts
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("draft conversation {}", id)))?;
        draft.state = draft.on_event(event)?;
        Ok(draft.clone())
    }

    /// Map a draft id to its remote id once created. Other ids pass through.
    pub fn resolve(&self, id: ConversationId) -> ConversationId {
        match id {
            ConversationId::Local(local) => self
                .get(local)
                .and_then(DraftConversation::remote_id)
                .map(ConversationId::Remote)
                .unwrap_or(id),
            remote @ ConversationId::Remote(_) => remote,
        }
    }
}
