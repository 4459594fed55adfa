//! Identity types for convo-sync.
//!
//! Messages carry a dual identity: a device-made [`ClientId`] that exists from
//! the moment a message is drafted, and a server-made [`RemoteId`] that only
//! exists once the server has confirmed it. [`MessageId::stable_id`] gives the
//! one value that survives the transition.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A client-generated identifier (messages and draft conversations).
///
/// UUID v4, generated on-device before any network round-trip.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Create a new random ClientId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

/// A server-assigned identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteId(Uuid);

impl RemoteId {
    /// Wrap a server-provided UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create a random RemoteId (for testing and mocks).
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteId({})", self.0)
    }
}

/// The identifier that stays constant across a message's Local → Remote
/// promotion. Use it for list identity (diffing, selection, scroll anchors).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StableId(Uuid);

impl StableId {
    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<ClientId> for StableId {
    fn from(id: ClientId) -> Self {
        Self(id.0)
    }
}

impl From<RemoteId> for StableId {
    fn from(id: RemoteId) -> Self {
        Self(id.0)
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StableId({})", self.0)
    }
}

/// Identifier for a message, with an optimistic-friendly shape.
///
/// A message that is sending or failed only has a [`ClientId`] and is
/// [`MessageId::Local`]. Once the server has it, it is [`MessageId::Remote`]
/// and keeps the client id it was created with (if it was created on this
/// device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageId {
    /// Exists only on this device.
    Local {
        /// Device-made identifier.
        client_id: ClientId,
    },
    /// Known to the server.
    Remote {
        /// Device-made identifier, if the message was sent from this device.
        client_id: Option<ClientId>,
        /// Server-made identifier.
        remote_id: RemoteId,
    },
}

impl MessageId {
    /// A fresh local identity.
    pub fn local(client_id: ClientId) -> Self {
        Self::Local { client_id }
    }

    /// A remote identity.
    pub fn remote(client_id: Option<ClientId>, remote_id: RemoteId) -> Self {
        Self::Remote {
            client_id,
            remote_id,
        }
    }

    /// `client_id ?? remote_id`. Never changes across promotion.
    pub fn stable_id(&self) -> StableId {
        match self {
            Self::Local { client_id } => (*client_id).into(),
            Self::Remote {
                client_id: Some(client_id),
                ..
            } => (*client_id).into(),
            Self::Remote {
                client_id: None,
                remote_id,
            } => (*remote_id).into(),
        }
    }

    /// The client id, if any.
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Self::Local { client_id } => Some(*client_id),
            Self::Remote { client_id, .. } => *client_id,
        }
    }

    /// The remote id, if the server knows this message.
    pub fn remote_id(&self) -> Option<RemoteId> {
        match self {
            Self::Local { .. } => None,
            Self::Remote { remote_id, .. } => Some(*remote_id),
        }
    }

    /// Whether the server knows this message.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Promote to a remote identity, keeping the client id.
    ///
    /// Promoting an already remote identity returns it unchanged, so a second
    /// acknowledgment can never rewrite the stable id.
    pub fn promote(self, remote_id: RemoteId) -> Self {
        match self {
            Self::Local { client_id } => Self::Remote {
                client_id: Some(client_id),
                remote_id,
            },
            remote @ Self::Remote { .. } => remote,
        }
    }
}

/// Identifier for a conversation.
///
/// Draft conversations only exist on this device until they are created
/// server-side, at which point their queued messages move to the remote id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum ConversationId {
    /// Draft, not yet known to the server.
    Local(ClientId),
    /// Known to the server.
    Remote(RemoteId),
}

impl ConversationId {
    /// Whether this is a draft id.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The remote id, if any.
    pub fn remote_id(&self) -> Option<RemoteId> {
        match self {
            Self::Local(_) => None,
            Self::Remote(id) => Some(*id),
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{}", id),
            Self::Remote(id) => write!(f, "remote:{}", id),
        }
    }
}

/// Identifier for a user (participant, provider, current user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Wrap a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create a random UserId (for testing).
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque pagination cursor handed out by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageCursor(String);

impl PageCursor {
    /// Wrap a server cursor.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw cursor value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
