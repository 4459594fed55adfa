//! Conversation items: messages, their content and send status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, MessageId, RemoteId, StableId, SyncError, UserId};

/// A file hosted on this device, not yet (or not only) known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocal {
    /// Device-local uri, as handed out by the platform file provider.
    pub uri: String,
    /// Optional display name.
    pub file_name: Option<String>,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
}

/// A file resource the server has confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    /// Server-side file id.
    pub id: RemoteId,
    /// Ephemeral download url.
    pub url: String,
    /// Optional display name.
    pub file_name: Option<String>,
    /// MIME type.
    pub mime_type: String,
    /// Thumbnail url (documents only).
    pub thumbnail_url: Option<String>,
}

/// Where a media message's bytes currently live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FileSource {
    /// On-device only, upload pending.
    Local {
        /// The device file.
        file: FileLocal,
    },
    /// Uploaded. The local file is kept (when known) for instant preview.
    Uploaded {
        /// The device file this upload came from, if sent from this device.
        local: Option<FileLocal>,
        /// The server resource.
        upload: FileUpload,
    },
}

impl FileSource {
    /// Uri to display: the local file when we have it, the download url otherwise.
    pub fn stable_uri(&self) -> &str {
        match self {
            Self::Local { file } => &file.uri,
            Self::Uploaded {
                local: Some(file), ..
            } => &file.uri,
            Self::Uploaded {
                local: None,
                upload,
            } => &upload.url,
        }
    }

    /// MIME type of the file.
    pub fn mime_type(&self) -> &str {
        match self {
            Self::Local { file } => &file.mime_type,
            Self::Uploaded { upload, .. } => &upload.mime_type,
        }
    }

    /// File name, if known.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::Local { file } => file.file_name.as_deref(),
            Self::Uploaded { upload, .. } => upload.file_name.as_deref(),
        }
    }

    /// Whether the file still has to be uploaded.
    pub fn needs_upload(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

/// The kind of media a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Arbitrary document (PDF, ...).
    Document,
    /// Voice message or audio file.
    Audio {
        /// Best-effort duration in milliseconds.
        duration_ms: Option<u64>,
    },
}

/// Media content: kind plus file source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// What the file is.
    pub kind: MediaKind,
    /// Where the file lives.
    pub source: FileSource,
}

/// Message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// Image, document or audio.
    Media(Media),
    /// Tombstone: metadata kept, content erased.
    Deleted,
}

impl MessageContent {
    /// Short human-readable preview of the content.
    pub fn preview(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Media(media) => media.source.file_name(),
            Self::Deleted => None,
        }
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Author {
    /// The signed-in user of this device.
    CurrentUser,
    /// Another conversation participant.
    Participant(Participant),
    /// Automated/system message.
    System {
        /// Display name of the system sender.
        name: String,
    },
    /// A participant whose account no longer exists.
    DeletedParticipant,
    /// Unknown or not yet resolved author.
    Unknown,
}

/// A conversation participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub display_name: String,
    /// Avatar url.
    pub avatar_url: Option<String>,
}

/// Delivery state of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendStatus {
    /// Waiting on the server.
    Sending,
    /// Confirmed by the server.
    Sent,
    /// Delivery failed; the message can be retried.
    ErrorSending {
        /// Why delivery failed.
        cause: SyncError,
    },
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Dual identity.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Who wrote it.
    pub author: Author,
    /// Creation time (device clock for local messages, server clock once remote).
    pub created_at: DateTime<Utc>,
    /// Delivery state.
    pub status: SendStatus,
    /// Content.
    pub content: MessageContent,
    /// Message this one replies to.
    pub reply_to: Option<RemoteId>,
}

impl Message {
    /// Stable identity for list diffing.
    pub fn stable_id(&self) -> StableId {
        self.id.stable_id()
    }

    /// Whether this message is a tombstone.
    pub fn is_deleted(&self) -> bool {
        matches!(self.content, MessageContent::Deleted)
    }

    /// Copy of this message with its content erased.
    pub fn tombstone(&self) -> Self {
        Self {
            content: MessageContent::Deleted,
            ..self.clone()
        }
    }
}

/// Server-generated timeline entry that is not a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationActivity {
    /// Server id.
    pub id: RemoteId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// When it happened.
    pub created_at: DateTime<Utc>,
    /// What happened.
    pub kind: ActivityKind,
}

/// Kinds of [`ConversationActivity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    /// A participant joined.
    ParticipantJoined {
        /// Who joined.
        participant: Participant,
    },
    /// A participant left.
    ParticipantLeft {
        /// Who left.
        participant: Participant,
    },
}

/// Anything that shows up in a conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum ConversationItem {
    /// A message.
    Message(Message),
    /// A server activity entry.
    Activity(ConversationActivity),
}

impl ConversationItem {
    /// Stable identity for list diffing.
    pub fn stable_id(&self) -> StableId {
        match self {
            Self::Message(message) => message.stable_id(),
            Self::Activity(activity) => activity.id.into(),
        }
    }

    /// Server id, if known.
    pub fn remote_id(&self) -> Option<RemoteId> {
        match self {
            Self::Message(message) => message.id.remote_id(),
            Self::Activity(activity) => Some(activity.id),
        }
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Message(message) => message.created_at,
            Self::Activity(activity) => activity.created_at,
        }
    }

    /// Owning conversation.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::Message(message) => message.conversation_id,
            Self::Activity(activity) => activity.conversation_id,
        }
    }

    /// The message, if this item is one.
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Activity(_) => None,
        }
    }
}

/// What a caller hands in to send a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageInput {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// A device file to upload and send.
    Media {
        /// What the file is.
        kind: MediaKind,
        /// The device file.
        file: FileLocal,
    },
}

impl MessageInput {
    /// Convenience constructor for text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The content a freshly created pending message carries.
    pub fn into_content(self) -> MessageContent {
        match self {
            Self::Text { text } => MessageContent::Text { text },
            Self::Media { kind, file } => MessageContent::Media(Media {
                kind,
                source: FileSource::Local { file },
            }),
        }
    }
}
