//! # sync-types
//!
//! Data model types for the convo-sync messaging engine.
//!
//! This crate provides the foundational types used across all convo-sync crates:
//! - [`MessageId`], [`ConversationId`], [`StableId`] - Dual local/remote identity
//! - [`Message`], [`ConversationItem`], [`Conversation`] - Timeline and inbox entities
//! - [`ConversationEvent`], [`ConversationListEvent`] - Remote push events
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod conversation;
mod error;
mod events;
mod ids;
mod message;

pub use conversation::{Conversation, CreationState, PaginatedList, ParticipantInConversation};
pub use error::{SyncError, PROVIDER_MISSING_PERMISSION_CODE, PROVIDER_NOT_FOUND_CODE};
pub use events::{ConversationEvent, ConversationListEvent, RemoteEvent};
pub use ids::{ClientId, ConversationId, MessageId, PageCursor, RemoteId, StableId, UserId};
pub use message::{
    ActivityKind, Author, ConversationActivity, ConversationItem, FileLocal, FileSource,
    FileUpload, Media, MediaKind, Message, MessageContent, MessageInput, Participant, SendStatus,
};
