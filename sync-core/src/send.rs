//! Message send state machine.
//!
//! Pure transitions over a message's identity and delivery status. The
//! machine never performs I/O: `sync-client` runs the network calls and feeds
//! their outcome back in as [`SendEvent`]s.
//!
//! ```text
//! Local/Sending ──ack──▶ Remote/Sent
//!      │                      │
//!    fail                  delete
//!      ▼                      ▼
//! Local/ErrorSending      tombstone
//!      │
//!    retry ──▶ Local/Sending
//! ```

use chrono::{DateTime, Utc};
use convo_sync_types::{
    Author, ClientId, ConversationId, ConversationItem, FileSource, FileUpload, Media, Message,
    MessageContent, MessageId, RemoteId, SendStatus, StableId, SyncError,
};

use crate::timeline::{Change, Timeline};

/// Events that drive a message through its send lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    /// The server confirmed the message under this id.
    Acknowledged {
        /// Server id.
        remote_id: RemoteId,
    },
    /// Delivery failed.
    Failed {
        /// Why.
        cause: SyncError,
    },
    /// User asked to resend a failed message.
    RetryRequested,
    /// User asked to delete the message.
    DeleteRequested,
}

/// Result of a pure transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The message moves to this new value.
    Changed(Message),
    /// The message disappears (a local message that never reached the server).
    Removed,
    /// Nothing to do.
    Unchanged,
}

/// Result of applying a [`SendEvent`] to a timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The message was replaced; `previous` is the value before.
    Changed {
        /// Value before the transition (used for rollbacks).
        previous: Message,
    },
    /// The message was removed from the timeline.
    Removed {
        /// The removed value.
        previous: Message,
    },
    /// No change.
    Unchanged,
}

/// Compute the next state of `message` for `event`.
///
/// Acknowledgments and failures are idempotent: a duplicate or late event
/// yields [`Step::Unchanged`]. Retrying anything but a failed local message,
/// or deleting a message that is still in flight, is an
/// [`SyncError::InvalidState`].
pub fn on_event(message: &Message, event: SendEvent) -> Result<Step, SyncError> {
    match (&message.id, &message.status, event) {
        // Acknowledgment promotes the identity exactly once
        (MessageId::Local { .. }, _, SendEvent::Acknowledged { remote_id }) => {
            Ok(Step::Changed(Message {
                id: message.id.promote(remote_id),
                status: SendStatus::Sent,
                ..message.clone()
            }))
        }
        (MessageId::Remote { .. }, SendStatus::Sent, SendEvent::Acknowledged { .. }) => {
            Ok(Step::Unchanged)
        }
        (MessageId::Remote { .. }, _, SendEvent::Acknowledged { .. }) => {
            Ok(Step::Changed(Message {
                status: SendStatus::Sent,
                ..message.clone()
            }))
        }

        // Only an in-flight local send can fail; a late failure after the
        // server confirmed the message is dropped
        (MessageId::Local { .. }, SendStatus::Sending, SendEvent::Failed { cause }) => {
            Ok(Step::Changed(Message {
                status: SendStatus::ErrorSending { cause },
                ..message.clone()
            }))
        }
        (_, _, SendEvent::Failed { .. }) => Ok(Step::Unchanged),

        (MessageId::Local { .. }, SendStatus::ErrorSending { .. }, SendEvent::RetryRequested) => {
            Ok(Step::Changed(Message {
                status: SendStatus::Sending,
                ..message.clone()
            }))
        }
        (_, status, SendEvent::RetryRequested) => Err(SyncError::InvalidState(format!(
            "cannot retry message {} with status {}",
            message.stable_id(),
            describe(status)
        ))),

        (_, _, SendEvent::DeleteRequested) if message.is_deleted() => Ok(Step::Unchanged),
        (MessageId::Remote { .. }, _, SendEvent::DeleteRequested) => {
            Ok(Step::Changed(message.tombstone()))
        }
        (MessageId::Local { .. }, SendStatus::ErrorSending { .. }, SendEvent::DeleteRequested) => {
            Ok(Step::Removed)
        }
        (MessageId::Local { .. }, status, SendEvent::DeleteRequested) => {
            Err(SyncError::InvalidState(format!(
                "cannot delete message {} while it is {}",
                message.stable_id(),
                describe(status)
            )))
        }
    }
}

/// Apply `event` to the message with stable id `id` in `timeline`.
pub fn apply(
    timeline: &mut Timeline<ConversationItem>,
    id: StableId,
    event: SendEvent,
) -> Result<Outcome, SyncError> {
    let previous = find_message(timeline, id)
        .cloned()
        .ok_or_else(|| SyncError::NotFound(format!("message {}", id)))?;

    let deleting = matches!(event, SendEvent::DeleteRequested);
    match on_event(&previous, event)? {
        Step::Changed(next) => {
            timeline.replace(&id, ConversationItem::Message(next));
            if deleting {
                timeline.mark_pending(id);
            }
            Ok(Outcome::Changed { previous })
        }
        Step::Removed => {
            timeline.remove(&id);
            Ok(Outcome::Removed { previous })
        }
        Step::Unchanged => Ok(Outcome::Unchanged),
    }
}

/// Record the server acknowledgment of a send, taking the server's
/// timestamp for the message.
///
/// The timestamp is only taken on the transition itself; a duplicate ack
/// leaves the stored message alone.
pub fn acknowledge(
    timeline: &mut Timeline<ConversationItem>,
    id: StableId,
    remote_id: RemoteId,
    created_at: DateTime<Utc>,
) -> Result<Outcome, SyncError> {
    let outcome = apply(timeline, id, SendEvent::Acknowledged { remote_id })?;
    if matches!(outcome, Outcome::Changed { .. }) {
        timeline.update(&id, |item| {
            if let ConversationItem::Message(message) = item {
                message.created_at = created_at;
            }
        });
    }
    Ok(outcome)
}

/// Mark an optimistic delete as accepted by the server.
pub fn confirm_delete(timeline: &mut Timeline<ConversationItem>, id: StableId) -> bool {
    timeline.clear_pending(&id)
}

/// Undo an optimistic delete.
///
/// Restores `previous` only while our own unconfirmed tombstone is stored. A
/// tombstone the server has pushed in the meantime, or a newer server update,
/// is kept.
pub fn rollback_delete(timeline: &mut Timeline<ConversationItem>, previous: Message) -> Change {
    let id = previous.stable_id();
    if !timeline.clear_pending(&id) {
        return Change::Unchanged;
    }
    match find_message(timeline, id) {
        Some(current) if current.is_deleted() => {
            timeline.replace(&id, ConversationItem::Message(previous))
        }
        _ => Change::Unchanged,
    }
}

/// A new outgoing message in `Local/Sending`.
pub fn pending_message(
    client_id: ClientId,
    conversation_id: ConversationId,
    content: MessageContent,
    created_at: DateTime<Utc>,
    reply_to: Option<RemoteId>,
) -> Message {
    Message {
        id: MessageId::local(client_id),
        conversation_id,
        author: Author::CurrentUser,
        created_at,
        status: SendStatus::Sending,
        content,
        reply_to,
    }
}

/// Record a finished upload on a media message, keeping the local file for
/// preview.
pub fn attach_upload(
    timeline: &mut Timeline<ConversationItem>,
    id: StableId,
    upload: FileUpload,
) -> Change {
    let Some(ConversationItem::Message(message)) = timeline.get(&id) else {
        return Change::Unchanged;
    };
    let MessageContent::Media(Media {
        kind,
        source: FileSource::Local { file },
    }) = &message.content
    else {
        return Change::Unchanged;
    };
    let next = Message {
        content: MessageContent::Media(Media {
            kind: *kind,
            source: FileSource::Uploaded {
                local: Some(file.clone()),
                upload,
            },
        }),
        ..message.clone()
    };
    timeline.replace(&id, ConversationItem::Message(next))
}

/// The message with this stable id, if present.
pub fn find_message(timeline: &Timeline<ConversationItem>, id: StableId) -> Option<&Message> {
    timeline.get(&id).and_then(ConversationItem::as_message)
}

fn describe(status: &SendStatus) -> &'static str {
    match status {
        SendStatus::Sending => "sending",
        SendStatus::Sent => "sent",
        SendStatus::ErrorSending { .. } => "failed",
    }
}
