//! Apply remote push events to local timelines.
//!
//! Every function here is idempotent: replaying the same event leaves the
//! timeline as it was, which lets subscriptions reconnect and redeliver
//! without bookkeeping.

use convo_sync_types::{
    Conversation, ConversationEvent, ConversationId, ConversationItem, ConversationListEvent,
    Message, RemoteId,
};

use crate::timeline::{Change, Timeline};

/// Apply a conversation event to that conversation's item timeline.
///
/// - Created/updated items are matched by stable id, then by remote id, so a
///   server echo of a local send lands on the pending entry instead of
///   duplicating it. Updates for unknown items insert them.
/// - Deletions tombstone the message in place; unknown ids are ignored.
///
/// A tombstone coming from the server also confirms a local delete of the
/// same message, so a late failure of that delete cannot restore it.
pub fn apply_conversation_event(
    timeline: &mut Timeline<ConversationItem>,
    event: ConversationEvent,
) -> Change {
    match event {
        ConversationEvent::ItemCreated(item) | ConversationEvent::ItemUpdated(item) => {
            let deleted = item
                .as_message()
                .filter(|message| message.is_deleted())
                .and_then(|message| message.id.remote_id());
            let change = timeline.upsert_live(item);
            if let Some(remote_id) = deleted {
                if let Some(message) = find_remote(timeline, remote_id) {
                    timeline.clear_pending(&message.stable_id());
                }
            }
            change
        }
        ConversationEvent::MessageDeleted { remote_id } => tombstone_remote(timeline, remote_id),
    }
}

/// Apply a list event to the conversation list.
pub fn apply_list_event(timeline: &mut Timeline<Conversation>, event: ConversationListEvent) -> Change {
    match event {
        ConversationListEvent::Created(conversation)
        | ConversationListEvent::Updated(conversation) => timeline.upsert_live(conversation),
        ConversationListEvent::Deleted { conversation_id } => {
            match timeline.remove(&conversation_id) {
                Some(_) => Change::Removed,
                None => Change::Unchanged,
            }
        }
    }
}

/// Tombstone the message the server knows as `remote_id`.
pub fn tombstone_remote(timeline: &mut Timeline<ConversationItem>, remote_id: RemoteId) -> Change {
    let Some(message) = find_remote(timeline, remote_id) else {
        return Change::Unchanged;
    };
    let id = message.stable_id();
    timeline.clear_pending(&id);
    if message.is_deleted() {
        return Change::Unchanged;
    }
    timeline.replace(&id, ConversationItem::Message(message.tombstone()))
}

fn find_remote(timeline: &Timeline<ConversationItem>, remote_id: RemoteId) -> Option<Message> {
    timeline.entries().iter().find_map(|item| match item {
        ConversationItem::Message(message) if message.id.remote_id() == Some(remote_id) => {
            Some(message.clone())
        }
        _ => None,
    })
}

/// Move every item of draft `from` to conversation `to`.
///
/// Order and stable ids are preserved; this is the only point where an item's
/// owning conversation changes. Returns how many items moved.
pub fn rekey(timeline: &mut Timeline<ConversationItem>, from: ConversationId, to: ConversationId) -> usize {
    timeline.for_each_mut(|item| match item {
        ConversationItem::Message(message) if message.conversation_id == from => {
            message.conversation_id = to;
            true
        }
        ConversationItem::Activity(activity) if activity.conversation_id == from => {
            activity.conversation_id = to;
            true
        }
        _ => false,
    })
}
