//! Paginated timeline merge.
//!
//! A [`Timeline`] is the single ordered, deduplicated sequence behind every
//! watched list. It unifies two sources:
//! - Pages of older history, appended at the tail as they are loaded
//! - Live entries (local sends, push events), inserted by timestamp among the
//!   entries already loaded
//!
//! Page entries never interleave with what is already there, so rendered
//! positions stay put when history arrives and a live entry always precedes
//! anything from a page that has not been loaded yet.

use chrono::{DateTime, Utc};
use convo_sync_types::{
    Conversation, ConversationId, ConversationItem, MessageContent, PageCursor, PaginatedList,
    StableId,
};
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

/// An entry that can live in a [`Timeline`].
pub trait TimelineEntry: Clone + PartialEq {
    /// Identity used for deduplication.
    type Key: Clone + Eq + Hash + Debug;

    /// When true, an update that changes [`TimelineEntry::sort_time`] moves
    /// the entry to its new sorted position. When false, updates keep the
    /// entry where it is.
    const RESORT_ON_UPDATE: bool;

    /// Deduplication key.
    fn key(&self) -> Self::Key;

    /// Ordering timestamp (newest first).
    fn sort_time(&self) -> DateTime<Utc>;

    /// Whether `incoming` refers to the same entity as `self`.
    ///
    /// Defaults to key equality. Override when an entity can be recognised
    /// through more than one id.
    fn same_entity(&self, incoming: &Self) -> bool {
        self.key() == incoming.key()
    }

    /// Merge an incoming version into the stored one.
    ///
    /// Defaults to taking the incoming version whole.
    fn absorb(&self, incoming: Self) -> Self {
        incoming
    }
}

/// Outcome of a timeline mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// A new entry was inserted.
    Inserted,
    /// An existing entry was refreshed.
    Updated,
    /// An entry was removed.
    Removed,
    /// Nothing changed.
    Unchanged,
}

impl Change {
    /// Whether the timeline was modified.
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Ordered, deduplicated, paginated sequence. Newest first.
#[derive(Debug, Clone)]
pub struct Timeline<T: TimelineEntry> {
    entries: Vec<T>,
    has_more: bool,
    next_cursor: Option<PageCursor>,
    loaded: bool,
    dirty: bool,
    pending: HashSet<T::Key>,
}

impl<T: TimelineEntry> Timeline<T> {
    /// An empty timeline expecting history to be loaded.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            has_more: true,
            next_cursor: None,
            loaded: false,
            dirty: false,
            pending: HashSet::new(),
        }
    }

    /// An empty timeline with no history to load (e.g. a draft conversation).
    pub fn exhausted() -> Self {
        Self {
            has_more: false,
            loaded: true,
            ..Self::new()
        }
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether older history can still be loaded.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Cursor to request the next older page with.
    pub fn next_cursor(&self) -> Option<&PageCursor> {
        self.next_cursor.as_ref()
    }

    /// Whether at least one page has been merged.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.position(key).map(|index| &self.entries[index])
    }

    /// Index of the entry with this key.
    pub fn position(&self, key: &T::Key) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.key() == key)
    }

    /// Insert or refresh an entry coming from a live source.
    ///
    /// New entries go to their timestamp position among loaded entries.
    /// Known entries are merged with [`TimelineEntry::absorb`] and stay in
    /// place (unless the entry type re-sorts on update).
    pub fn upsert_live(&mut self, incoming: T) -> Change {
        match self.entries.iter().position(|entry| entry.same_entity(&incoming)) {
            Some(index) => self.refresh_at(index, incoming),
            None => {
                let index = self.insertion_index(incoming.sort_time());
                self.entries.insert(index, incoming);
                self.dirty = true;
                Change::Inserted
            }
        }
    }

    /// Merge a page of older history.
    ///
    /// Unknown entries are appended after everything already present (in
    /// page order); known ones are refreshed in place. Returns how many
    /// entries were appended.
    pub fn append_page(
        &mut self,
        page: Vec<T>,
        next_cursor: Option<PageCursor>,
        has_more: bool,
    ) -> usize {
        let mut appended = 0;
        for incoming in page {
            match self.entries.iter().position(|entry| entry.same_entity(&incoming)) {
                Some(index) => {
                    self.refresh_at(index, incoming);
                }
                None => {
                    self.entries.push(incoming);
                    appended += 1;
                }
            }
        }
        if appended > 0 || self.has_more != has_more || !self.loaded {
            self.dirty = true;
        }
        self.next_cursor = next_cursor;
        self.has_more = has_more;
        self.loaded = true;
        appended
    }

    /// Replace the entry with this key in place.
    pub fn replace(&mut self, key: &T::Key, entry: T) -> Change {
        match self.position(key) {
            Some(index) if self.entries[index] == entry => Change::Unchanged,
            Some(index) => {
                self.entries[index] = entry;
                self.dirty = true;
                Change::Updated
            }
            None => Change::Unchanged,
        }
    }

    /// Apply `update` to the entry with this key.
    ///
    /// Returns `None` if there is no such entry.
    pub fn update<R>(&mut self, key: &T::Key, update: impl FnOnce(&mut T) -> R) -> Option<R> {
        let index = self.position(key)?;
        let mut entry = self.entries[index].clone();
        let output = update(&mut entry);
        self.refresh_at(index, entry);
        Some(output)
    }

    /// Mutate every entry in place, keeping order.
    pub fn for_each_mut(&mut self, mut visit: impl FnMut(&mut T) -> bool) -> usize {
        let mut touched = 0;
        for entry in &mut self.entries {
            if visit(entry) {
                touched += 1;
            }
        }
        if touched > 0 {
            self.dirty = true;
        }
        touched
    }

    /// Remove the entry with this key.
    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        let index = self.position(key)?;
        self.dirty = true;
        Some(self.entries.remove(index))
    }

    /// Immutable snapshot for subscribers.
    pub fn snapshot(&self) -> PaginatedList<T> {
        PaginatedList {
            items: self.entries.clone(),
            has_more: self.has_more,
        }
    }

    /// Mark an entry as carrying an unconfirmed local change.
    ///
    /// The marker is bookkeeping only: it is not part of snapshots and does
    /// not make the timeline dirty.
    pub fn mark_pending(&mut self, key: T::Key) {
        self.pending.insert(key);
    }

    /// Drop the marker on an entry. Returns whether it was set.
    pub fn clear_pending(&mut self, key: &T::Key) -> bool {
        self.pending.remove(key)
    }

    /// Whether an entry carries an unconfirmed local change.
    pub fn is_pending(&self, key: &T::Key) -> bool {
        self.pending.contains(key)
    }

    /// Whether anything changed since the last call. Resets the flag.
    ///
    /// Stores use this to publish a snapshot only after effective changes.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn refresh_at(&mut self, index: usize, incoming: T) -> Change {
        let merged = self.entries[index].absorb(incoming);
        if merged == self.entries[index] {
            return Change::Unchanged;
        }
        if T::RESORT_ON_UPDATE && merged.sort_time() != self.entries[index].sort_time() {
            self.entries.remove(index);
            let target = self.insertion_index(merged.sort_time());
            self.entries.insert(target, merged);
        } else {
            self.entries[index] = merged;
        }
        self.dirty = true;
        Change::Updated
    }

    /// First index whose entry is strictly older than `time`. Equal
    /// timestamps keep arrival order.
    fn insertion_index(&self, time: DateTime<Utc>) -> usize {
        self.entries
            .iter()
            .position(|entry| entry.sort_time() < time)
            .unwrap_or(self.entries.len())
    }
}

impl<T: TimelineEntry> Default for Timeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineEntry for ConversationItem {
    type Key = StableId;
    const RESORT_ON_UPDATE: bool = false;

    fn key(&self) -> StableId {
        self.stable_id()
    }

    fn sort_time(&self) -> DateTime<Utc> {
        self.created_at()
    }

    fn same_entity(&self, incoming: &Self) -> bool {
        if self.stable_id() == incoming.stable_id() {
            return true;
        }
        matches!(
            (self.remote_id(), incoming.remote_id()),
            (Some(ours), Some(theirs)) if ours == theirs
        )
    }

    /// Keeps the stable id and owning conversation of the stored item: a
    /// remote echo that omits the client id must not change the identity a
    /// subscriber already renders. A tombstone stays a tombstone.
    fn absorb(&self, incoming: Self) -> Self {
        match (self, incoming) {
            (ConversationItem::Message(ours), ConversationItem::Message(mut theirs)) => {
                if let Some(remote_id) = theirs.id.remote_id() {
                    theirs.id = ours.id.promote(remote_id);
                } else {
                    theirs.id = ours.id;
                }
                theirs.conversation_id = ours.conversation_id;
                if ours.is_deleted() {
                    theirs.content = MessageContent::Deleted;
                }
                ConversationItem::Message(theirs)
            }
            (_, incoming) => incoming,
        }
    }
}

impl TimelineEntry for Conversation {
    type Key = ConversationId;
    const RESORT_ON_UPDATE: bool = true;

    fn key(&self) -> ConversationId {
        self.id
    }

    fn sort_time(&self) -> DateTime<Utc> {
        self.last_modified
    }
}
