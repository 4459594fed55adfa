//! # sync-core
//!
//! Pure reconciliation logic for convo-sync (no I/O, instant tests).
//!
//! This crate implements the state machines and merge algorithms behind the
//! messaging engine without any network access or async runtime.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (transport calls, uploads, subscriptions) is performed by
//! `sync-client`, which feeds outcomes back into these functions.
//!
//! ## Modules
//!
//! - [`timeline`] - Ordered, deduplicated, paginated merge of history and live items
//! - [`send`] - Message send state machine (ack, failure, retry, delete)
//! - [`drafts`] - Draft conversation creation lifecycle
//! - [`reconcile`] - Applying remote push events

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod drafts;
pub mod reconcile;
pub mod send;
pub mod timeline;

pub use drafts::{DraftConversation, DraftEvent, DraftRegistry};
pub use reconcile::{apply_conversation_event, apply_list_event, rekey, tombstone_remote};
pub use send::{Outcome, SendEvent, Step};
pub use timeline::{Change, Timeline, TimelineEntry};
