//! # sync-client
//!
//! Client library for the convo-sync offline-first messaging engine.
//!
//! This is the library the UI layer talks to. It keeps conversations and
//! their items in observable stores and makes every mutation visible at once,
//! reconciling with the server in the background.
//!
//! ## Features
//!
//! - **Optimistic Mutations**: Sends, deletes and read markers apply locally first
//! - **Stable Identity**: A message keeps its stable id through promotion
//! - **Draft Conversations**: Messages queue on a draft until it is created server-side
//! - **Transport Abstraction**: Pluggable transport and uploader (mocks included)
//! - **Pure Transitions**: Uses sync-core for side-effect-free state changes
//!
//! ## Example
//!
//! ```ignore
//! use convo_sync_client::{MessagingClient, SyncConfig, SyncContext};
//!
//! let config = SyncConfig::from_file(Path::new("convo-sync.toml"))?;
//! let client = MessagingClient::new(SyncContext::new(config, transport, uploader, session));
//!
//! // Watch the inbox
//! let mut inbox = client.watch_conversations();
//!
//! // Send a message
//! let pending = client.send_message(MessageInput::text("Hello"), conversation_id, None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod content;
pub mod context;
pub mod conversations;
pub mod inflight;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod transport;
pub mod upload;

pub use client::MessagingClient;
pub use config::{ConfigError, DraftsConfig, PaginationConfig, SyncConfig, TypingConfig};
pub use content::{ConversationContentRepository, PendingSend};
pub use context::{Clock, IdGenerator, ManualClock, RandomIds, SyncContext, SystemClock};
pub use conversations::ConversationRepository;
pub use session::{SessionProvider, StaticSession};
pub use transport::{
    MockTransport, Mutation, MutationResponse, OutgoingContent, Page, PageEntries, PageRequest,
    PageScope, Topic, Transport, TransportError,
};
pub use upload::{FileUploader, MockUploader};
