//! Explicit dependency context.
//!
//! Everything the repositories need from the outside world travels in one
//! [`SyncContext`], built once by the embedder. There is no global registry.

use chrono::{DateTime, Duration, Utc};
use convo_sync_types::ClientId;
use std::sync::{Arc, Mutex};

use crate::config::SyncConfig;
use crate::session::SessionProvider;
use crate::transport::Transport;
use crate::upload::FileUploader;

/// Wall clock.
pub trait Clock: Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Client id source.
pub trait IdGenerator: Send + Sync + 'static {
    /// A fresh, never reused id.
    fn next_id(&self) -> ClientId;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Random UUID v4 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> ClientId {
        ClientId::new()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// A clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Dependencies shared by every repository.
pub struct SyncContext {
    /// Tunables.
    pub config: SyncConfig,
    /// Backend.
    pub transport: Arc<dyn Transport>,
    /// Media uploads.
    pub uploader: Arc<dyn FileUploader>,
    /// Authentication gate.
    pub session: Arc<dyn SessionProvider>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Client id source.
    pub ids: Arc<dyn IdGenerator>,
}

impl SyncContext {
    /// A context with the system clock and random ids.
    pub fn new(
        config: SyncConfig,
        transport: impl Transport,
        uploader: impl FileUploader,
        session: impl SessionProvider,
    ) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            uploader: Arc::new(uploader),
            session: Arc::new(session),
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIds),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace the id generator.
    pub fn with_ids(mut self, ids: impl IdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
