//! Authentication gate.

use async_trait::async_trait;
use convo_sync_types::SyncError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Source of truth for "is there a signed-in user".
///
/// Implementations may refresh tokens; they must return
/// [`SyncError::AuthenticationRequired`] when no session can be produced.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// Succeed only when requests can be authenticated.
    async fn ensure_authenticated(&self) -> Result<(), SyncError>;
}

/// A session toggled by hand. Clones share state.
#[derive(Debug, Clone)]
pub struct StaticSession {
    authenticated: Arc<AtomicBool>,
}

impl StaticSession {
    /// A session in the given state.
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated: Arc::new(AtomicBool::new(authenticated)),
        }
    }

    /// Sign in or out.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

impl Default for StaticSession {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn ensure_authenticated(&self) -> Result<(), SyncError> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::AuthenticationRequired)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signed_out_session_requires_authentication() {
        let session = StaticSession::new(false);
        assert_eq!(
            session.ensure_authenticated().await,
            Err(SyncError::AuthenticationRequired)
        );

        session.clone().set_authenticated(true);
        assert_eq!(session.ensure_authenticated().await, Ok(()));
    }
}
