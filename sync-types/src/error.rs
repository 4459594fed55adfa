//! Error types for convo-sync.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server code for "one of the requested providers does not exist".
pub const PROVIDER_NOT_FOUND_CODE: i32 = 20000;

/// Server code for "a requested provider may not join conversations".
pub const PROVIDER_MISSING_PERMISSION_CODE: i32 = 20001;

/// Errors that can occur in convo-sync operations.
///
/// `Clone` so a single failure can be stored in a message's send status and
/// handed to every caller awaiting a shared load.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SyncError {
    /// No authenticated session.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Transport-level failure (retryable).
    #[error("network failure: {0}")]
    Network(String),

    /// The server understood the request and refused it.
    #[error("server rejected request (code {code}): {message}")]
    ServerRejected {
        /// Server error code.
        code: i32,
        /// Server-provided message.
        message: String,
    },

    /// A requested provider does not exist.
    #[error("provider not found")]
    ProviderNotFound,

    /// A requested provider lacks the permission to be added.
    #[error("provider missing permission")]
    ProviderMissingPermission,

    /// The operation is not valid for the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The entity does not exist locally.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Translate raw server rejection codes into domain errors.
    ///
    /// Anything that is not a known code passes through unchanged.
    pub fn into_domain(self) -> Self {
        match self {
            Self::ServerRejected { code, .. } if code == PROVIDER_NOT_FOUND_CODE => {
                Self::ProviderNotFound
            }
            Self::ServerRejected { code, .. } if code == PROVIDER_MISSING_PERMISSION_CODE => {
                Self::ProviderMissingPermission
            }
            other => other,
        }
    }
}
