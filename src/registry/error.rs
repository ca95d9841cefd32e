//! Registry error types
//!
//! Error types for broadcast registry operations.

use crate::session::{Role, SessionId, SessionState};

use super::frame::StreamId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No publisher stream is live
    NoActiveBroadcast,
    /// The stream a subscriber was attached to is no longer live
    StreamNotLive(StreamId),
    /// Session is already registered as a subscriber
    AlreadySubscribed(SessionId),
    /// Session has the wrong role for the operation
    RoleMismatch {
        session: SessionId,
        expected: Role,
    },
    /// Session is not connected
    NotConnected {
        session: SessionId,
        state: SessionState,
    },
    /// Registry and session state disagree
    InvariantViolation(String),
}

impl RegistryError {
    /// Whether the error means registry and session state are desynchronized
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            RegistryError::RoleMismatch { .. }
                | RegistryError::NotConnected { .. }
                | RegistryError::AlreadySubscribed(_)
                | RegistryError::InvariantViolation(_)
        )
    }
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::NoActiveBroadcast => write!(f, "no broadcast"),
            RegistryError::StreamNotLive(id) => write!(f, "Stream not live: {}", id),
            RegistryError::AlreadySubscribed(id) => {
                write!(f, "Session {} is already subscribed", id)
            }
            RegistryError::RoleMismatch { session, expected } => {
                write!(f, "Session {} is not a {:?}", session, expected)
            }
            RegistryError::NotConnected { session, state } => {
                write!(f, "Session {} is not connected (state: {:?})", session, state)
            }
            RegistryError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}
