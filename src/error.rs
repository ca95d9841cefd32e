//! Error types
//!
//! Every signaling call resolves to either a complete answer or one of these
//! errors. Nothing is retried automatically.

use crate::engine::EngineError;
use crate::registry::RegistryError;
use crate::session::OfferError;
use crate::signaling::DescriptionError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay operations
#[derive(Debug)]
pub enum Error {
    /// Subscribe attempted while no publisher stream is live
    NoActiveBroadcast,
    /// Offer malformed or rejected, or answer could not be produced
    NegotiationFailed(String),
    /// Transport or ICE failure during or after negotiation
    ConnectivityFailed(String),
    /// Registry and session state disagree
    InternalInvariantViolation(String),
    /// Engine failure outside negotiation (e.g., engine setup)
    Engine(EngineError),
    /// I/O error (binding the listener, serving HTTP)
    Io(std::io::Error),
}

impl Error {
    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::NoActiveBroadcast | Error::NegotiationFailed(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoActiveBroadcast => write!(f, "no broadcast"),
            Error::NegotiationFailed(msg) => write!(f, "negotiation failed: {}", msg),
            Error::ConnectivityFailed(msg) => write!(f, "connectivity failed: {}", msg),
            Error::InternalInvariantViolation(msg) => {
                write!(f, "internal invariant violation: {}", msg)
            }
            Error::Engine(e) => write!(f, "engine error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Engine(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::Engine(err)
    }
}

impl From<DescriptionError> for Error {
    fn from(err: DescriptionError) -> Self {
        Error::NegotiationFailed(err.to_string())
    }
}

impl From<OfferError> for Error {
    fn from(err: OfferError) -> Self {
        Error::NegotiationFailed(err.to_string())
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NoActiveBroadcast | RegistryError::StreamNotLive(_) => {
                Error::NoActiveBroadcast
            }
            other => Error::InternalInvariantViolation(other.to_string()),
        }
    }
}
