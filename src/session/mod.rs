//! Peer session management
//!
//! A session is one participant's connection attempt. This module holds the
//! negotiation state machine, the session itself, and the supervisor that
//! reacts to connectivity changes and reaps dead sessions.

pub mod peer;
pub mod state;
pub mod supervisor;

pub use peer::{OfferError, PeerSession, SessionId};
pub use state::{Role, SessionState, TransitionError};
pub use supervisor::{SessionSupervisor, MIN_REAP_INTERVAL};
