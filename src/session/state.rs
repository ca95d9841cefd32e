//! Session state machine
//!
//! Tracks the negotiation and connectivity lifecycle of one peer session,
//! from the first offer to the terminal state.
//!
//! ```text
//!   New ──offer──► Negotiating ──answer + link up──► Connected
//!                      │                                 │   │
//!                      └──invalid / link failed──► Failed ◄──┘ │
//!                                                            ▼
//!                                                         Closed
//! ```

/// Role a participant plays in the broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single participant whose stream is relayed
    Publisher,
    /// A viewer receiving the relayed stream
    Subscriber,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Publisher => f.write_str("publisher"),
            Role::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no offer received yet
    New,
    /// Offer received, answer and connectivity pending
    Negotiating,
    /// Answer produced and the transport reported a connection
    Connected,
    /// Torn down cleanly
    Closed,
    /// Negotiation or connectivity failed
    Failed,
}

impl SessionState {
    /// `Closed` and `Failed` are never left
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Check whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (New, Negotiating)
                | (Negotiating, Connected)
                | (Negotiating, Failed)
                | (Connected, Closed)
                | (Connected, Failed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::New => "new",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Rejected state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal session transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}
