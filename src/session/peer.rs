//! Peer session
//!
//! One participant's connection attempt: its role, its place in the
//! negotiation state machine, the offer/answer pair, and a weak link to the
//! broadcast stream it feeds or receives.

use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};

use crate::registry::{ActiveStream, StreamId};
use crate::signaling::{DescriptionError, SessionDescription};

use super::state::{Role, SessionState, TransitionError};

/// Opaque identifier, unique per connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct AttachedStream {
    id: StreamId,
    stream: Weak<ActiveStream>,
}

/// State of one participant's peer connection
///
/// State lives in a `watch` channel: every transition goes through
/// [`transition`](Self::transition), which checks and applies it under the
/// channel's lock, so observers never see transitions out of order.
#[derive(Debug)]
pub struct PeerSession {
    id: SessionId,
    role: Role,
    created_at: Instant,
    state: watch::Sender<SessionState>,
    remote: OnceLock<SessionDescription>,
    local: OnceLock<SessionDescription>,
    stream: RwLock<Option<AttachedStream>>,
}

impl PeerSession {
    /// Create a session in the `New` state
    pub fn new(id: SessionId, role: Role) -> Self {
        let (state, _) = watch::channel(SessionState::New);

        Self {
            id,
            role,
            created_at: Instant::now(),
            state,
            remote: OnceLock::new(),
            local: OnceLock::new(),
            stream: RwLock::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Time since the session was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Apply a state transition, returning the previous state
    pub fn transition(&self, next: SessionState) -> Result<SessionState, TransitionError> {
        let mut outcome = None;

        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                outcome = Some(Ok(*current));
                *current = next;
                true
            } else {
                outcome = Some(Err(TransitionError {
                    from: *current,
                    to: next,
                }));
                false
            }
        });

        let result = outcome.unwrap_or(Err(TransitionError {
            from: self.state(),
            to: next,
        }));

        if let Ok(prev) = result {
            tracing::debug!(
                session_id = %self.id,
                role = %self.role,
                from = %prev,
                to = %next,
                "Session state changed"
            );
        }

        result
    }

    /// Wait until the state satisfies `pred`, giving up after `timeout`
    pub async fn wait_for<F>(&self, timeout: Duration, mut pred: F) -> Option<SessionState>
    where
        F: FnMut(SessionState) -> bool,
    {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| pred(*s))).await;

        match waited {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        }
    }

    /// Accept the participant's offer
    ///
    /// Moves `New -> Negotiating` first, so an invalid offer still leaves a
    /// session that can fail through the normal `Negotiating -> Failed` edge.
    pub fn accept_offer(&self, offer: SessionDescription) -> Result<(), OfferError> {
        self.transition(SessionState::Negotiating)?;

        if !offer.is_offer() {
            return Err(OfferError::Invalid(DescriptionError::UnexpectedType(
                offer.sdp_type,
            )));
        }
        offer.validate()?;

        self.remote
            .set(offer)
            .map_err(|_| OfferError::AlreadySet("remote"))
    }

    /// Record the answer produced for this session
    pub fn record_answer(&self, answer: SessionDescription) -> Result<(), OfferError> {
        let state = self.state();
        if state != SessionState::Negotiating {
            return Err(OfferError::Transition(TransitionError {
                from: state,
                to: SessionState::Negotiating,
            }));
        }

        self.local
            .set(answer)
            .map_err(|_| OfferError::AlreadySet("local"))
    }

    /// The offer received from the participant
    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote.get()
    }

    /// The answer generated by the relay
    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local.get()
    }

    /// Link the session to a broadcast stream
    pub async fn attach_stream(&self, stream: &Arc<ActiveStream>) {
        *self.stream.write().await = Some(AttachedStream {
            id: stream.id(),
            stream: Arc::downgrade(stream),
        });
    }

    /// Drop the link to the broadcast stream
    pub async fn detach_stream(&self) -> Option<StreamId> {
        self.stream.write().await.take().map(|a| a.id)
    }

    /// Id of the attached stream, even if the registry has since dropped it
    pub async fn attached_stream_id(&self) -> Option<StreamId> {
        self.stream.read().await.as_ref().map(|a| a.id)
    }

    /// The attached stream, if the registry still holds it
    pub async fn attached_stream(&self) -> Option<Arc<ActiveStream>> {
        self.stream
            .read()
            .await
            .as_ref()
            .and_then(|a| a.stream.upgrade())
    }
}

/// Failure to accept an offer or record an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferError {
    /// The session is not in a state that accepts it (renegotiation)
    Transition(TransitionError),
    /// The description was rejected
    Invalid(DescriptionError),
    /// Description already recorded
    AlreadySet(&'static str),
}

impl std::fmt::Display for OfferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfferError::Transition(e) => write!(f, "{}", e),
            OfferError::Invalid(e) => write!(f, "{}", e),
            OfferError::AlreadySet(which) => write!(f, "{} description already set", which),
        }
    }
}

impl std::error::Error for OfferError {}

impl From<TransitionError> for OfferError {
    fn from(err: TransitionError) -> Self {
        OfferError::Transition(err)
    }
}

impl From<DescriptionError> for OfferError {
    fn from(err: DescriptionError) -> Self {
        OfferError::Invalid(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SdpType;

    const OFFER: &str = "v=0\r\ns=-\r\n";

    fn offer() -> SessionDescription {
        SessionDescription::offer(OFFER).unwrap()
    }

    #[test]
    fn test_session_lifecycle() {
        let session = PeerSession::new(SessionId(1), Role::Publisher);
        assert_eq!(session.state(), SessionState::New);

        session.accept_offer(offer()).unwrap();
        assert_eq!(session.state(), SessionState::Negotiating);
        assert_eq!(session.remote_description().unwrap().sdp, OFFER);

        let answer = SessionDescription::answer("v=0\r\n").unwrap();
        session.record_answer(answer).unwrap();
        assert!(session.local_description().is_some());

        assert_eq!(
            session.transition(SessionState::Connected),
            Ok(SessionState::Negotiating)
        );
        assert_eq!(
            session.transition(SessionState::Closed),
            Ok(SessionState::Connected)
        );
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_second_offer_rejected() {
        let session = PeerSession::new(SessionId(1), Role::Subscriber);
        session.accept_offer(offer()).unwrap();

        let err = session.accept_offer(offer()).unwrap_err();
        assert!(matches!(err, OfferError::Transition(_)));
        assert_eq!(session.remote_description().unwrap().sdp, OFFER);
    }

    #[test]
    fn test_answer_as_offer_rejected() {
        let session = PeerSession::new(SessionId(2), Role::Publisher);
        let answer = SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: OFFER.into(),
        };

        let err = session.accept_offer(answer).unwrap_err();
        assert_eq!(
            err,
            OfferError::Invalid(DescriptionError::UnexpectedType(SdpType::Answer))
        );
        assert_eq!(session.state(), SessionState::Negotiating);
        assert!(session.transition(SessionState::Failed).is_ok());
    }

    #[test]
    fn test_answer_requires_negotiating() {
        let session = PeerSession::new(SessionId(3), Role::Publisher);
        let answer = SessionDescription::answer("v=0\r\n").unwrap();

        assert!(session.record_answer(answer).is_err());
        assert!(session.local_description().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_state() {
        let session = Arc::new(PeerSession::new(SessionId(4), Role::Subscriber));
        session.accept_offer(offer()).unwrap();

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .wait_for(Duration::from_secs(1), |s| s == SessionState::Connected)
                    .await
            })
        };

        session.transition(SessionState::Connected).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(SessionState::Connected));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let session = PeerSession::new(SessionId(5), Role::Subscriber);

        let state = session
            .wait_for(Duration::from_millis(10), |s| s.is_terminal())
            .await;
        assert_eq!(state, None);
    }

    #[tokio::test]
    async fn test_attached_stream_is_weak() {
        let session = PeerSession::new(SessionId(6), Role::Subscriber);
        let stream = Arc::new(ActiveStream::new(StreamId(9), SessionId(1)));

        session.attach_stream(&stream).await;
        assert_eq!(session.attached_stream().await.unwrap().id(), StreamId(9));

        drop(stream);
        assert!(session.attached_stream().await.is_none());
        assert_eq!(session.attached_stream_id().await, Some(StreamId(9)));

        assert_eq!(session.detach_stream().await, Some(StreamId(9)));
        assert_eq!(session.attached_stream_id().await, None);
    }
}
