//! Signaling coordinator
//!
//! Runs the two signaling flows. Both create a session, feed it the
//! participant's offer, produce the answer, and hand the session to the
//! supervisor. A publisher's stream becomes the active broadcast as soon as
//! its answer is ready; a subscriber joins the subscriber set only once its
//! transport reports a connection.
//!
//! ```text
//!   publish(offer)                         subscribe(offer)
//!        │                                       │
//!        │                          active stream? ──no──► NoActiveBroadcast
//!        ▼                                       ▼
//!   open transport ──► accept offer ──► [attach outbound track] ──► answer
//!        │                                                           │
//!        └── any failure: session Failed, transport closed ◄─────────┤
//!                                                                    ▼
//!                                                     supervisor.watch(session)
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::engine::{ConnectivityEngine, Transport};
use crate::error::{Error, Result};
use crate::registry::{ActiveStream, BroadcastRegistry, RegistryError};
use crate::session::{PeerSession, Role, SessionId, SessionState, SessionSupervisor};

use super::description::SessionDescription;

/// Default bound on offer/answer exchange, candidate gathering included
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on `Negotiating -> Connected`
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A successfully negotiated session
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Session created for the participant
    pub session_id: SessionId,
    /// Answer to return to the participant
    pub answer: SessionDescription,
}

/// Orchestrates publish and subscribe requests
pub struct SignalingCoordinator<E: ConnectivityEngine> {
    engine: E,
    registry: Arc<BroadcastRegistry>,
    supervisor: Arc<SessionSupervisor>,
    negotiation_timeout: Duration,
}

impl<E: ConnectivityEngine> SignalingCoordinator<E> {
    /// Create a coordinator with default timeouts
    pub fn new(engine: E, registry: Arc<BroadcastRegistry>) -> Self {
        Self::with_timeouts(
            engine,
            registry,
            DEFAULT_NEGOTIATION_TIMEOUT,
            DEFAULT_CONNECT_TIMEOUT,
        )
    }

    /// Create a coordinator with custom timeouts
    pub fn with_timeouts(
        engine: E,
        registry: Arc<BroadcastRegistry>,
        negotiation_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let supervisor = Arc::new(SessionSupervisor::new(
            Arc::clone(&registry),
            connect_timeout,
        ));

        Self {
            engine,
            registry,
            supervisor,
            negotiation_timeout,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    /// Handle the publisher's offer
    ///
    /// On success the new stream is already the active broadcast, so viewers
    /// can subscribe while the publisher is still connecting. It is cleared
    /// if the publisher never connects. A later publish replaces it.
    pub async fn publish(&self, offer: SessionDescription) -> Result<Negotiated> {
        self.negotiate(Role::Publisher, offer, None).await
    }

    /// Handle a viewer's offer
    ///
    /// Fails with [`Error::NoActiveBroadcast`] when there is nothing to
    /// relay. The answer already carries the outbound track for the stream
    /// that was active when the request arrived.
    pub async fn subscribe(&self, offer: SessionDescription) -> Result<Negotiated> {
        let stream = self
            .registry
            .active_stream()
            .await
            .ok_or(Error::NoActiveBroadcast)?;

        self.negotiate(Role::Subscriber, offer, Some(stream)).await
    }

    async fn negotiate(
        &self,
        role: Role,
        offer: SessionDescription,
        stream: Option<Arc<ActiveStream>>,
    ) -> Result<Negotiated> {
        let id = self.registry.allocate_session_id();
        let session = Arc::new(PeerSession::new(id, role));

        let (transport, events) = self.engine.open(id, role).await.map_err(|e| {
            tracing::warn!(session_id = %id, role = %role, error = %e, "Failed to open transport");
            Error::ConnectivityFailed(e.to_string())
        })?;
        let transport = Arc::new(transport);

        self.registry.insert_session(Arc::clone(&session)).await;

        let exchange = self.exchange(&session, transport.as_ref(), offer, stream);
        let outcome = match tokio::time::timeout(self.negotiation_timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::NegotiationFailed(format!(
                "timed out after {:?}",
                self.negotiation_timeout
            ))),
        };

        let outcome = match outcome {
            Ok(answer) => self.activate(&session).await.map(|()| answer),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(answer) => {
                self.supervisor
                    .watch(Arc::clone(&session), transport, events);

                tracing::info!(session_id = %id, role = %role, "Session negotiated");

                Ok(Negotiated {
                    session_id: id,
                    answer,
                })
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %id,
                    role = %role,
                    error = %e,
                    "Negotiation failed, discarding session"
                );
                self.discard(&session, transport.as_ref()).await;
                Err(e)
            }
        }
    }

    /// Offer in, answer out
    async fn exchange(
        &self,
        session: &PeerSession,
        transport: &E::Transport,
        offer: SessionDescription,
        stream: Option<Arc<ActiveStream>>,
    ) -> Result<SessionDescription> {
        session.accept_offer(offer)?;
        let offer = session
            .remote_description()
            .ok_or_else(|| Error::InternalInvariantViolation("offer not recorded".into()))?;

        transport
            .apply_offer(offer)
            .await
            .map_err(|e| Error::NegotiationFailed(e.to_string()))?;

        if let Some(ref stream) = stream {
            session.attach_stream(stream).await;
            let tracks = stream.tracks().await;
            transport
                .attach_outbound(stream.id(), &tracks)
                .await
                .map_err(|e| Error::NegotiationFailed(e.to_string()))?;
        }

        let answer = transport
            .create_answer()
            .await
            .map_err(|e| Error::NegotiationFailed(e.to_string()))?;
        answer.validate()?;
        session.record_answer(answer.clone())?;

        // The broadcast may have ended while this viewer was negotiating
        if let Some(ref stream) = stream {
            if !self.registry.is_live(stream.id()).await {
                return Err(Error::NoActiveBroadcast);
            }
        }

        Ok(answer)
    }

    /// Last checks before the answer is handed out
    async fn activate(&self, session: &Arc<PeerSession>) -> Result<()> {
        // Closed or reaped while the answer was being produced
        let state = session.state();
        if state.is_terminal() {
            return Err(Error::NegotiationFailed(format!("session {}", state)));
        }

        if session.role() == Role::Publisher {
            self.registry
                .set_publisher_stream(session)
                .await
                .map_err(|e| match e {
                    RegistryError::NotConnected { state, .. } => {
                        Error::NegotiationFailed(format!("session {}", state))
                    }
                    e => Error::InternalInvariantViolation(e.to_string()),
                })?;
        }

        Ok(())
    }

    async fn discard(&self, session: &PeerSession, transport: &E::Transport) {
        if session.state() == SessionState::Negotiating {
            let _ = session.transition(SessionState::Failed);
        }

        self.registry.remove_session(session.id()).await;
        transport.close().await;
    }
}
