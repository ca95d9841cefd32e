//! Session supervisor
//!
//! Drives each session from its transport's events once the answer has been
//! produced, and evicts sessions whose connectivity has failed or closed.
//!
//! Every session gets a watcher task that:
//! - moves `Negotiating -> Connected` when the engine reports a connection,
//!   then registers the subscriber (a publisher's stream is usually
//!   registered already, at answer time),
//! - forwards publisher frames into the registry,
//! - fails the session if connectivity is not established in time,
//! - on `Failed`/`Closed`, unlinks the session from the registry and closes
//!   its transport.
//!
//! A periodic reaper sweeps the registry as a backstop, so a participant that
//! vanishes without any clean exchange is still cleaned up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::{ConnectivityState, Transport, TransportEvent};
use crate::registry::{BroadcastRegistry, FrameReceiver, RegistryError, StreamId, TrackSpec};

use super::peer::{PeerSession, SessionId};
use super::state::{Role, SessionState};

/// Shortest interval between reaper sweeps
pub const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Watches live sessions and reaps dead ones
pub struct SessionSupervisor {
    registry: Arc<BroadcastRegistry>,
    connect_timeout: Duration,
}

impl SessionSupervisor {
    /// Create a supervisor
    ///
    /// `connect_timeout` bounds how long a session may stay `Negotiating`.
    pub fn new(registry: Arc<BroadcastRegistry>, connect_timeout: Duration) -> Self {
        Self {
            registry,
            connect_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    /// Start watching a negotiated session
    ///
    /// Call once the local answer has been recorded. Events the engine
    /// emitted before this point are still queued and handled in order.
    pub fn watch<T: Transport>(
        &self,
        session: Arc<PeerSession>,
        transport: Arc<T>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let watcher = Watcher {
            registry: Arc::clone(&self.registry),
            session,
            transport,
            connect_timeout: self.connect_timeout,
            stream: None,
            pending_tracks: Vec::new(),
            writer: None,
        };

        tokio::spawn(watcher.run(events))
    }

    /// Explicitly tear a session down
    ///
    /// Returns `false` if the session is unknown or already terminal.
    pub async fn close(&self, id: SessionId) -> bool {
        match self.registry.session(id).await {
            Some(session) => self.registry.terminate(&session, SessionState::Closed).await,
            None => false,
        }
    }

    /// Tear every session down (process shutdown)
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for session in self.registry.sessions().await {
            if self.registry.terminate(&session, SessionState::Closed).await {
                closed += 1;
            }
        }

        tracing::info!(sessions = closed, "All sessions closed");
        closed
    }

    /// Run one reaper sweep
    ///
    /// Removes sessions that are already terminal and fails sessions stuck
    /// negotiating past the connect timeout. Returns how many were evicted.
    pub async fn reap(&self) -> usize {
        let mut evicted = 0;

        for session in self.registry.sessions().await {
            let state = session.state();

            let stale = !state.is_terminal()
                && state != SessionState::Connected
                && session.age() > self.connect_timeout;

            if stale {
                tracing::warn!(
                    session_id = %session.id(),
                    role = %session.role(),
                    state = %state,
                    "Session never connected, failing it"
                );
                self.registry.terminate(&session, SessionState::Failed).await;
            } else if !state.is_terminal() {
                continue;
            }

            if self.registry.remove_session(session.id()).await.is_some() {
                tracing::debug!(session_id = %session.id(), "Session reaped by sweep");
                evicted += 1;
            }
        }

        evicted
    }

    /// Spawn the background reaper
    ///
    /// Returns a handle that can be used to abort the task. Intervals below
    /// [`MIN_REAP_INTERVAL`] are raised to it.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let interval = interval.max(MIN_REAP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = supervisor.reap().await;
                if evicted > 0 {
                    tracing::info!(evicted = evicted, "Reaper evicted dead sessions");
                }
            }
        })
    }
}

/// Per-session event loop
struct Watcher<T: Transport> {
    registry: Arc<BroadcastRegistry>,
    session: Arc<PeerSession>,
    transport: Arc<T>,
    connect_timeout: Duration,

    /// Stream this publisher feeds, once registered
    stream: Option<StreamId>,

    /// Tracks announced before the publisher stream existed
    pending_tracks: Vec<TrackSpec>,

    /// Subscriber frame writer
    writer: Option<JoinHandle<()>>,
}

impl<T: Transport> Watcher<T> {
    async fn run(mut self, mut events: mpsc::Receiver<TransportEvent>) {
        if self.session.role() == Role::Publisher {
            self.stream = self.session.attached_stream_id().await;
        }

        let mut state_rx = self.session.subscribe_state();
        let deadline = tokio::time::sleep(self.connect_timeout);
        tokio::pin!(deadline);

        while !self.session.state().is_terminal() {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        tracing::debug!(session_id = %self.session.id(), "Transport event stream ended");
                        self.registry.terminate(&self.session, SessionState::Closed).await;
                        break;
                    }
                },
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = &mut deadline, if self.session.state() == SessionState::Negotiating => {
                    tracing::warn!(
                        session_id = %self.session.id(),
                        timeout_secs = self.connect_timeout.as_secs_f64(),
                        "Connectivity not established in time"
                    );
                    self.registry.terminate(&self.session, SessionState::Failed).await;
                }
            }
        }

        self.dispose().await;
    }

    async fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connectivity(state) => self.on_connectivity(state).await,
            TransportEvent::Track(spec) => self.on_track(spec).await,
            TransportEvent::Frame(frame) => match self.stream {
                Some(stream_id) => {
                    self.registry.forward(stream_id, frame).await;
                }
                None => {
                    tracing::trace!(session_id = %self.session.id(), "Frame before registration dropped");
                }
            },
        }
    }

    async fn on_connectivity(&mut self, state: ConnectivityState) {
        let id = self.session.id();

        match state {
            ConnectivityState::Connected => self.on_connected().await,
            ConnectivityState::Failed => {
                tracing::warn!(session_id = %id, role = %self.session.role(), "Connectivity failed");
                self.registry.terminate(&self.session, SessionState::Failed).await;
            }
            ConnectivityState::Closed => {
                tracing::info!(session_id = %id, role = %self.session.role(), "Transport closed");
                self.registry.terminate(&self.session, SessionState::Closed).await;
            }
            ConnectivityState::Disconnected => {
                // The engine either recovers the path or reports Failed
                tracing::warn!(session_id = %id, "Connectivity lost");
            }
            ConnectivityState::New | ConnectivityState::Checking => {
                tracing::debug!(session_id = %id, state = ?state, "Connectivity state");
            }
        }
    }

    async fn on_connected(&mut self) {
        let id = self.session.id();

        if self.session.state() != SessionState::Negotiating {
            return;
        }
        if self.session.local_description().is_none() {
            tracing::error!(session_id = %id, "Transport connected before an answer was recorded");
            self.registry.terminate(&self.session, SessionState::Failed).await;
            return;
        }
        if self.session.transition(SessionState::Connected).is_err() {
            return;
        }

        match self.session.role() {
            Role::Publisher if self.stream.is_some() => {
                tracing::debug!(session_id = %id, "Publisher connected");
            }
            Role::Publisher => match self.registry.set_publisher_stream(&self.session).await {
                Ok(stream) => {
                    self.stream = Some(stream.id());
                    for spec in std::mem::take(&mut self.pending_tracks) {
                        self.registry.describe_track(stream.id(), spec).await;
                    }
                }
                Err(e) => self.fail_fast(e).await,
            },
            Role::Subscriber => match self.registry.add_subscriber(&self.session).await {
                Ok(rx) => {
                    self.writer = Some(spawn_writer(Arc::clone(&self.transport), rx, id));
                }
                Err(RegistryError::NoActiveBroadcast | RegistryError::StreamNotLive(_)) => {
                    // Broadcast ended while negotiating: stay connected, no track
                    self.session.detach_stream().await;
                    tracing::info!(session_id = %id, "Subscriber connected after broadcast ended");
                }
                Err(e) => self.fail_fast(e).await,
            },
        }
    }

    async fn on_track(&mut self, spec: TrackSpec) {
        if self.session.role() != Role::Publisher {
            tracing::debug!(session_id = %self.session.id(), kind = %spec.kind, "Ignoring inbound track from subscriber");
            return;
        }

        match self.stream {
            Some(stream_id) => {
                self.registry.describe_track(stream_id, spec).await;
            }
            None => self.pending_tracks.push(spec),
        }
    }

    /// Registry and session disagree: drop the session rather than relay on
    /// top of inconsistent state
    async fn fail_fast(&self, err: RegistryError) {
        tracing::error!(
            session_id = %self.session.id(),
            role = %self.session.role(),
            error = %err,
            "Registry invariant violated, failing session"
        );
        self.registry.terminate(&self.session, SessionState::Failed).await;
    }

    async fn dispose(self) {
        if let Some(writer) = self.writer {
            writer.abort();
        }

        self.registry.remove_session(self.session.id()).await;
        self.transport.close().await;

        tracing::info!(
            session_id = %self.session.id(),
            role = %self.session.role(),
            state = %self.session.state(),
            "Session disposed"
        );
    }
}

/// Drain a subscriber's queue into its transport
fn spawn_writer<T: Transport>(
    transport: Arc<T>,
    mut rx: FrameReceiver,
    session_id: SessionId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = transport.send_frame(&frame).await {
                tracing::debug!(session_id = %session_id, error = %e, "Frame write failed");
            }
        }

        tracing::trace!(session_id = %session_id, "Subscriber writer finished");
    })
}
