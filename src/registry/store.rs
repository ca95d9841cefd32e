//! Broadcast registry implementation
//!
//! The process-wide state that holds the single active broadcast stream,
//! the live sessions and the subscriber set, and routes frames from the
//! publisher to every subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

use crate::session::{PeerSession, Role, SessionId, SessionState};
use crate::stats::RelayStats;

use super::config::RegistryConfig;
use super::error::RegistryError;
use super::frame::{MediaFrame, StreamId, TrackSpec};
use super::stream::ActiveStream;

/// Receiving end of a subscriber's outbound queue
pub type FrameReceiver = mpsc::Receiver<MediaFrame>;

/// A registered subscriber and its bounded outbound queue
struct SubscriberSlot {
    session: Arc<PeerSession>,
    stream_id: StreamId,
    tx: mpsc::Sender<MediaFrame>,
}

#[derive(Default)]
struct RegistryState {
    /// The stream new subscribers attach to
    active: Option<Arc<ActiveStream>>,

    /// Replaced streams whose publisher is still connected
    retired: HashMap<StreamId, Arc<ActiveStream>>,

    /// Every session not yet reaped
    sessions: HashMap<SessionId, Arc<PeerSession>>,

    /// Subscribers entitled to receive frames, by session id
    subscribers: HashMap<SessionId, SubscriberSlot>,
}

impl RegistryState {
    fn is_live(&self, stream_id: StreamId) -> bool {
        self.active.as_ref().is_some_and(|s| s.id() == stream_id)
            || self.retired.contains_key(&stream_id)
    }

    fn find_stream(&self, stream_id: StreamId) -> Option<&Arc<ActiveStream>> {
        match self.active {
            Some(ref active) if active.id() == stream_id => Some(active),
            _ => self.retired.get(&stream_id),
        }
    }

    /// Take the stream fed by `publisher` out of the registry
    fn take_publisher_stream(&mut self, publisher: SessionId) -> Option<Arc<ActiveStream>> {
        if self
            .active
            .as_ref()
            .is_some_and(|s| s.publisher() == publisher)
        {
            return self.active.take();
        }

        let retired_id = self
            .retired
            .values()
            .find(|s| s.publisher() == publisher)
            .map(|s| s.id())?;
        self.retired.remove(&retired_id)
    }

    /// Remove every subscriber attached to `stream_id`
    fn detach_subscribers(&mut self, stream_id: StreamId) -> Vec<Arc<PeerSession>> {
        let ids: Vec<SessionId> = self
            .subscribers
            .iter()
            .filter(|(_, slot)| slot.stream_id == stream_id)
            .map(|(id, _)| *id)
            .collect();

        ids.into_iter()
            .filter_map(|id| self.subscribers.remove(&id))
            .map(|slot| slot.session)
            .collect()
    }
}

/// Counters kept outside the lock
#[derive(Default)]
struct Counters {
    sessions_opened: AtomicU64,
    frames_received: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Process-wide broadcast state
///
/// Every mutation takes the write lock, so `active` and `subscribers` are
/// only ever changed one operation at a time. Frame forwarding takes the read
/// lock and therefore always sees a consistent subscriber set for the whole
/// fan-out of one frame.
pub struct BroadcastRegistry {
    state: RwLock<RegistryState>,

    config: RegistryConfig,

    next_session_id: AtomicU64,

    next_stream_id: AtomicU64,

    counters: Counters,
}

impl BroadcastRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            config,
            next_session_id: AtomicU64::new(1),
            next_stream_id: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Allocate an id for a new session
    pub fn allocate_session_id(&self) -> SessionId {
        SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Track a newly created session
    pub async fn insert_session(&self, session: Arc<PeerSession>) {
        let mut state = self.state.write().await;
        self.counters.sessions_opened.fetch_add(1, Ordering::Relaxed);
        state.sessions.insert(session.id(), session);
    }

    /// Look up a live session
    pub async fn session(&self, id: SessionId) -> Option<Arc<PeerSession>> {
        self.state.read().await.sessions.get(&id).cloned()
    }

    /// Snapshot of all live sessions
    pub async fn sessions(&self) -> Vec<Arc<PeerSession>> {
        self.state.read().await.sessions.values().cloned().collect()
    }

    /// Forget a session
    ///
    /// Also drops any subscriber slot or stream it still holds, so a session
    /// can never linger in the subscriber set after removal.
    pub async fn remove_session(&self, id: SessionId) -> Option<Arc<PeerSession>> {
        let mut state = self.state.write().await;
        let session = state.sessions.remove(&id)?;

        state.subscribers.remove(&id);
        if session.role() == Role::Publisher {
            if let Some(stream) = state.take_publisher_stream(id) {
                for sub in state.detach_subscribers(stream.id()) {
                    sub.detach_stream().await;
                }
            }
        }

        Some(session)
    }

    /// The stream new subscribers attach to, if any
    pub async fn active_stream(&self) -> Option<Arc<ActiveStream>> {
        self.state.read().await.active.clone()
    }

    /// Whether a broadcast is currently live
    pub async fn has_active_stream(&self) -> bool {
        self.state.read().await.active.is_some()
    }

    /// Whether the given stream is still held by the registry
    pub async fn is_live(&self, stream_id: StreamId) -> bool {
        self.state.read().await.is_live(stream_id)
    }

    /// Make a publisher's stream the active one
    ///
    /// The publisher may still be negotiating: its stream is available as
    /// soon as its answer has been produced, and is cleared again if the
    /// session fails before connecting.
    ///
    /// A previous active stream from another publisher is retired, not
    /// dropped: its subscribers keep receiving its trailing frames until
    /// either side disconnects. Only subscribers arriving from now on attach
    /// to the new stream.
    pub async fn set_publisher_stream(
        &self,
        publisher: &Arc<PeerSession>,
    ) -> Result<Arc<ActiveStream>, RegistryError> {
        if publisher.role() != Role::Publisher {
            return Err(RegistryError::RoleMismatch {
                session: publisher.id(),
                expected: Role::Publisher,
            });
        }

        let mut state = self.state.write().await;

        let current = publisher.state();
        if !matches!(current, SessionState::Negotiating | SessionState::Connected) {
            return Err(RegistryError::NotConnected {
                session: publisher.id(),
                state: current,
            });
        }

        if state
            .active
            .as_ref()
            .is_some_and(|s| s.publisher() == publisher.id())
        {
            return Err(RegistryError::InvariantViolation(format!(
                "publisher {} already owns the active stream",
                publisher.id()
            )));
        }

        let stream_id = StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed));
        let stream = Arc::new(ActiveStream::new(stream_id, publisher.id()));

        if let Some(previous) = state.active.replace(Arc::clone(&stream)) {
            tracing::info!(
                stream = %previous.id(),
                publisher = %previous.publisher(),
                replaced_by = %stream_id,
                "Active stream replaced, existing subscribers stay on it"
            );
            state.retired.insert(previous.id(), previous);
        }

        publisher.attach_stream(&stream).await;

        tracing::info!(
            stream = %stream_id,
            session_id = %publisher.id(),
            "Publisher stream registered"
        );

        Ok(stream)
    }

    /// Drop the stream fed by `publisher`
    ///
    /// Subscribers attached to it are removed from the subscriber set and
    /// lose their stream link, but their sessions stay connected.
    /// Returns the cleared stream id, or `None` if the publisher held none.
    pub async fn clear_publisher_stream(&self, publisher: SessionId) -> Option<StreamId> {
        let mut state = self.state.write().await;
        Self::clear_locked(&mut state, publisher).await
    }

    async fn clear_locked(state: &mut RegistryState, publisher: SessionId) -> Option<StreamId> {
        let stream = state.take_publisher_stream(publisher)?;
        let detached = state.detach_subscribers(stream.id());

        for session in &detached {
            session.detach_stream().await;
        }

        tracing::info!(
            stream = %stream.id(),
            session_id = %publisher,
            detached_subscribers = detached.len(),
            frames = stream.frames_received(),
            "Publisher stream cleared"
        );

        Some(stream.id())
    }

    /// Register a connected subscriber
    ///
    /// The subscriber must already be attached to a stream. Returns the
    /// receiving end of its bounded frame queue.
    pub async fn add_subscriber(
        &self,
        session: &Arc<PeerSession>,
    ) -> Result<FrameReceiver, RegistryError> {
        if session.role() != Role::Subscriber {
            return Err(RegistryError::RoleMismatch {
                session: session.id(),
                expected: Role::Subscriber,
            });
        }

        let mut state = self.state.write().await;

        let current = session.state();
        if current != SessionState::Connected {
            return Err(RegistryError::NotConnected {
                session: session.id(),
                state: current,
            });
        }

        if state.subscribers.contains_key(&session.id()) {
            return Err(RegistryError::AlreadySubscribed(session.id()));
        }

        // Re-checked under the write lock: the stream may have been cleared
        // while the subscriber was negotiating.
        let stream_id = session
            .attached_stream_id()
            .await
            .ok_or(RegistryError::NoActiveBroadcast)?;
        if !state.is_live(stream_id) {
            return Err(RegistryError::StreamNotLive(stream_id));
        }

        let (tx, rx) = mpsc::channel(self.config.subscriber_queue_capacity);
        state.subscribers.insert(
            session.id(),
            SubscriberSlot {
                session: Arc::clone(session),
                stream_id,
                tx,
            },
        );

        tracing::info!(
            stream = %stream_id,
            session_id = %session.id(),
            subscribers = state.subscribers.len(),
            "Subscriber added"
        );

        Ok(rx)
    }

    /// Remove a subscriber; a no-op if it was never added
    pub async fn remove_subscriber(&self, id: SessionId) -> bool {
        let mut state = self.state.write().await;
        let removed = state.subscribers.remove(&id).is_some();

        if removed {
            tracing::debug!(
                session_id = %id,
                subscribers = state.subscribers.len(),
                "Subscriber removed"
            );
        }

        removed
    }

    /// Whether the session is in the subscriber set
    pub async fn is_subscriber(&self, id: SessionId) -> bool {
        self.state.read().await.subscribers.contains_key(&id)
    }

    /// Number of registered subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.state.read().await.subscribers.len()
    }

    /// Move a session to a terminal state and unlink it, atomically
    ///
    /// The transition happens under the write lock, so no reader ever sees a
    /// subscriber slot whose session is no longer connected. `Closed` is
    /// downgraded to `Failed` for sessions that never connected. Returns
    /// `true` if this call performed the transition.
    pub async fn terminate(&self, session: &Arc<PeerSession>, outcome: SessionState) -> bool {
        debug_assert!(outcome.is_terminal());

        let mut state = self.state.write().await;

        let outcome = match (session.state(), outcome) {
            (SessionState::Negotiating, SessionState::Closed) => SessionState::Failed,
            (_, outcome) => outcome,
        };
        let changed = session.transition(outcome).is_ok();

        match session.role() {
            Role::Subscriber => {
                state.subscribers.remove(&session.id());
            }
            Role::Publisher => {
                Self::clear_locked(&mut state, session.id()).await;
            }
        }

        changed
    }

    /// Record a track announced by a publisher
    pub async fn describe_track(&self, stream_id: StreamId, spec: TrackSpec) -> bool {
        let state = self.state.read().await;

        match state.find_stream(stream_id) {
            Some(stream) => {
                tracing::info!(
                    stream = %stream_id,
                    kind = %spec.kind,
                    codec = %spec.mime_type,
                    "Publisher track announced"
                );
                stream.describe_track(spec).await;
                true
            }
            None => false,
        }
    }

    /// Fan a frame out to every subscriber of `stream_id`
    ///
    /// Delivery is fire-and-forget: each subscriber has its own bounded
    /// queue, and a full queue drops the frame for that subscriber only.
    /// Returns the number of subscribers the frame was queued for.
    pub async fn forward(&self, stream_id: StreamId, frame: MediaFrame) -> usize {
        let state = self.state.read().await;

        let Some(stream) = state.find_stream(stream_id) else {
            tracing::trace!(stream = %stream_id, "Frame for unknown stream dropped");
            return 0;
        };
        stream.count_frame();
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for (id, slot) in state.subscribers.iter() {
            if slot.stream_id != stream_id {
                continue;
            }

            match slot.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(session_id = %id, "Subscriber queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    // Writer gone; the supervisor removes the slot
                    tracing::trace!(session_id = %id, "Subscriber queue closed");
                }
            }
        }

        self.counters
            .frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);

        delivered
    }

    /// Verify registry and session state agree
    ///
    /// Every subscriber must be a connected `Subscriber` attached to a live
    /// stream, and every live stream's publisher must be a tracked session.
    pub async fn check_invariants(&self) -> Result<(), RegistryError> {
        let state = self.state.read().await;

        for (id, slot) in state.subscribers.iter() {
            if slot.session.role() != Role::Subscriber {
                return Err(RegistryError::InvariantViolation(format!(
                    "publisher {} in subscriber set",
                    id
                )));
            }
            if slot.session.state() != SessionState::Connected {
                return Err(RegistryError::InvariantViolation(format!(
                    "subscriber {} is {}",
                    id,
                    slot.session.state()
                )));
            }
            if !state.is_live(slot.stream_id) {
                return Err(RegistryError::InvariantViolation(format!(
                    "subscriber {} attached to dead {}",
                    id, slot.stream_id
                )));
            }
        }

        let streams = state.active.iter().chain(state.retired.values());
        for stream in streams {
            if !state.sessions.contains_key(&stream.publisher()) {
                return Err(RegistryError::InvariantViolation(format!(
                    "{} fed by unknown publisher {}",
                    stream.id(),
                    stream.publisher()
                )));
            }
        }

        Ok(())
    }

    /// Get relay statistics
    pub async fn stats(&self) -> RelayStats {
        let state = self.state.read().await;

        RelayStats {
            sessions_opened: self.counters.sessions_opened.load(Ordering::Relaxed),
            live_sessions: state.sessions.len() as u64,
            subscribers: state.subscribers.len() as u64,
            broadcasting: state.active.is_some(),
            active_stream: state.active.as_ref().map(|s| s.id().get()),
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            frames_delivered: self.counters.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}
