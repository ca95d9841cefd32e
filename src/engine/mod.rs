//! Connectivity engine boundary
//!
//! ICE gathering, connectivity checks and secure transport setup are not
//! done by the relay itself. They are delegated to a [`ConnectivityEngine`],
//! which opens one [`Transport`] per session and reports what happens on it
//! as a stream of [`TransportEvent`]s:
//!
//! ```text
//!   SignalingCoordinator ──open()──► ConnectivityEngine
//!          │                               │
//!          │ apply_offer / create_answer   │ (Transport, events)
//!          ▼                               ▼
//!      Transport ◄──send_frame── writer   SessionSupervisor ◄── TransportEvent
//! ```
//!
//! The production engine is [`WebRtcEngine`]. Tests use a scripted
//! in-process engine.

#[cfg(test)]
pub(crate) mod mock;
pub mod rtc;

use std::future::Future;

use tokio::sync::mpsc;

use crate::registry::{MediaFrame, StreamId, TrackSpec};
use crate::session::{Role, SessionId};
use crate::signaling::SessionDescription;

pub use rtc::{WebRtcEngine, WebRtcTransport};

/// Connectivity reported by the engine for one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Checks not started
    New,
    /// Connectivity checks and handshake in progress
    Checking,
    /// A usable path is established
    Connected,
    /// Path lost, the engine may still recover it
    Disconnected,
    /// Connectivity failed for good
    Failed,
    /// Transport closed
    Closed,
}

/// Notification from a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connectivity state changed
    Connectivity(ConnectivityState),
    /// The remote side started sending a track
    Track(TrackSpec),
    /// A media frame arrived on an inbound track
    Frame(MediaFrame),
}

/// Failure inside the connectivity engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

/// One session's transport, as provided by the engine
pub trait Transport: Send + Sync + 'static {
    /// Apply the participant's offer as the remote description
    fn apply_offer(
        &self,
        offer: &SessionDescription,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Add outbound tracks mirroring the given broadcast stream
    ///
    /// Must be called before [`create_answer`](Self::create_answer) so the
    /// answer already advertises the tracks being sent.
    fn attach_outbound(
        &self,
        stream: StreamId,
        tracks: &[TrackSpec],
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Produce the local answer
    ///
    /// Resolves once candidate gathering is complete, so the returned answer
    /// is usable without trickle ICE.
    fn create_answer(&self) -> impl Future<Output = Result<SessionDescription, EngineError>> + Send;

    /// Write one frame to the outbound track of the frame's kind
    fn send_frame(&self, frame: &MediaFrame) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Tear the transport down
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Factory for transports
pub trait ConnectivityEngine: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a transport for a new session
    ///
    /// Returns the transport and the receiver for its events. The engine
    /// closes the event channel when the transport goes away.
    fn open(
        &self,
        session_id: SessionId,
        role: Role,
    ) -> impl Future<Output = Result<(Self::Transport, mpsc::Receiver<TransportEvent>), EngineError>>
           + Send;
}
