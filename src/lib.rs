//! Single-broadcaster WebRTC relay
//!
//! One participant publishes a live media stream; any number of viewers
//! receive it. Participants negotiate over a plain HTTP offer/answer
//! exchange, and once a publisher's transport connects, every frame it sends
//! is fanned out to each connected viewer.
//!
//! # Layout
//!
//! - [`signaling`]: offer/answer types and the publish/subscribe flows
//! - [`session`]: per-participant state machine and the supervisor that
//!   reacts to connectivity changes
//! - [`registry`]: the active stream, live sessions and subscriber fan-out
//! - [`engine`]: the connectivity engine boundary and its `webrtc` backend
//! - [`server`]: the axum HTTP listener
//!
//! # Example
//!
//! ```no_run
//! use webrtc_relay::{RelayConfig, RelayServer};
//!
//! # async fn run() -> webrtc_relay::Result<()> {
//! let config = RelayConfig::with_addr("127.0.0.1:8086".parse().unwrap());
//! let server = RelayServer::webrtc(config)?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod signaling;
pub mod stats;

pub use engine::{ConnectivityEngine, ConnectivityState, EngineError, Transport, TransportEvent};
pub use error::{Error, Result};
pub use registry::{BroadcastRegistry, MediaFrame, RegistryConfig, StreamId, TrackSpec};
pub use server::{RelayConfig, RelayServer};
pub use session::{PeerSession, Role, SessionId, SessionState};
pub use signaling::{Negotiated, SessionDescription, SignalingCoordinator};
pub use stats::RelayStats;
