//! Broadcast registry for publisher-to-viewer routing
//!
//! The registry holds the single active broadcast stream, every live
//! session, and the set of subscribers entitled to receive frames. Each
//! subscriber gets its own bounded queue, so one stalled viewer never holds
//! back the publisher or the other viewers.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<BroadcastRegistry>
//!                   ┌──────────────────────────────┐
//!                   │ active: Option<ActiveStream> │
//!                   │ retired: {StreamId: ...}     │
//!                   │ subscribers: {SessionId:     │
//!                   │   mpsc::Sender (bounded) }   │
//!                   └──────────────┬───────────────┘
//!                                  │
//!        ┌─────────────────────────┼─────────────────────────┐
//!        │                         │                         │
//!        ▼                         ▼                         ▼
//!   [Publisher]              [Subscriber]              [Subscriber]
//!   TransportEvent::Frame    rx.recv()                 rx.recv()
//!        │                         │                         │
//!        └──► registry.forward() ──┴──► transport.send_frame()
//! ```
//!
//! # Zero-Copy Design
//!
//! Frame payloads are `bytes::Bytes`. Queuing a frame to N subscribers bumps
//! a reference count N times; the packet itself is never copied.

pub mod config;
pub mod error;
pub mod frame;
pub mod store;
pub mod stream;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use frame::{MediaFrame, StreamId, TrackKind, TrackSpec};
pub use store::{BroadcastRegistry, FrameReceiver};
pub use stream::ActiveStream;
