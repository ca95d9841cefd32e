//! Broadcast stream entry
//!
//! The per-stream state owned by the registry while a publisher is live.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::session::SessionId;

use super::frame::{StreamId, TrackKind, TrackSpec};

/// The live inbound stream of one publisher
///
/// Owned exclusively by the [`BroadcastRegistry`](super::BroadcastRegistry).
/// Sessions only ever hold a `Weak` reference to it.
#[derive(Debug)]
pub struct ActiveStream {
    id: StreamId,

    /// Session that contributes this stream
    publisher: SessionId,

    /// Tracks announced by the publisher's transport
    tracks: RwLock<Vec<TrackSpec>>,

    /// Frames received from the publisher
    frames_received: AtomicU64,
}

impl ActiveStream {
    pub(crate) fn new(id: StreamId, publisher: SessionId) -> Self {
        Self {
            id,
            publisher,
            tracks: RwLock::new(Vec::new()),
            frames_received: AtomicU64::new(0),
        }
    }

    /// Stream identifier
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Session id of the publisher feeding this stream
    pub fn publisher(&self) -> SessionId {
        self.publisher
    }

    /// Snapshot of the announced tracks
    pub async fn tracks(&self) -> Vec<TrackSpec> {
        self.tracks.read().await.clone()
    }

    /// Record a track announced by the publisher
    ///
    /// A later announcement for the same kind replaces the earlier one.
    pub(super) async fn describe_track(&self, spec: TrackSpec) {
        let mut tracks = self.tracks.write().await;
        tracks.retain(|t| t.kind != spec.kind);
        tracks.push(spec);
    }

    /// Whether a track of the given kind has been announced
    pub async fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.read().await.iter().any(|t| t.kind == kind)
    }

    /// Number of frames received from the publisher
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub(super) fn count_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }
}
