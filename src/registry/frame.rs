//! Relay frame types
//!
//! This module defines the identifiers for relayed streams and the frames
//! that are fanned out to subscribers.

use bytes::Bytes;

/// Identifier for one broadcast stream
///
/// A new id is allocated every time a publisher takes over the broadcast, so
/// subscribers attached to a replaced stream can still be told apart from
/// subscribers of the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u64);

impl StreamId {
    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Video track
    Video,
    /// Audio track
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

/// Codec description of a track contributed by the publisher
///
/// Subscribers use it to build an outbound track that matches what the
/// publisher is actually sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSpec {
    /// Media kind
    pub kind: TrackKind,
    /// Codec MIME type (e.g., "video/VP8")
    pub mime_type: String,
    /// RTP clock rate
    pub clock_rate: u32,
    /// Audio channel count (0 for video)
    pub channels: u16,
    /// Format parameters line from the negotiated description
    pub sdp_fmtp_line: String,
}

impl TrackSpec {
    /// Create a video track description
    pub fn video(mime_type: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            kind: TrackKind::Video,
            mime_type: mime_type.into(),
            clock_rate,
            channels: 0,
            sdp_fmtp_line: String::new(),
        }
    }
}

/// A media frame relayed from the publisher to subscribers
///
/// Cheap to clone: the payload is a reference-counted `Bytes`, so every
/// subscriber queue shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    /// Kind of track the frame belongs to
    pub kind: TrackKind,
    /// Serialized packet (an RTP packet for the WebRTC engine)
    pub data: Bytes,
}

impl MediaFrame {
    /// Create a video frame
    pub fn video(data: Bytes) -> Self {
        Self {
            kind: TrackKind::Video,
            data,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
