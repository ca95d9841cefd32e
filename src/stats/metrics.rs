//! Statistics for the relay

use serde::Serialize;

/// Relay-wide statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Sessions created since startup
    pub sessions_opened: u64,
    /// Sessions not yet reaped
    pub live_sessions: u64,
    /// Subscribers currently receiving frames
    pub subscribers: u64,
    /// Whether a publisher stream is active
    pub broadcasting: bool,
    /// Id of the active stream
    pub active_stream: Option<u64>,
    /// Frames received from publishers
    pub frames_received: u64,
    /// Frame copies queued to subscribers
    pub frames_delivered: u64,
    /// Frame copies dropped because a subscriber queue was full
    pub frames_dropped: u64,
}

impl RelayStats {
    /// Fraction of frame copies dropped under backpressure
    pub fn drop_ratio(&self) -> f64 {
        let attempted = self.frames_delivered + self.frames_dropped;
        if attempted > 0 {
            self.frames_dropped as f64 / attempted as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_stats_default() {
        let stats = RelayStats::default();
        assert_eq!(stats.sessions_opened, 0);
        assert_eq!(stats.subscribers, 0);
        assert!(!stats.broadcasting);
        assert_eq!(stats.active_stream, None);
        assert_eq!(stats.drop_ratio(), 0.0);
    }

    #[test]
    fn test_drop_ratio() {
        let stats = RelayStats {
            frames_delivered: 75,
            frames_dropped: 25,
            ..Default::default()
        };

        assert_eq!(stats.drop_ratio(), 0.25);
    }

    #[test]
    fn test_serialize() {
        let stats = RelayStats {
            broadcasting: true,
            active_stream: Some(3),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json["broadcasting"], true);
        assert_eq!(json["active_stream"], 3);
        assert_eq!(json["frames_dropped"], 0);
    }
}
