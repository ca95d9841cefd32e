//! WebRTC connectivity engine
//!
//! Backs each session with an `RTCPeerConnection`. ICE is non-trickle: the
//! answer is only handed back once candidate gathering has completed, so the
//! participant never needs a second signaling round trip.
//!
//! Only video is relayed. Publisher RTP packets are surfaced unchanged as
//! [`MediaFrame`]s and written to each subscriber's `TrackLocalStaticRTP`,
//! which rewrites SSRC and payload type for the subscriber's binding.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::marshal::Marshal;

use crate::registry::{MediaFrame, StreamId, TrackKind, TrackSpec};
use crate::session::{Role, SessionId};
use crate::signaling::SessionDescription;

use super::{ConnectivityEngine, ConnectivityState, EngineError, Transport, TransportEvent};

/// Default interval between keyframe requests to a publisher
pub const DEFAULT_KEYFRAME_REQUEST_INTERVAL: Duration = Duration::from_secs(3);

/// Per-transport event queue depth
const EVENT_QUEUE_CAPACITY: usize = 512;

/// Largest RTCP datagram read back from a subscriber
const RTCP_BUFFER_SIZE: usize = 1500;

impl From<webrtc::Error> for EngineError {
    fn from(err: webrtc::Error) -> Self {
        EngineError::new(err.to_string())
    }
}

/// Connectivity engine built on the `webrtc` crate
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<String>,
    keyframe_request_interval: Duration,
}

impl WebRtcEngine {
    /// Create an engine using the given STUN server URLs
    pub fn new(ice_servers: Vec<String>) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers,
            keyframe_request_interval: DEFAULT_KEYFRAME_REQUEST_INTERVAL,
        })
    }

    /// Set how often publishers are asked for a keyframe (zero disables)
    pub fn keyframe_request_interval(mut self, interval: Duration) -> Self {
        self.keyframe_request_interval = interval;
        self
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

impl ConnectivityEngine for WebRtcEngine {
    type Transport = WebRtcTransport;

    async fn open(
        &self,
        session_id: SessionId,
        role: Role,
    ) -> Result<(WebRtcTransport, mpsc::Receiver<TransportEvent>), EngineError> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_configuration()).await?);
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let state_tx = tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                tracing::debug!(session_id = %session_id, state = %state, "Peer connection state");
                if let Some(state) = connectivity_state(state) {
                    let _ = tx.send(TransportEvent::Connectivity(state)).await;
                }
            })
        }));

        if role == Role::Publisher {
            let track_tx = tx.clone();
            let pc_weak = Arc::downgrade(&pc);
            let interval = self.keyframe_request_interval;

            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let tx = track_tx.clone();
                let pc = pc_weak.clone();
                Box::pin(async move {
                    on_inbound_track(session_id, track, tx, pc, interval).await;
                })
            }));
        }

        tracing::debug!(session_id = %session_id, role = %role, "Peer connection opened");

        let transport = WebRtcTransport {
            session_id,
            pc,
            outbound: RwLock::new(None),
        };

        Ok((transport, rx))
    }
}

/// Map peer connection state onto the engine-neutral connectivity state
fn connectivity_state(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Checking),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

/// Announce a publisher track and pump its RTP into the event queue
async fn on_inbound_track(
    session_id: SessionId,
    track: Arc<TrackRemote>,
    tx: mpsc::Sender<TransportEvent>,
    pc: Weak<RTCPeerConnection>,
    keyframe_interval: Duration,
) {
    if track.kind() != RTPCodecType::Video {
        tracing::debug!(session_id = %session_id, kind = %track.kind(), "Ignoring non-video track");
        return;
    }

    let capability = track.codec().capability;
    let spec = TrackSpec {
        kind: TrackKind::Video,
        mime_type: capability.mime_type.clone(),
        clock_rate: capability.clock_rate,
        channels: capability.channels,
        sdp_fmtp_line: capability.sdp_fmtp_line.clone(),
    };

    tracing::info!(
        session_id = %session_id,
        codec = %spec.mime_type,
        ssrc = track.ssrc(),
        "Inbound video track"
    );

    if tx.send(TransportEvent::Track(spec)).await.is_err() {
        return;
    }

    if !keyframe_interval.is_zero() {
        spawn_keyframe_requests(session_id, pc, track.ssrc(), keyframe_interval);
    }

    tokio::spawn(async move {
        loop {
            let packet = match track.read_rtp().await {
                Ok((packet, _)) => packet,
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Inbound track ended");
                    break;
                }
            };

            let data = match packet.marshal() {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Unmarshalable RTP packet");
                    continue;
                }
            };

            if tx
                .send(TransportEvent::Frame(MediaFrame::video(data)))
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

/// Periodically ask the publisher for a keyframe
///
/// Stops once the peer connection is gone or RTCP can no longer be written.
fn spawn_keyframe_requests(
    session_id: SessionId,
    pc: Weak<RTCPeerConnection>,
    media_ssrc: u32,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let Some(pc) = pc.upgrade() else {
                break;
            };

            let pli = PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            };
            if let Err(e) = pc.write_rtcp(&[Box::new(pli)]).await {
                tracing::debug!(session_id = %session_id, error = %e, "Keyframe requests stopped");
                break;
            }
        }
    });
}

/// Codec for a subscriber's outbound track
///
/// Mirrors the publisher's video codec, or VP8 when the publisher has not
/// announced its track yet.
fn outbound_capability(tracks: &[TrackSpec]) -> RTCRtpCodecCapability {
    match tracks.iter().find(|t| t.kind == TrackKind::Video) {
        Some(spec) => RTCRtpCodecCapability {
            mime_type: spec.mime_type.clone(),
            clock_rate: spec.clock_rate,
            channels: spec.channels,
            sdp_fmtp_line: spec.sdp_fmtp_line.clone(),
            rtcp_feedback: Vec::new(),
        },
        None => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
    }
}

/// One session's peer connection
pub struct WebRtcTransport {
    session_id: SessionId,
    pc: Arc<RTCPeerConnection>,
    outbound: RwLock<Option<Arc<TrackLocalStaticRTP>>>,
}

impl WebRtcTransport {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl Transport for WebRtcTransport {
    async fn apply_offer(&self, offer: &SessionDescription) -> Result<(), EngineError> {
        let offer = RTCSessionDescription::offer(offer.sdp.clone())?;
        self.pc.set_remote_description(offer).await?;
        Ok(())
    }

    async fn attach_outbound(
        &self,
        stream: StreamId,
        tracks: &[TrackSpec],
    ) -> Result<(), EngineError> {
        let capability = outbound_capability(tracks);
        let codec = capability.mime_type.clone();

        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            "video".to_owned(),
            stream.to_string(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP from the subscriber must be drained for interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while sender.read(&mut buf).await.is_ok() {}
        });

        *self.outbound.write().await = Some(track);

        tracing::debug!(
            session_id = %self.session_id,
            stream = %stream,
            codec = %codec,
            "Outbound video track attached"
        );

        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await?;

        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        let _ = gathered.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| EngineError::new("local description missing after gathering"))?;

        SessionDescription::answer(local.sdp).map_err(|e| EngineError::new(e.to_string()))
    }

    async fn send_frame(&self, frame: &MediaFrame) -> Result<(), EngineError> {
        if frame.kind != TrackKind::Video {
            return Ok(());
        }

        let track = self.outbound.read().await.clone();
        match track {
            Some(track) => {
                track.write(&frame.data).await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!(session_id = %self.session_id, error = %e, "Peer connection close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_state_mapping() {
        assert_eq!(
            connectivity_state(RTCPeerConnectionState::Connecting),
            Some(ConnectivityState::Checking)
        );
        assert_eq!(
            connectivity_state(RTCPeerConnectionState::Failed),
            Some(ConnectivityState::Failed)
        );
        assert_eq!(connectivity_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn test_outbound_capability_mirrors_publisher() {
        let tracks = vec![TrackSpec::video("video/H264", 90_000)];
        let capability = outbound_capability(&tracks);
        assert_eq!(capability.mime_type, "video/H264");
        assert_eq!(capability.clock_rate, 90_000);
    }

    #[test]
    fn test_outbound_capability_falls_back_to_vp8() {
        let capability = outbound_capability(&[]);
        assert_eq!(capability.mime_type, MIME_TYPE_VP8);
        assert_eq!(capability.clock_rate, 90_000);
    }

    #[tokio::test]
    async fn test_open_and_reject_malformed_offer() {
        let engine = WebRtcEngine::new(Vec::new()).unwrap();
        let (transport, _events) = engine.open(SessionId(1), Role::Publisher).await.unwrap();
        assert_eq!(transport.session_id(), SessionId(1));

        let offer = SessionDescription::offer("v=0\r\n").unwrap();
        tokio_test::assert_err!(transport.apply_offer(&offer).await);

        transport.close().await;
    }
}
