//! Scripted in-process engine for tests

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::registry::{MediaFrame, StreamId, TrackSpec};
use crate::session::{Role, SessionId};
use crate::signaling::SessionDescription;

use super::{ConnectivityEngine, ConnectivityState, EngineError, Transport, TransportEvent};

/// How every transport opened by a [`MockEngine`] behaves
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Report `Connected` as soon as the answer is produced
    pub connect_on_answer: bool,
    /// Refuse the remote offer
    pub reject_offer: bool,
    /// Refuse to open transports at all
    pub fail_open: bool,
    /// Delay before the answer is produced
    pub answer_delay: Option<Duration>,
}

impl MockScript {
    /// Transports that connect right after answering
    pub fn connecting() -> Self {
        Self {
            connect_on_answer: true,
            ..Self::default()
        }
    }

    /// Transports that answer but never report connectivity
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn reject_offer(mut self) -> Self {
        self.reject_offer = true;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = Some(delay);
        self
    }
}

pub struct MockEngine {
    script: MockScript,
    opened: AtomicUsize,
    transports: Mutex<HashMap<SessionId, MockTransport>>,
}

impl MockEngine {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            opened: AtomicUsize::new(0),
            transports: Mutex::new(HashMap::new()),
        }
    }

    /// Number of transports opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Handle on the transport opened for a session
    pub fn transport(&self, id: SessionId) -> Option<MockTransport> {
        self.transports.lock().unwrap().get(&id).cloned()
    }
}

impl ConnectivityEngine for MockEngine {
    type Transport = MockTransport;

    async fn open(
        &self,
        session_id: SessionId,
        _role: Role,
    ) -> Result<(MockTransport, mpsc::Receiver<TransportEvent>), EngineError> {
        if self.script.fail_open {
            return Err(EngineError::new("no transport available"));
        }

        let (tx, rx) = mpsc::channel(64);
        let transport = MockTransport {
            inner: Arc::new(MockInner {
                script: self.script.clone(),
                events: tx,
                outbound: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        };

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.transports
            .lock()
            .unwrap()
            .insert(session_id, transport.clone());

        Ok((transport, rx))
    }
}

struct MockInner {
    script: MockScript,
    events: mpsc::Sender<TransportEvent>,
    outbound: Mutex<Option<(StreamId, Vec<TrackSpec>)>>,
    sent: Mutex<Vec<MediaFrame>>,
    closed: AtomicBool,
}

/// Cloneable handle shared between the relay and the test body
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Inject an event as if the engine had reported it
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.inner.events.send(event).await;
    }

    /// Frames written to this transport, in write order
    pub fn sent_frames(&self) -> Vec<MediaFrame> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Outbound stream and tracks attached before answering
    pub fn outbound(&self) -> Option<(StreamId, Vec<TrackSpec>)> {
        self.inner.outbound.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    async fn apply_offer(&self, _offer: &SessionDescription) -> Result<(), EngineError> {
        if self.inner.script.reject_offer {
            return Err(EngineError::new("offer rejected"));
        }
        Ok(())
    }

    async fn attach_outbound(
        &self,
        stream: StreamId,
        tracks: &[TrackSpec],
    ) -> Result<(), EngineError> {
        *self.inner.outbound.lock().unwrap() = Some((stream, tracks.to_vec()));
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        if let Some(delay) = self.inner.script.answer_delay {
            tokio::time::sleep(delay).await;
        }

        let mut sdp = String::from("v=0\r\no=- 0 1 IN IP4 127.0.0.1\r\ns=-\r\n");
        if let Some((stream, _)) = self.outbound() {
            sdp.push_str(&format!("a=msid:{} video\r\n", stream));
        }
        let answer =
            SessionDescription::answer(sdp).map_err(|e| EngineError::new(e.to_string()))?;

        if self.inner.script.connect_on_answer {
            self.emit(TransportEvent::Connectivity(ConnectivityState::Checking))
                .await;
            self.emit(TransportEvent::Connectivity(ConnectivityState::Connected))
                .await;
        }

        Ok(answer)
    }

    async fn send_frame(&self, frame: &MediaFrame) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::new("transport closed"));
        }
        self.inner.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// Poll `check` until it holds, failing the test after two seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
