//! HTTP signaling listener
//!
//! Serves the publish and subscribe endpoints over axum and runs the
//! supervisor's reaper for as long as the listener is up.
//!
//! | Route                    | Body in                   | Body out                     |
//! |--------------------------|---------------------------|------------------------------|
//! | `POST /webrtc/broadcast` | `{"sdp":{"sdp":"..."}}`   | `{"type":"answer","sdp":..}` |
//! | `POST /webrtc/consume`   | `{"sdp":{"sdp":"..."}}`   | `{"type":"answer","sdp":..}` |
//! | `GET /stats`             |                           | [`RelayStats`] JSON          |
//! | `GET /`                  |                           | plain-text liveness          |

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::engine::{ConnectivityEngine, WebRtcEngine};
use crate::error::{Error, Result};
use crate::registry::BroadcastRegistry;
use crate::server::config::RelayConfig;
use crate::signaling::{
    ErrorResponse, SessionDescription, SignalingCoordinator, SignalingRequest, SignalingResponse,
};
use crate::stats::RelayStats;

type SharedCoordinator<E> = Arc<SignalingCoordinator<E>>;

/// WebRTC relay server
pub struct RelayServer<E: ConnectivityEngine> {
    config: RelayConfig,
    coordinator: SharedCoordinator<E>,
}

impl RelayServer<WebRtcEngine> {
    /// Create a server backed by the `webrtc` crate
    pub fn webrtc(config: RelayConfig) -> Result<Self> {
        let engine = WebRtcEngine::new(config.ice_servers.clone())?
            .keyframe_request_interval(config.keyframe_request_interval);

        Ok(Self::new(config, engine))
    }
}

impl<E: ConnectivityEngine> RelayServer<E> {
    /// Create a new server with the given configuration and engine
    pub fn new(config: RelayConfig, engine: E) -> Self {
        let registry = Arc::new(BroadcastRegistry::with_config(config.registry.clone()));
        let coordinator = SignalingCoordinator::with_timeouts(
            engine,
            registry,
            config.negotiation_timeout,
            config.connect_timeout,
        );

        Self {
            config,
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get a reference to the broadcast registry
    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        self.coordinator.registry()
    }

    pub fn coordinator(&self) -> &SharedCoordinator<E> {
        &self.coordinator
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/stats", get(stats::<E>))
            .route("/webrtc/broadcast", post(broadcast::<E>))
            .route("/webrtc/consume", post(consume::<E>))
            .layer(cors_layer(&self.config.allowed_origins))
            .with_state(Arc::clone(&self.coordinator))
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Every remaining session is closed once the listener has stopped.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Relay signaling endpoint listening");

        let reaper = self
            .coordinator
            .supervisor()
            .spawn_reaper(self.config.registry.reap_interval);

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        // Stop the reaper before tearing sessions down
        reaper.abort();
        self.coordinator.supervisor().close_all().await;

        result.map_err(Error::from)
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::NoActiveBroadcast | Error::NegotiationFailed(_) => StatusCode::BAD_REQUEST,
            Error::ConnectivityFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "Signaling request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn parse_offer(
    request: std::result::Result<Json<SignalingRequest>, JsonRejection>,
) -> Result<SessionDescription> {
    let Json(request) = request.map_err(|e| Error::NegotiationFailed(e.body_text()))?;
    Ok(request.into_offer()?)
}

async fn index() -> &'static str {
    "webrtc relay up\n"
}

async fn stats<E: ConnectivityEngine>(
    State(coordinator): State<SharedCoordinator<E>>,
) -> Json<RelayStats> {
    Json(coordinator.registry().stats().await)
}

async fn broadcast<E: ConnectivityEngine>(
    State(coordinator): State<SharedCoordinator<E>>,
    request: std::result::Result<Json<SignalingRequest>, JsonRejection>,
) -> Result<Json<SignalingResponse>> {
    let offer = parse_offer(request)?;
    let negotiated = coordinator.publish(offer).await?;

    Ok(Json(negotiated.answer.into()))
}

async fn consume<E: ConnectivityEngine>(
    State(coordinator): State<SharedCoordinator<E>>,
    request: std::result::Result<Json<SignalingRequest>, JsonRejection>,
) -> Result<Json<SignalingResponse>> {
    let offer = parse_offer(request)?;
    let negotiated = coordinator.subscribe(offer).await?;

    Ok(Json(negotiated.answer.into()))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::engine::mock::{eventually, MockEngine, MockScript};

    const OFFER_JSON: &str = r#"{"sdp":{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\n"}}"#;

    fn make_server() -> RelayServer<MockEngine> {
        RelayServer::new(
            RelayConfig::default(),
            MockEngine::new(MockScript::connecting()),
        )
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_index() {
        let server = make_server();
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();

        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_consume_without_broadcast() {
        let server = make_server();

        let resp = server
            .router()
            .oneshot(post_json("/webrtc/consume", OFFER_JSON))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "no broadcast");
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let server = make_server();

        let resp = server
            .router()
            .oneshot(post_json("/webrtc/broadcast", r#"{"sdp":"v=0"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(resp).await["error"].is_string());
        assert!(server.registry().sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_then_consume() {
        let server = make_server();

        let resp = server
            .router()
            .oneshot(post_json("/webrtc/broadcast", OFFER_JSON))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let answer = json_body(resp).await;
        assert_eq!(answer["type"], "answer");
        assert!(answer["sdp"].as_str().unwrap().starts_with("v=0"));

        let registry = Arc::clone(server.registry());
        eventually(|| {
            let registry = Arc::clone(&registry);
            async move { registry.has_active_stream().await }
        })
        .await;

        let resp = server
            .router()
            .oneshot(post_json("/webrtc/consume", OFFER_JSON))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["type"], "answer");

        let req = Request::builder().uri("/stats").body(Body::empty()).unwrap();
        let stats = json_body(server.router().oneshot(req).await.unwrap()).await;
        assert_eq!(stats["broadcasting"], true);
        assert_eq!(stats["sessions_opened"], 2);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let server = make_server();
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/webrtc/consume")
            .header(header::ORIGIN, "https://nighthawkcoders.github.io")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let resp = server.router().oneshot(req).await.unwrap();
        let headers = resp.headers();

        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://nighthawkcoders.github.io"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn test_cors_unknown_origin() {
        let server = make_server();
        let req = Request::builder()
            .uri("/")
            .header(header::ORIGIN, "https://evil.example")
            .body(Body::empty())
            .unwrap();

        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let server = make_server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result = server.serve(listener, async {}).await;
        assert!(result.is_ok());
        assert!(server.registry().sessions().await.is_empty());
    }

    #[test]
    fn test_error_status() {
        let resp = Error::ConnectivityFailed("ice".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = Error::InternalInvariantViolation("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
