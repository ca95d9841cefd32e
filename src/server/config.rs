//! Relay configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::engine::rtc::DEFAULT_KEYFRAME_REQUEST_INTERVAL;
use crate::registry::RegistryConfig;
use crate::signaling::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_NEGOTIATION_TIMEOUT};

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP signaling endpoint binds to
    pub bind_addr: SocketAddr,

    /// STUN server URLs handed to the connectivity engine
    pub ice_servers: Vec<String>,

    /// Offer/answer exchange must complete within this time
    pub negotiation_timeout: Duration,

    /// Transport must connect within this time after answering
    pub connect_timeout: Duration,

    /// Browser origins allowed to call the signaling endpoints
    pub allowed_origins: Vec<String>,

    /// Keyframe request interval for publishers (zero disables)
    pub keyframe_request_interval: Duration,

    /// Registry configuration
    pub registry: RegistryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 443)),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            allowed_origins: vec![
                "http://127.0.0.1:4100".to_owned(),
                "https://nighthawkcoders.github.io".to_owned(),
            ],
            keyframe_request_interval: DEFAULT_KEYFRAME_REQUEST_INTERVAL,
            registry: RegistryConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Replace the STUN server list
    pub fn ice_servers<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ice_servers = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set negotiation timeout
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Allow an additional browser origin
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Set keyframe request interval
    pub fn keyframe_request_interval(mut self, interval: Duration) -> Self {
        self.keyframe_request_interval = interval;
        self
    }

    /// Set registry configuration
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}
