//! Relay server
//!
//! HTTP signaling endpoint, its configuration, and the background reaper
//! lifecycle.

pub mod config;
pub mod listener;

pub use config::RelayConfig;
pub use listener::RelayServer;
