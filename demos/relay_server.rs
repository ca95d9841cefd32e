//! Single-broadcaster WebRTC relay
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                   # binds to 0.0.0.0:443
//!   cargo run --example relay_server localhost:8086    # binds to 127.0.0.1:8086
//!   cargo run --example relay_server 0.0.0.0           # binds to 0.0.0.0:443
//!
//! ## Broadcasting
//!
//! POST the browser's offer to `/webrtc/broadcast`:
//!   { "sdp": { "type": "offer", "sdp": "v=0..." } }
//!
//! ## Viewing
//!
//! POST a receive-only offer to `/webrtc/consume`. The relay answers with
//! `{"error":"no broadcast"}` (400) while nobody is broadcasting.
//!
//! `GET /stats` reports sessions and frame counters.

use std::net::SocketAddr;

use webrtc_relay::{RelayConfig, RelayServer};

/// Parse bind address from command line argument.
///
/// Accepts `IP:PORT`, a bare IP (port 443), or `localhost[:PORT]`.
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 443;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: relay_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:443)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = RelayConfig::default();
    if let Some(addr_str) = args.get(1) {
        match parse_bind_addr(addr_str) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("Starting WebRTC relay on {}", config.bind_addr);
    println!("  broadcast: POST /webrtc/broadcast");
    println!("  consume:   POST /webrtc/consume");
    println!();

    let server = RelayServer::webrtc(config)?;

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
