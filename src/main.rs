//! tunnoxd - minimal end-to-end relay binary.
//!
//! Accepts inbound connections on `--bind`, dials `--target` over the
//! named transport, and lets `tunnox-session`/`tunnox-bridge` pump
//! bytes between the two under an optional rate limit. Not a general
//! relay server (no multi-tunnel control protocol, no cloud-control
//! wiring) — just enough to exercise the bridge core end to end.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tunnox_connection::RegistryConnectionFactory;
use tunnox_session::{AllowAllAuthenticator, SessionManager, TargetSpec};
use tunnox_transport::{Listener, TransportRegistry};
use tunnox_transport_kcp::KcpDialer;
use tunnox_transport_quic::{QuicConfig, QuicDialer};
use tunnox_transport_tcp::{TcpDialer, TcpListenerAdapter};
use tunnox_transport_udp::UdpDialer;
use tunnox_transport_websocket::WsDialer;

/// tunnoxd - relay local connections to a remote address through the bridge core.
#[derive(Parser, Debug)]
#[command(name = "tunnoxd", version, about)]
struct Cli {
    /// Local address to accept inbound connections on.
    #[arg(long, env = "TUNNOX_BIND")]
    bind: SocketAddr,

    /// Remote address to forward each accepted connection to.
    #[arg(long, env = "TUNNOX_TARGET")]
    target: SocketAddr,

    /// Transport to dial the target over (tcp, kcp, udp, websocket).
    #[arg(long, env = "TUNNOX_TARGET_PROTOCOL", default_value = "tcp")]
    target_protocol: String,

    /// Server name presented for TLS verification on encrypted transports.
    #[arg(long, env = "TUNNOX_SERVER_NAME", default_value = "")]
    server_name: String,

    /// Per-tunnel rate limit in bytes/sec. Unset means unthrottled.
    #[arg(long, env = "TUNNOX_RATE_LIMIT_BYTES_PER_SEC")]
    rate_limit_bytes_per_sec: Option<u64>,

    /// Skip certificate verification when dialing the target over QUIC
    /// (insecure, for development only).
    #[arg(long)]
    insecure: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn build_registry(insecure: bool) -> Result<TransportRegistry> {
    let mut registry = TransportRegistry::new();
    registry.register(0, Arc::new(TcpDialer));
    registry.register(10, Arc::new(KcpDialer));

    let quic_config = if insecure { QuicConfig::client_insecure() } else { QuicConfig::client_default() };
    let quic_dialer = QuicDialer::new(quic_config).context("failed to initialize QUIC dialer")?;
    registry.register(20, Arc::new(quic_dialer));

    registry.register(30, Arc::new(WsDialer));
    registry.register(40, Arc::new(UdpDialer));
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!(git_hash = env!("GIT_HASH"), "tunnoxd starting");

    let registry = Arc::new(build_registry(cli.insecure)?);
    let factory = Arc::new(RegistryConnectionFactory::new(registry));
    let manager = SessionManager::new(factory, Arc::new(AllowAllAuthenticator)).into_shared();

    let listener = TcpListenerAdapter::bind(cli.bind)
        .await
        .context("failed to bind source listener")?;
    info!(bind = %cli.bind, target = %cli.target, target_protocol = cli.target_protocol.as_str(), "listening");

    let next_tunnel_id = Arc::new(AtomicU64::new(0));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("received Ctrl+C, shutting down");
                listener.close().await;
                manager.shutdown();
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let tunnel_id = format!("tunnel-{}", next_tunnel_id.fetch_add(1, Ordering::Relaxed));
                let manager = manager.clone();
                let target = TargetSpec {
                    protocol: cli.target_protocol.clone(),
                    addr: cli.target,
                    server_name: cli.server_name.clone(),
                    mapping_id: None,
                    rate_limit_bytes_per_sec: cli.rate_limit_bytes_per_sec,
                };

                tokio::spawn(async move {
                    info!(tunnel_id = tunnel_id.as_str(), peer = %peer_addr, "accepted connection");
                    if let Err(e) = manager.open_local_tunnel(tunnel_id.clone(), "tcp", stream, target).await {
                        error!(tunnel_id = tunnel_id.as_str(), error = %e, "failed to open tunnel");
                    }
                });
            }
        }
    }

    info!("tunnoxd stopped");
    Ok(())
}
