//! `TunnelConnection` — the only handle the bridge consumes — and the
//! data forwarder that adapts it to a flat `Read`/`Write`/`Close`
//! contract.
//!
//! Every adapter in `tunnox-transport` already exposes a single object
//! that is both `AsyncRead` and `AsyncWrite` (the generalized
//! `TunnelStream` contract), so the forwarder construction rules
//! collapse onto the cheapest case in practice: `tokio::io::split`
//! gives a composite reader/writer pair over that single stream with
//! no extra framing. The fallback rungs still exist so a connection
//! with no live stream (a bridge waiting for its target, or a
//! cross-node placeholder) degrades to a lifecycle-only shell instead
//! of panicking.

pub mod factory;
pub mod forwarder;

pub use factory::{ConnectionError, RegistryConnectionFactory, TunnelConnectionFactory};
pub use forwarder::{build_forwarder, CompositeForwarder, Forwarder, NullForwarder};

use std::net::SocketAddr;
use std::sync::Arc;
use tunnox_transport::BoxedStream;

/// The only handle the bridge ever touches. Holds just enough identity
/// to log and account for traffic; all byte movement goes through the
/// [`Forwarder`] built at construction time.
pub struct TunnelConnection {
    id: String,
    protocol: String,
    peer_addr: SocketAddr,
    forwarder: Arc<dyn Forwarder>,
}

impl TunnelConnection {
    /// Build a connection around a live transport stream (forwarder
    /// construction rule 1).
    pub fn new(id: impl Into<String>, protocol: impl Into<String>, stream: BoxedStream) -> Self {
        let peer_addr = stream.peer_addr();
        Self {
            id: id.into(),
            protocol: protocol.into(),
            peer_addr,
            forwarder: build_forwarder(Some(stream)),
        }
    }

    /// Build a connection with no underlying stream at all (forwarder
    /// construction rule 4): reads return EOF, writes are discarded,
    /// close is a no-op. Used for a cross-node bridge whose byte
    /// movement is owned elsewhere, or a placeholder before the real
    /// side attaches.
    pub fn lifecycle_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            protocol: "none".to_string(),
            peer_addr: "0.0.0.0:0".parse().expect("valid placeholder addr"),
            forwarder: build_forwarder(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn protocol(&self) -> &str {
        self.protocol
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn forwarder(&self) -> Arc<dyn Forwarder> {
        self.forwarder.clone()
    }

    pub async fn close(&self) -> std::io::Result<()> {
        self.forwarder.close().await
    }
}

impl std::fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}
