//! Transport abstraction layer for tunnel connections.
//!
//! Generalizes the teacher's multiplexed, message-oriented transport
//! traits into plain byte-stream traits: the bridge's data-plane pump
//! copies raw bytes and does not care whether the underlying transport
//! multiplexes streams internally (TCP does not; QUIC/KCP-over-yamux do).
//! Each adapter crate (`tunnox-transport-tcp`, `-kcp`, `-quic`,
//! `-websocket`, `-udp`) implements [`Dialer`] and [`Listener`] against
//! its own connection type and exposes a [`TunnelStream`].
//!
//! # Architecture
//!
//! ```text
//! tunnox-bridge / tunnox-session
//!          │
//!          │ uses
//!          ▼
//! tunnox-transport (this crate): Dialer, Listener, TunnelStream, TransportRegistry
//!          │
//!          │ implemented by
//!          ▼
//! tcp · kcp · quic · websocket · udp
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed")]
    StreamClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timeout")]
    Timeout,

    #[error("tls error: {0}")]
    Tls(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown transport: {0}")]
    UnknownTransport(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A single bidirectional byte stream, already demultiplexed if the
/// underlying transport multiplexes (QUIC streams, yamux-over-KCP).
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Sync + Unpin + Debug {
    /// The peer address this stream is connected to.
    fn peer_addr(&self) -> SocketAddr;

    /// A stable identifier for logging/correlation across the stream's
    /// lifetime.
    fn connection_id(&self) -> String;

    /// Point-in-time transfer counters, if the adapter tracks them
    /// independently of the bridge's own accounting.
    fn stats(&self) -> ConnectionStats;
}

pub type BoxedStream = Pin<Box<dyn TunnelStream>>;

/// Point-in-time counters an adapter may expose about a stream or
/// connection. The bridge keeps its own authoritative counters
/// (spec.md §4.5); this is informational only.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: Option<u32>,
    pub uptime_secs: u64,
}

/// Server side: accepts incoming transport connections for one protocol.
#[async_trait]
pub trait Listener: Send + Sync + Debug {
    /// Accept the next incoming stream and the remote peer's address.
    async fn accept(&self) -> TransportResult<(BoxedStream, SocketAddr)>;

    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Stop accepting new connections. Idempotent.
    async fn close(&self);
}

/// Client side: establishes outgoing transport connections for one
/// protocol.
#[async_trait]
pub trait Dialer: Send + Sync + Debug {
    /// Dial `addr`. `server_name` is used for TLS verification where the
    /// transport is encrypted (QUIC, WebSocket-over-TLS); ignored by
    /// plaintext transports (raw TCP, UDP, KCP). `cancel` is raced
    /// against the connect attempt; a cancellation in flight aborts the
    /// dial and returns [`TransportError::Connection`] rather than
    /// leaving the caller blocked (spec.md: dial honours the caller's
    /// cancellation).
    async fn dial(
        &self,
        addr: SocketAddr,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<BoxedStream>;

    /// The name this dialer registers under (see [`TransportRegistry`]).
    fn name(&self) -> &str;
}

/// Security configuration shared by encrypted transports.
#[derive(Debug, Clone)]
pub struct TransportSecurityConfig {
    pub verify_server_cert: bool,
    pub root_certs: Vec<Vec<u8>>,
    pub alpn_protocols: Vec<String>,
}

impl Default for TransportSecurityConfig {
    fn default() -> Self {
        Self {
            verify_server_cert: true,
            root_certs: Vec::new(),
            alpn_protocols: vec!["tunnox-quic".to_string()],
        }
    }
}

/// A named, priority-ordered set of dialers used to try transports in
/// preference order when a client is not pinned to a single protocol
/// (spec.md §4.1). Lower `priority` is tried first.
#[derive(Debug, Default)]
pub struct TransportRegistry {
    dialers: BTreeMap<(i32, String), Arc<dyn Dialer>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            dialers: BTreeMap::new(),
        }
    }

    /// Registers `dialer` under its own [`Dialer::name`] at `priority`.
    /// Re-registering the same name replaces the previous entry only if
    /// the priority also matches; otherwise both entries exist and the
    /// lower-priority one is tried first.
    pub fn register(&mut self, priority: i32, dialer: Arc<dyn Dialer>) {
        self.dialers.insert((priority, dialer.name().to_string()), dialer);
    }

    /// Looks up a dialer by exact name, regardless of priority.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Dialer>> {
        self.dialers
            .iter()
            .find(|((_, n), _)| n == name)
            .map(|(_, d)| d.clone())
    }

    /// Dialers in ascending-priority order (most preferred first).
    pub fn ordered(&self) -> Vec<Arc<dyn Dialer>> {
        self.dialers.values().cloned().collect()
    }

    /// Tries each dialer in priority order, returning the first success.
    pub async fn dial_any(
        &self,
        addr: SocketAddr,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<BoxedStream> {
        let mut last_err = TransportError::Configuration("no transports registered".into());
        for dialer in self.ordered() {
            if cancel.is_cancelled() {
                return Err(TransportError::Connection("dial cancelled".into()));
            }
            match dialer.dial(addr, server_name, cancel).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StubDialer(&'static str);

    #[async_trait]
    impl Dialer for StubDialer {
        async fn dial(
            &self,
            _addr: SocketAddr,
            _server_name: &str,
            _cancel: &CancellationToken,
        ) -> TransportResult<BoxedStream> {
            Err(TransportError::Connection("stub".into()))
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn registry_orders_by_priority() {
        let mut reg = TransportRegistry::new();
        reg.register(10, Arc::new(StubDialer("websocket")));
        reg.register(0, Arc::new(StubDialer("quic")));
        reg.register(5, Arc::new(StubDialer("tcp")));

        let names: Vec<_> = reg.ordered().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["quic", "tcp", "websocket"]);
    }

    #[test]
    fn registry_lookup_by_name() {
        let mut reg = TransportRegistry::new();
        reg.register(0, Arc::new(StubDialer("tcp")));
        assert!(reg.get("tcp").is_some());
        assert!(reg.get("kcp").is_none());
    }

    #[tokio::test]
    async fn dial_any_surfaces_last_error_when_all_fail() {
        let mut reg = TransportRegistry::new();
        reg.register(0, Arc::new(StubDialer("tcp")));
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err = reg
            .dial_any(addr, "localhost", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[tokio::test]
    async fn dial_any_refuses_when_already_cancelled() {
        let mut reg = TransportRegistry::new();
        reg.register(0, Arc::new(StubDialer("tcp")));
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reg.dial_any(addr, "localhost", &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
