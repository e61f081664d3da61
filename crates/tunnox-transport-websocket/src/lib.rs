//! WebSocket transport adapter.
//!
//! One WebSocket connection carries exactly one tunnel stream (see
//! [`crate::stream::WsTunnelStream`] for the binary-frame byte mapping).
//! The client dialer normalizes whatever scheme it's given
//! (`http`/`https` map to `ws`/`wss`) and appends the default tunnel path
//! when the caller didn't supply one.

pub mod connection;
pub mod stream;

pub use stream::WsTunnelStream;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tunnox_transport::{BoxedStream, Dialer, Listener, TransportError, TransportResult};
use url::Url;

const DEFAULT_PATH: &str = "/_tunnox";

fn normalize_url(server_name: &str, addr: SocketAddr) -> TransportResult<Url> {
    let raw = if server_name.contains("://") {
        server_name.to_string()
    } else {
        format!("ws://{addr}")
    };

    let mut url = Url::parse(&raw).map_err(|e| TransportError::Configuration(e.to_string()))?;
    match url.scheme() {
        "http" => url.set_scheme("ws").ok(),
        "https" => url.set_scheme("wss").ok(),
        "ws" | "wss" => Some(()),
        other => return Err(TransportError::Configuration(format!("unsupported scheme: {other}"))),
    };

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_PATH);
    }
    Ok(url)
}

#[derive(Debug, Default)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(
        &self,
        addr: SocketAddr,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<BoxedStream> {
        let url = normalize_url(server_name, addr)?;
        let (ws, _response) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Connection("dial cancelled".into())),
            result = tokio_tungstenite::connect_async(url.as_str()) => {
                result.map_err(|e| TransportError::Connection(e.to_string()))?
            }
        };
        debug!(%addr, %url, "websocket dialed");
        Ok(Box::pin(WsTunnelStream::new(ws, addr)))
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

#[derive(Debug)]
pub struct WsListenerAdapter {
    listener: TcpListener,
    closed: AtomicBool,
}

impl WsListenerAdapter {
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(TransportError::Io)?;
        info!(%addr, "websocket listener bound");
        Ok(Self {
            listener,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Listener for WsListenerAdapter {
    async fn accept(&self) -> TransportResult<(BoxedStream, SocketAddr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::StreamClosed);
        }
        let (tcp, peer_addr) = self.listener.accept().await.map_err(TransportError::Io)?;
        let ws = accept_handshake(tcp).await?;
        debug!(%peer_addr, "websocket handshake complete");
        Ok((Box::pin(WsTunnelStream::new(ws, peer_addr)), peer_addr))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

async fn accept_handshake(
    tcp: TcpStream,
) -> TransportResult<tokio_tungstenite::WebSocketStream<TcpStream>> {
    tokio_tungstenite::accept_async(tcp)
        .await
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_http_scheme_and_default_path() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let url = normalize_url("http://example.com", addr).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), DEFAULT_PATH);
    }

    #[test]
    fn preserves_explicit_path() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let url = normalize_url("wss://example.com/custom", addr).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/custom");
    }

    #[test]
    fn defaults_to_plain_ws_when_no_scheme_given() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let url = normalize_url("", addr).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn accept_after_close_returns_stream_closed() {
        let listener = WsListenerAdapter::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        listener.close().await;
        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed));
    }

    #[tokio::test]
    async fn dial_honours_cancellation() {
        let dialer = WsDialer;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err = dialer.dial(addr, "", &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
