//! QUIC transport adapter using `quinn`.
//!
//! One bidirectional QUIC stream per tunnel connection. QUIC natively
//! multiplexes, but the data-plane's `Dialer`/`Listener` contract hands
//! out a single [`TunnelStream`] per call, so each dial opens exactly
//! one stream and each accepted connection yields exactly one.

pub mod config;
pub mod stream;

pub use config::QuicConfig;
pub use stream::QuicTunnelStream;

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tunnox_cert::Certificate;
use tunnox_transport::{
    BoxedStream, Dialer, Listener, TransportError, TransportResult,
};

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

#[derive(Debug)]
pub struct QuicDialer {
    config: QuicConfig,
    endpoint: quinn::Endpoint,
}

impl QuicDialer {
    pub fn new(config: QuicConfig) -> TransportResult<Self> {
        ensure_crypto_provider();
        let client_config = config.build_client_config()?;
        let mut endpoint = quinn::Endpoint::client("0.0.0.0:0".parse().unwrap())
            .map_err(TransportError::Io)?;
        endpoint.set_default_client_config(client_config);
        Ok(Self { config, endpoint })
    }
}

#[async_trait]
impl Dialer for QuicDialer {
    async fn dial(
        &self,
        addr: SocketAddr,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<BoxedStream> {
        let connecting = self
            .endpoint
            .connect(addr, server_name)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Connection("dial cancelled".into())),
            result = connecting => result.map_err(|e| TransportError::Connection(e.to_string()))?,
        };
        let (send, recv) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Connection("dial cancelled".into())),
            result = connection.open_bi() => result.map_err(|e| TransportError::Connection(e.to_string()))?,
        };
        debug!(%addr, "quic stream opened");
        Ok(Box::pin(QuicTunnelStream::new(send, recv, addr, connection.stable_id())))
    }

    fn name(&self) -> &str {
        "quic"
    }
}

#[derive(Debug)]
pub struct QuicListenerAdapter {
    endpoint: quinn::Endpoint,
}

impl QuicListenerAdapter {
    pub fn bind(addr: SocketAddr, config: QuicConfig, cert: &Certificate) -> TransportResult<Self> {
        ensure_crypto_provider();
        let server_config = config.build_server_config(cert)?;
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(TransportError::Io)?;
        info!(%addr, "quic listener bound");
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl Listener for QuicListenerAdapter {
    async fn accept(&self) -> TransportResult<(BoxedStream, SocketAddr)> {
        // `Endpoint::accept` resolves to `None` once `close()` has been
        // called and no more connections can arrive — that's the closed
        // signal, not a network error.
        let incoming = self.endpoint.accept().await.ok_or(TransportError::StreamClosed)?;
        let connection = incoming
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let peer_addr = connection.remote_address();
        let (send, recv) = connection
            .accept_bi()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        debug!(%peer_addr, "quic stream accepted");
        let boxed: BoxedStream = Box::pin(QuicTunnelStream::new(send, recv, peer_addr, connection.stable_id()));
        Ok((boxed, peer_addr))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.endpoint.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) {
        self.endpoint.close(0u32.into(), b"closed");
    }
}

/// Generates a fresh RSA-2048 self-signed certificate for `domain` and
/// binds a QUIC listener to it in one step, for nodes that don't need
/// persistent certificate identity across restarts.
pub fn bind_with_self_signed_cert(
    addr: SocketAddr,
    domain: &str,
    config: QuicConfig,
) -> TransportResult<QuicListenerAdapter> {
    let cert = tunnox_cert::generate_self_signed_cert(domain)
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .into_certificate()
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    QuicListenerAdapter::bind(addr, config, &cert)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_after_close_returns_stream_closed() {
        let listener = bind_with_self_signed_cert(
            "127.0.0.1:0".parse().unwrap(),
            "localhost",
            QuicConfig::default(),
        )
        .unwrap();
        listener.close().await;
        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed));
    }

    #[tokio::test]
    async fn dial_honours_cancellation() {
        let dialer = QuicDialer::new(QuicConfig::client_insecure()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err = dialer.dial(addr, "localhost", &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
