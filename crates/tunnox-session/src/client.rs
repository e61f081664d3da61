//! Client-side session: dials a relay's control connection through the
//! injected [`TunnelConnectionFactory`], installs it as a bridge's
//! source, and reconnects with backoff when told the connection died.
//!
//! Disconnect detection is deliberately not this module's job — it
//! belongs to the transport/connection layer, the same division the
//! teacher's `ReverseTunnelClient` draws between its connection loop
//! and its shutdown signal. `ClientSession` only exposes
//! [`ClientSession::reconnect`] as an explicit trigger; callers (or a
//! future liveness watcher) call it when they know the source is gone.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tunnox_bridge::Bridge;
use tunnox_connection::TunnelConnectionFactory;

use crate::error::SessionError;
use crate::reconnect::{ReconnectConfig, ReconnectManager};

/// Where and how to reach the relay's control connection, and the
/// backoff policy to use when it drops.
pub struct ClientSessionConfig {
    pub protocol: String,
    pub relay_addr: SocketAddr,
    pub server_name: String,
    pub reconnect: ReconnectConfig,
}

/// Drives the client side of one bridge's source connection: dials
/// once at construction, and redials with exponential backoff each
/// time [`ClientSession::reconnect`] is called.
pub struct ClientSession {
    factory: Arc<dyn TunnelConnectionFactory>,
    config: ClientSessionConfig,
    bridge: Arc<Bridge>,
    cancel: CancellationToken,
}

impl ClientSession {
    /// Dials the relay and installs the resulting connection as
    /// `bridge`'s source before returning.
    pub async fn connect(
        factory: Arc<dyn TunnelConnectionFactory>,
        config: ClientSessionConfig,
        bridge: Arc<Bridge>,
    ) -> Result<Self, SessionError> {
        let cancel = CancellationToken::new();
        let conn = factory
            .dial(&config.protocol, config.relay_addr, &config.server_name, &cancel)
            .await?;
        bridge.set_source_connection(Some(conn)).await;

        Ok(Self {
            factory,
            config,
            bridge,
            cancel,
        })
    }

    /// Signals the session to stop reconnecting; an in-flight
    /// `reconnect()` backoff sleep is cancelled promptly.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Redials the relay with exponential backoff, reinstalling the new
    /// connection as the bridge's source on success. Called by the
    /// owner once it learns the current source connection has died —
    /// this session never detects that on its own.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        let mut backoff = ReconnectManager::new(self.config.reconnect.clone());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(SessionError::ReconnectExhausted);
                }
                result = backoff.wait() => {
                    result.map_err(|_| SessionError::ReconnectExhausted)?;
                }
            }

            match self
                .factory
                .dial(&self.config.protocol, self.config.relay_addr, &self.config.server_name, &self.cancel)
                .await
            {
                Ok(conn) => {
                    info!(tunnel_id = self.bridge.tunnel_id(), attempt = backoff.attempt(), "reconnected");
                    self.bridge.set_source_connection(Some(conn)).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(tunnel_id = self.bridge.tunnel_id(), attempt = backoff.attempt(), error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
    use tunnox_bridge::BridgeConfig;
    use tunnox_connection::{ConnectionError, TunnelConnection};
    use tunnox_transport::{BoxedStream, ConnectionStats, TunnelStream};

    #[derive(Debug)]
    struct TestStream(DuplexStream);

    impl AsyncRead for TestStream {
        fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for TestStream {
        fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
        }
        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_flush(cx)
        }
        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
        }
    }

    impl TunnelStream for TestStream {
        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:1".parse().unwrap()
        }
        fn connection_id(&self) -> String {
            "test".into()
        }
        fn stats(&self) -> ConnectionStats {
            ConnectionStats::default()
        }
    }

    fn test_stream() -> BoxedStream {
        let (near, _far) = tokio::io::duplex(4096);
        Box::pin(TestStream(near))
    }

    /// Fails exactly the dial at index `fail_on_attempt` (0-based across
    /// every call this factory ever makes), succeeds otherwise.
    struct FlakyFactory {
        fail_on_attempt: Option<usize>,
        attempts: AtomicUsize,
    }

    impl FlakyFactory {
        fn reliable() -> Self {
            Self { fail_on_attempt: None, attempts: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl TunnelConnectionFactory for FlakyFactory {
        async fn dial(
            &self,
            protocol: &str,
            _addr: SocketAddr,
            _server_name: &str,
            _cancel: &CancellationToken,
        ) -> Result<TunnelConnection, ConnectionError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_attempt == Some(n) {
                return Err(ConnectionError::ProtocolNotAvailable(protocol.to_string()));
            }
            Ok(TunnelConnection::new("relay", protocol, test_stream()))
        }
    }

    fn fast_reconnect_config() -> ReconnectConfig {
        ReconnectConfig {
            initial_backoff: std::time::Duration::from_millis(5),
            max_backoff: std::time::Duration::from_millis(20),
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    #[tokio::test]
    async fn connect_installs_the_dialed_connection_as_source() {
        let factory = Arc::new(FlakyFactory::reliable());
        let bridge = Bridge::new(BridgeConfig::new("t-client"));
        let config = ClientSessionConfig {
            protocol: "stub".into(),
            relay_addr: "127.0.0.1:1".parse().unwrap(),
            server_name: String::new(),
            reconnect: fast_reconnect_config(),
        };

        let session = ClientSession::connect(factory, config, bridge.clone()).await.unwrap();
        assert_eq!(session.bridge().tunnel_id(), "t-client");
    }

    #[tokio::test]
    async fn reconnect_retries_through_transient_failures() {
        let factory = Arc::new(FlakyFactory { fail_on_attempt: Some(1), attempts: AtomicUsize::new(0) });
        let bridge = Bridge::new(BridgeConfig::new("t-client"));
        let config = ClientSessionConfig {
            protocol: "stub".into(),
            relay_addr: "127.0.0.1:1".parse().unwrap(),
            server_name: String::new(),
            reconnect: fast_reconnect_config(),
        };

        let session = ClientSession::connect(factory, config, bridge).await.unwrap();
        session.reconnect().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_aborts_an_in_flight_reconnect() {
        let factory = Arc::new(FlakyFactory::reliable());
        let bridge = Bridge::new(BridgeConfig::new("t-client"));
        let config = ClientSessionConfig {
            protocol: "stub".into(),
            relay_addr: "127.0.0.1:1".parse().unwrap(),
            server_name: String::new(),
            reconnect: fast_reconnect_config(),
        };
        let session = ClientSession::connect(factory, config, bridge).await.unwrap();

        session.shutdown();
        let err = session.reconnect().await.unwrap_err();
        assert!(matches!(err, SessionError::ReconnectExhausted));
    }
}
