//! Injectable construction of `TunnelConnection`s.
//!
//! The bridge core must not depend on the session layer (which owns
//! client registration, authentication, and reconnect policy) to avoid
//! a cyclic crate dependency, so it only ever sees a
//! `TunnelConnectionFactory` trait object. The session layer supplies
//! the real implementation at wiring time.

use crate::TunnelConnection;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tunnox_transport::{TransportError, TransportRegistry};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol not available: {0}")]
    ProtocolNotAvailable(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[async_trait]
pub trait TunnelConnectionFactory: Send + Sync {
    /// Dial `addr` over the named transport and wrap the resulting
    /// stream as a `TunnelConnection`. `cancel` is honoured by the
    /// underlying adapter's connect attempt.
    async fn dial(
        &self,
        protocol: &str,
        addr: SocketAddr,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> Result<TunnelConnection, ConnectionError>;
}

/// Factory backed directly by a transport registry: the straightforward
/// production wiring, dialing whichever named adapter the caller asks
/// for and surfacing `ProtocolNotAvailable` when that adapter was
/// compiled out or never registered.
pub struct RegistryConnectionFactory {
    registry: Arc<TransportRegistry>,
}

impl RegistryConnectionFactory {
    pub fn new(registry: Arc<TransportRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TunnelConnectionFactory for RegistryConnectionFactory {
    async fn dial(
        &self,
        protocol: &str,
        addr: SocketAddr,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> Result<TunnelConnection, ConnectionError> {
        let dialer = self
            .registry
            .get(protocol)
            .ok_or_else(|| ConnectionError::ProtocolNotAvailable(protocol.to_string()))?;
        let stream = dialer.dial(addr, server_name, cancel).await?;
        let id = format!("{protocol}-{addr}");
        Ok(TunnelConnection::new(id, dialer.name().to_string(), stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnox_transport::{BoxedStream, Dialer};

    #[derive(Debug, Default)]
    struct StubDialer;

    #[async_trait]
    impl Dialer for StubDialer {
        async fn dial(
            &self,
            _addr: SocketAddr,
            _server_name: &str,
            _cancel: &CancellationToken,
        ) -> Result<BoxedStream, TransportError> {
            Err(TransportError::Connection("stub never connects".into()))
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn dial_surfaces_protocol_not_available_when_unregistered() {
        let registry = Arc::new(TransportRegistry::default());
        let factory = RegistryConnectionFactory::new(registry);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let err = factory
            .dial("tcp", addr, "", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::ProtocolNotAvailable(_)));
    }

    #[tokio::test]
    async fn dial_propagates_transport_error_from_registered_dialer() {
        let mut registry = TransportRegistry::default();
        registry.register(0, Arc::new(StubDialer));
        let factory = RegistryConnectionFactory::new(Arc::new(registry));
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let err = factory
            .dial("stub", addr, "", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(_)));
    }
}
