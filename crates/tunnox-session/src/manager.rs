//! Accepts an inbound transport stream as the source side of a new
//! bridge, dials the target through an injectable factory, and owns the
//! registry of live bridges — the once-only-close + lock-per-slot
//! pattern generalized to "a lock-guarded map of slots" for the
//! multi-tunnel case, the same shape `localup-control`'s
//! `TunnelConnectionManager` uses for its own connection map.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tunnox_bridge::{Bridge, BridgeConfig};
use tunnox_connection::{TunnelConnection, TunnelConnectionFactory};
use tunnox_control::CloudControl;
use tunnox_proto::waiting_state::DEFAULT_WAITING_TTL_SECS;
use tunnox_proto::WaitingState;
use tunnox_ratelimit::QuotaController;
use tunnox_router::RoutingTable;
use tunnox_transport::BoxedStream;

use crate::auth::{Authenticator, ClientIdentity};
use crate::cross_node::RelayedCrossNodeConnection;
use crate::error::SessionError;

/// Everything needed to open one local bridge: where the target lives
/// and (optionally) which cloud-control mapping to bill traffic
/// against.
pub struct TargetSpec {
    pub protocol: String,
    pub addr: SocketAddr,
    pub server_name: String,
    pub mapping_id: Option<String>,
    pub rate_limit_bytes_per_sec: Option<u64>,
}

/// Everything needed to publish a source-side bridge that is waiting
/// for its target to be spliced in from elsewhere, because the target
/// client's owning node is not known yet (or is not this node).
pub struct WaitingTunnelSpec {
    pub mapping_id: String,
    pub secret_key: String,
    pub source_client_id: i64,
    pub target_client_id: i64,
    pub target_host: String,
    pub target_port: u16,
    pub rate_limit_bytes_per_sec: Option<u64>,
}

pub struct SessionManager {
    factory: Arc<dyn TunnelConnectionFactory>,
    authenticator: Arc<dyn Authenticator>,
    quota_controller: Option<Arc<dyn QuotaController>>,
    cloud_control: Option<Arc<dyn CloudControl>>,
    routing: Option<Arc<RoutingTable>>,
    node_id: String,
    bridges: RwLock<HashMap<String, Arc<Bridge>>>,
    /// Cancelled on [`Self::shutdown`]; raced against every dial this
    /// manager issues so an in-flight dial doesn't outlive the manager.
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn TunnelConnectionFactory>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            factory,
            authenticator,
            quota_controller: None,
            cloud_control: None,
            routing: None,
            node_id: "local".to_string(),
            bridges: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancels every dial currently in flight through this manager (e.g.
    /// a pending [`Self::open_local_tunnel`] or [`Self::splice_remote_target`]
    /// call) and any issued afterwards.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn with_quota_controller(mut self, quota_controller: Arc<dyn QuotaController>) -> Self {
        self.quota_controller = Some(quota_controller);
        self
    }

    pub fn with_cloud_control(mut self, cloud_control: Arc<dyn CloudControl>) -> Self {
        self.cloud_control = Some(cloud_control);
        self
    }

    /// Attaches the routing table and this node's own id, enabling
    /// [`Self::open_waiting_tunnel`], [`Self::splice_remote_target`] and
    /// [`Self::attach_cross_node_link`]. A manager with no routing table
    /// can only ever bridge same-node source/target pairs.
    pub fn with_routing(mut self, routing: Arc<RoutingTable>, node_id: impl Into<String>) -> Self {
        self.routing = Some(routing);
        self.node_id = node_id.into();
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub async fn authenticate(&self, credential: &str) -> Result<ClientIdentity, SessionError> {
        self.authenticator.authenticate(credential).await
    }

    /// Wraps `source_stream` as the source side of a brand-new bridge,
    /// dials `target` via the injected factory for the target side, and
    /// spawns the bridge's run loop. The returned handle is already
    /// registered; it deregisters itself once the bridge's run loop
    /// returns.
    pub async fn open_local_tunnel(
        self: &Arc<Self>,
        tunnel_id: impl Into<String>,
        source_protocol: &str,
        source_stream: BoxedStream,
        target: TargetSpec,
    ) -> Result<Arc<Bridge>, SessionError> {
        let tunnel_id = tunnel_id.into();
        let source = TunnelConnection::new(format!("{tunnel_id}-src"), source_protocol, source_stream);
        let target_conn = self
            .factory
            .dial(&target.protocol, target.addr, &target.server_name, &self.cancel)
            .await?;

        let mut cfg = BridgeConfig::new(tunnel_id.clone());
        cfg.mapping_id = target.mapping_id;
        cfg.rate_limit_bytes_per_sec = target.rate_limit_bytes_per_sec;
        cfg.quota_controller = self.quota_controller.clone();
        cfg.cloud_control = self.cloud_control.clone();

        let bridge = Bridge::new(cfg);
        bridge.set_source_connection(Some(source)).await;
        bridge.set_target_connection(target_conn).await;

        self.register_and_run(bridge.clone()).await;
        Ok(bridge)
    }

    /// Wraps `source_stream` as a bridge's source, same as
    /// [`Self::open_local_tunnel`], but the target isn't dialed here:
    /// this node publishes a [`WaitingState`] naming itself
    /// (`source_node_id`) and the target host/port it ultimately wants
    /// reached, and returns a bridge that sits in `WaitingForTarget`
    /// until some node calls [`Self::splice_remote_target`] for the
    /// same mapping and that node (or a third one) calls
    /// [`Self::attach_cross_node_link`] back here with `tunnel_id`.
    /// Used when the target client's owning node isn't known at accept
    /// time — the common case in a multi-node deployment.
    pub async fn open_waiting_tunnel(
        self: &Arc<Self>,
        tunnel_id: impl Into<String>,
        source_protocol: &str,
        source_stream: BoxedStream,
        spec: WaitingTunnelSpec,
    ) -> Result<Arc<Bridge>, SessionError> {
        let routing = self.routing.clone().ok_or(SessionError::RoutingNotConfigured)?;
        let tunnel_id = tunnel_id.into();
        let source = TunnelConnection::new(format!("{tunnel_id}-src"), source_protocol, source_stream);

        let mut cfg = BridgeConfig::new(tunnel_id.clone());
        cfg.mapping_id = Some(spec.mapping_id.clone());
        cfg.rate_limit_bytes_per_sec = spec.rate_limit_bytes_per_sec;
        cfg.quota_controller = self.quota_controller.clone();
        cfg.cloud_control = self.cloud_control.clone();

        let bridge = Bridge::new(cfg);
        bridge.set_source_connection(Some(source)).await;

        let state = WaitingState::new(
            tunnel_id.clone(),
            spec.mapping_id,
            spec.secret_key,
            self.node_id.clone(),
            spec.source_client_id,
            spec.target_client_id,
            spec.target_host,
            spec.target_port,
            Utc::now(),
            chrono::Duration::seconds(DEFAULT_WAITING_TTL_SECS),
        );
        routing.register_waiting_tunnel(&state).await?;

        self.register_and_run(bridge.clone()).await;
        Ok(bridge)
    }

    /// The target-side half of a cross-node splice: looks up
    /// `tunnel_id`'s waiting-tunnel record, dials the real target this
    /// node can reach locally, and dials back to the source node named
    /// in the record. The two resulting connections are stitched
    /// together directly — this node owns neither bridge nor mapping,
    /// it is purely relaying the second hop. Consumes the waiting
    /// record on success so a retry can't splice it twice.
    pub async fn splice_remote_target(self: &Arc<Self>, tunnel_id: &str, protocol: &str, server_name: &str) -> Result<(), SessionError> {
        let routing = self.routing.clone().ok_or(SessionError::RoutingNotConfigured)?;
        let waiting = routing.lookup_waiting_tunnel(tunnel_id, Utc::now()).await?;

        let target_addr = resolve_addr(&waiting.target_host, waiting.target_port).await?;
        let target_conn = self.factory.dial(protocol, target_addr, server_name, &self.cancel).await?;

        let source_addr_str = routing.get_node_address(&waiting.source_node_id).await?;
        let source_addr: SocketAddr = source_addr_str
            .parse()
            .map_err(|_| SessionError::InvalidNodeAddress(source_addr_str))?;
        let link_conn = self.factory.dial(protocol, source_addr, server_name, &self.cancel).await?;

        routing.remove_waiting_tunnel(tunnel_id).await;

        info!(tunnel_id, source_node_id = waiting.source_node_id.as_str(), "splicing cross-node target");
        tokio::spawn(relay_until_closed(target_conn, link_conn));
        Ok(())
    }

    /// The source-side half of a cross-node splice: called once the
    /// other node has dialed back and presented `tunnel_id`, claiming
    /// the bridge this node published via [`Self::open_waiting_tunnel`].
    /// Attaches `link_stream` as the bridge's [`RelayedCrossNodeConnection`]
    /// and signals the bridge ready.
    pub async fn attach_cross_node_link(
        self: &Arc<Self>,
        tunnel_id: &str,
        node_id: impl Into<String>,
        link_protocol: &str,
        link_stream: BoxedStream,
    ) -> Result<(), SessionError> {
        let bridge = self
            .bridge(tunnel_id)
            .await
            .ok_or_else(|| SessionError::UnknownTunnel(tunnel_id.to_string()))?;

        let link = TunnelConnection::new(format!("{tunnel_id}-link"), link_protocol, link_stream);
        let handle = RelayedCrossNodeConnection::spawn(node_id, bridge.clone(), link);
        bridge.set_cross_node_connection(handle).await;
        bridge.notify_target_ready();
        Ok(())
    }

    async fn register_and_run(self: &Arc<Self>, bridge: Arc<Bridge>) {
        let tunnel_id = bridge.tunnel_id().to_string();
        self.bridges.write().await.insert(tunnel_id.clone(), bridge.clone());
        info!(tunnel_id = tunnel_id.as_str(), "bridge opened");

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.start().await {
                warn!(tunnel_id = bridge.tunnel_id(), error = %e, "bridge run loop ended with an error");
            }
            manager.bridges.write().await.remove(bridge.tunnel_id());
        });
    }

    pub async fn bridge(&self, tunnel_id: &str) -> Option<Arc<Bridge>> {
        self.bridges.read().await.get(tunnel_id).cloned()
    }

    /// Installs a freshly dialed connection as an existing bridge's
    /// source — the call a reconnect loop makes once it has a new
    /// connection in hand.
    pub async fn set_source(&self, tunnel_id: &str, conn: TunnelConnection) -> Result<(), SessionError> {
        let bridge = self.bridge(tunnel_id).await.ok_or_else(|| SessionError::UnknownTunnel(tunnel_id.to_string()))?;
        bridge.set_source_connection(Some(conn)).await;
        Ok(())
    }

    pub async fn close_tunnel(&self, tunnel_id: &str) -> Result<(), SessionError> {
        let bridge = self.bridge(tunnel_id).await.ok_or_else(|| SessionError::UnknownTunnel(tunnel_id.to_string()))?;
        bridge.close().await.map_err(SessionError::Bridge)
    }

    pub async fn active_tunnel_count(&self) -> usize {
        self.bridges.read().await.len()
    }
}

/// Resolves a `(host, port)` pair the way a dial target needs it —
/// `SocketAddr` — deferring to the system resolver for anything that
/// isn't already a literal address.
async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, SessionError> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SessionError::TargetResolution(format!("{host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| SessionError::TargetResolution(format!("{host}:{port}: no addresses")))
}

/// Stitches two already-dialed connections together until either side
/// closes. Used by [`SessionManager::splice_remote_target`], which owns
/// neither connection's bridge — there is nothing here to account
/// traffic against, just two forwarders relaying bytes at each other.
async fn relay_until_closed(a: TunnelConnection, b: TunnelConnection) {
    let a_fwd = a.forwarder();
    let b_fwd = b.forwarder();

    let a_to_b = {
        let (a_fwd, b_fwd) = (a_fwd.clone(), b_fwd.clone());
        tokio::spawn(async move { copy_until_eof(a_fwd, b_fwd).await })
    };
    let b_to_a = tokio::spawn(async move { copy_until_eof(b_fwd, a_fwd).await });

    let _ = tokio::join!(a_to_b, b_to_a);
    let _ = a.close().await;
    let _ = b.close().await;
}

async fn copy_until_eof(from: Arc<dyn tunnox_connection::Forwarder>, to: Arc<dyn tunnox_connection::Forwarder>) {
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        match from.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if to.write(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAllAuthenticator;
    use async_trait::async_trait;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
    use tunnox_connection::ConnectionError;
    use tunnox_transport::{ConnectionStats, TunnelStream};

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

    #[derive(Default)]
    struct StubFactory;

    #[async_trait]
    impl TunnelConnectionFactory for StubFactory {
        async fn dial(
            &self,
            protocol: &str,
            _addr: SocketAddr,
            _server_name: &str,
            _cancel: &CancellationToken,
        ) -> Result<TunnelConnection, ConnectionError> {
            let (near, _far) = tokio::io::duplex(4096);
            let boxed: BoxedStream = Box::pin(TestStream(near));
            Ok(TunnelConnection::new("target", protocol, boxed))
        }
    }

    fn stub_manager() -> Arc<SessionManager> {
        SessionManager::new(Arc::new(StubFactory), Arc::new(AllowAllAuthenticator)).into_shared()
    }

    #[derive(Default)]
    struct CancelAwareFactory;

    #[async_trait]
    impl TunnelConnectionFactory for CancelAwareFactory {
        async fn dial(
            &self,
            protocol: &str,
            _addr: SocketAddr,
            _server_name: &str,
            cancel: &CancellationToken,
        ) -> Result<TunnelConnection, ConnectionError> {
            if cancel.is_cancelled() {
                return Err(ConnectionError::ProtocolNotAvailable(protocol.to_string()));
            }
            let (near, _far) = tokio::io::duplex(4096);
            let boxed: BoxedStream = Box::pin(TestStream(near));
            Ok(TunnelConnection::new("target", protocol, boxed))
        }
    }

    #[tokio::test]
    async fn shutdown_cancels_dials_issued_afterwards() {
        let manager = SessionManager::new(Arc::new(CancelAwareFactory), Arc::new(AllowAllAuthenticator)).into_shared();
        manager.shutdown();

        let (near, _far) = tokio::io::duplex(4096);
        let source: BoxedStream = Box::pin(TestStream(near));
        let target = TargetSpec {
            protocol: "stub".into(),
            addr: "127.0.0.1:1".parse().unwrap(),
            server_name: String::new(),
            mapping_id: None,
            rate_limit_bytes_per_sec: None,
        };

        let err = manager.open_local_tunnel("t-shutdown", "stub", source, target).await.unwrap_err();
        assert!(matches!(err, SessionError::Connection(_)));
    }

    #[tokio::test]
    async fn open_local_tunnel_registers_and_deregisters_on_completion() {
        let manager = stub_manager();
        let (near, _far) = tokio::io::duplex(4096);
        let source: BoxedStream = Box::pin(TestStream(near));

        let target = TargetSpec {
            protocol: "stub".into(),
            addr: "127.0.0.1:1".parse().unwrap(),
            server_name: String::new(),
            mapping_id: None,
            rate_limit_bytes_per_sec: None,
        };

        let bridge = manager.open_local_tunnel("t-1", "stub", source, target).await.unwrap();
        assert!(manager.bridge(bridge.tunnel_id()).await.is_some());
        assert_eq!(manager.active_tunnel_count().await, 1);
    }

    #[tokio::test]
    async fn set_source_on_unknown_tunnel_is_an_error() {
        let manager = stub_manager();
        let (near, _far) = tokio::io::duplex(4096);
        let boxed: BoxedStream = Box::pin(TestStream(near));
        let conn = TunnelConnection::new("x", "stub", boxed);

        let err = manager.set_source("ghost", conn).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownTunnel(_)));
    }

    /// End-to-end cross-node splice: a source-side manager publishes a
    /// waiting tunnel, a target-side manager resolves and relays it,
    /// and the source-side manager attaches the dial-back as the
    /// bridge's `CrossNodeConnection` — exercising `Bridge::start`'s
    /// cross-node branch, not just the routing table in isolation.
    #[tokio::test]
    async fn cross_node_splice_routes_through_waiting_tunnel_table() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tunnox_router::InMemoryKvStore;

        let routing = Arc::new(RoutingTable::new(Arc::new(InMemoryKvStore::new())));
        routing.register_node_address("node-a", "127.0.0.1:1").await.unwrap();

        let manager_a =
            SessionManager::new(Arc::new(StubFactory), Arc::new(AllowAllAuthenticator))
                .with_routing(routing.clone(), "node-a")
                .into_shared();
        let manager_b =
            SessionManager::new(Arc::new(StubFactory), Arc::new(AllowAllAuthenticator))
                .with_routing(routing.clone(), "node-b")
                .into_shared();

        let (near, mut source_peer) = tokio::io::duplex(4096);
        let source_stream: BoxedStream = Box::pin(TestStream(near));

        let spec = WaitingTunnelSpec {
            mapping_id: "m-cross".into(),
            secret_key: "secret".into(),
            source_client_id: 1,
            target_client_id: 2,
            target_host: "127.0.0.1".into(),
            target_port: 1,
            rate_limit_bytes_per_sec: None,
        };
        let bridge = manager_a.open_waiting_tunnel("t-cross", "stub", source_stream, spec).await.unwrap();
        assert_eq!(bridge.state(), tunnox_bridge::BridgeState::WaitingForTarget);

        // Target-side node resolves the waiting record and relays its
        // half; the record is consumed so a second attempt can't reuse it.
        manager_b.splice_remote_target("t-cross", "stub", "").await.unwrap();
        let err = routing.lookup_waiting_tunnel("t-cross", Utc::now()).await.unwrap_err();
        assert!(matches!(err, tunnox_router::RoutingError::NotFound));

        // Source-side node now gets the dial-back claiming the tunnel.
        let (link, mut link_peer) = tokio::io::duplex(4096);
        let link_stream: BoxedStream = Box::pin(TestStream(link));
        manager_a.attach_cross_node_link("t-cross", "node-b", "stub", link_stream).await.unwrap();

        source_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        link_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        link_peer.write_all(b"pong!").await.unwrap();
        let mut buf2 = [0u8; 5];
        source_peer.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf2, b"pong!");
    }
}
