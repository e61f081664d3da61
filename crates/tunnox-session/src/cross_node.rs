//! The concrete [`CrossNodeConnection`] this session layer hands a
//! bridge once its target has been resolved to a different node: a
//! single dialed link to that node, pumped by two tasks that drive the
//! bridge's counters and source forwarder directly since `Bridge::start`
//! skips its own pumps entirely once a cross-node handle is attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tunnox_bridge::{Bridge, CrossNodeConnection};
use tunnox_connection::{Forwarder, TunnelConnection};

const RELAY_BUFFER_BYTES: usize = 32 * 1024;

/// Owns the link to the node actually holding the target and drives
/// both copy directions against the bridge's source forwarder and
/// counters. `source -> link` gives up silently on source EOF (the
/// bridge may still be reused by a reconnect); `link -> source` closes
/// the bridge on EOF or a write failure, same as the bridge's own
/// target-to-source pump does for a same-node target.
pub struct RelayedCrossNodeConnection {
    node_id: String,
    cancel: CancellationToken,
    released: AtomicBool,
    link_forwarder: Arc<dyn Forwarder>,
}

impl RelayedCrossNodeConnection {
    /// Spawns the two pump directions and returns the handle to attach
    /// via [`Bridge::set_cross_node_connection`]. The bridge's source
    /// connection must already be set; `link` is the stream reaching
    /// the other node.
    pub fn spawn(node_id: impl Into<String>, bridge: Arc<Bridge>, link: TunnelConnection) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let link_forwarder = link.forwarder();

        tokio::spawn(pump_to_link(bridge.clone(), link_forwarder.clone(), cancel.clone()));
        tokio::spawn(pump_from_link(bridge, link_forwarder.clone(), cancel.clone()));

        Arc::new(Self {
            node_id: node_id.into(),
            cancel,
            released: AtomicBool::new(false),
            link_forwarder,
        })
    }
}

async fn pump_to_link(bridge: Arc<Bridge>, link: Arc<dyn Forwarder>, cancel: CancellationToken) {
    let counter = bridge.bytes_sent_handle();
    let mut buf = vec![0u8; RELAY_BUFFER_BYTES];
    loop {
        let Some(source) = bridge.source_forwarder_for_relay().await else { return };
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = source.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if link.write(&buf[..n]).await.is_err() {
                        return;
                    }
                    counter.add(n as u64);
                }
            },
        }
    }
}

async fn pump_from_link(bridge: Arc<Bridge>, link: Arc<dyn Forwarder>, cancel: CancellationToken) {
    let counter = bridge.bytes_received_handle();
    let mut buf = vec![0u8; RELAY_BUFFER_BYTES];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = link.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    let _ = bridge.close().await;
                    return;
                }
                Ok(n) => {
                    let Some(source) = bridge.source_forwarder_for_relay().await else {
                        let _ = bridge.close().await;
                        return;
                    };
                    if source.write(&buf[..n]).await.is_err() {
                        let _ = bridge.close().await;
                        return;
                    }
                    counter.add(n as u64);
                }
            },
        }
    }
}

#[async_trait]
impl CrossNodeConnection for RelayedCrossNodeConnection {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
            let _ = self.link_forwarder.close().await;
            debug!(node_id = self.node_id.as_str(), "cross-node link released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
    use tunnox_bridge::BridgeConfig;
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

    fn tunnel_pair(id: &str) -> (TunnelConnection, DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        let boxed: BoxedStream = Box::pin(TestStream(near));
        (TunnelConnection::new(id, "test", boxed), far)
    }

    #[tokio::test]
    async fn relays_both_directions_and_drives_bridge_counters() {
        let bridge = Bridge::new(BridgeConfig::new("t-cross"));
        let (source, mut source_peer) = tunnel_pair("source");
        bridge.set_source_connection(Some(source)).await;

        let (link, mut link_peer) = tunnel_pair("link");
        let handle = RelayedCrossNodeConnection::spawn("node-b", bridge.clone(), link);
        bridge.set_cross_node_connection(handle.clone()).await;
        bridge.notify_target_ready();

        source_peer.write_all(b"outbound").await.unwrap();
        let mut buf = [0u8; 8];
        link_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"outbound");

        link_peer.write_all(b"inbound!").await.unwrap();
        let mut buf2 = [0u8; 8];
        source_peer.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf2, b"inbound!");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(bridge.bytes_sent(), 8);
        assert_eq!(bridge.bytes_received(), 8);
        assert_eq!(handle.node_id(), "node-b");
    }

    #[tokio::test]
    async fn link_eof_closes_the_bridge() {
        let bridge = Bridge::new(BridgeConfig::new("t-cross-eof"));
        let (source, _source_peer) = tunnel_pair("source");
        bridge.set_source_connection(Some(source)).await;

        let (link, link_peer) = tunnel_pair("link");
        let handle = RelayedCrossNodeConnection::spawn("node-b", bridge.clone(), link);
        bridge.set_cross_node_connection(handle).await;
        bridge.notify_target_ready();

        drop(link_peer);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(bridge.state(), tunnox_bridge::BridgeState::Closed);
    }
}
