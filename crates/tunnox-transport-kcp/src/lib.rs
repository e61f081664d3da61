//! KCP (reliable UDP) transport adapter, multiplexed with yamux.
//!
//! Grounded on the `rfrp` tunnel's KCP adapter: one `yamux::Connection`
//! per KCP session, driven by a background task that repeatedly polls
//! `poll_next_inbound`/`poll_new_outbound` so opening and accepting
//! streams never deadlock against each other. Since every tunnel needs
//! exactly one stream per connection here, each dialed/accepted
//! connection opens (or accepts) a single yamux stream and the
//! connection's driver task is dropped once it's handed over — still
//! alive via the stream's own `Arc`, not the connection wrapper.
//!
//! Fixed KCP tuning per the data-plane's latency requirements: no FEC
//! (not implemented by `tokio-kcp`), 1024-packet send/receive windows,
//! nodelay mode with a 10ms flush interval, fast-resend at 2 ACKs, normal
//! (non-throttled) congestion control disabled, 1400-byte MTU, ACK
//! piggybacking disabled.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context as TaskContext, Poll};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio_kcp::{KcpConfig, KcpListener as TokioKcpListener, KcpNoDelayConfig, KcpStream};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tunnox_transport::{
    BoxedStream, ConnectionStats, Dialer, Listener, TransportError, TransportResult, TunnelStream,
};
use yamux::{Config as YamuxConfig, Connection as YamuxConnection, Mode, Stream as YamuxStream};

#[derive(Debug, Error)]
enum KcpError {
    #[error("kcp error: {0}")]
    Kcp(#[from] tokio_kcp::KcpError),

    #[error("yamux driver unavailable")]
    DriverGone,
}

impl From<KcpError> for TransportError {
    fn from(e: KcpError) -> Self {
        TransportError::Connection(e.to_string())
    }
}

fn kcp_config() -> KcpConfig {
    let mut config = KcpConfig::default();
    config.mtu = 1400;
    config.wnd_size = (1024, 1024);
    config.nodelay = KcpNoDelayConfig {
        nodelay: true,
        interval: 10,
        resend: 2,
        nc: true,
    };
    config.stream = false;
    config
}

type CompatKcpStream = Compat<KcpStream>;

struct OutboundRequest {
    response_tx: oneshot::Sender<Result<YamuxStream, KcpError>>,
}

/// Drives one KCP connection's yamux multiplexer until the connection
/// closes or all handles are dropped.
async fn run_driver(
    mut connection: YamuxConnection<CompatKcpStream>,
    inbound_tx: mpsc::Sender<YamuxStream>,
    mut outbound_rx: mpsc::Receiver<OutboundRequest>,
) {
    let mut pending: Vec<OutboundRequest> = Vec::new();

    std::future::poll_fn(|cx: &mut TaskContext<'_>| {
        loop {
            match connection.poll_next_inbound(cx) {
                Poll::Ready(Some(Ok(stream))) => {
                    if inbound_tx.try_send(stream).is_err() {
                        warn!("kcp yamux driver: inbound channel full or closed");
                    }
                    continue;
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => return Poll::Ready(()),
                Poll::Pending => break,
            }
        }

        while let Poll::Ready(Some(req)) = outbound_rx.poll_recv(cx) {
            pending.push(req);
        }

        while !pending.is_empty() {
            match connection.poll_new_outbound(cx) {
                Poll::Ready(Ok(stream)) => {
                    let req = pending.remove(0);
                    let _ = req.response_tx.send(Ok(stream));
                }
                Poll::Ready(Err(e)) => {
                    let req = pending.remove(0);
                    let _ = req.response_tx.send(Err(KcpError::Kcp(
                        tokio_kcp::KcpError::IoError(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            e.to_string(),
                        )),
                    )));
                }
                Poll::Pending => break,
            }
        }

        if outbound_rx.is_closed() && pending.is_empty() && inbound_tx.is_closed() {
            return Poll::Ready(());
        }

        Poll::Pending
    })
    .await;

    debug!("kcp yamux driver ended");
}

struct Driver {
    outbound_tx: mpsc::Sender<OutboundRequest>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<YamuxStream>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Driver {
    fn spawn(stream: KcpStream, is_client: bool) -> Self {
        let compat = stream.compat();
        let mode = if is_client { Mode::Client } else { Mode::Server };
        let connection = YamuxConnection::new(compat, YamuxConfig::default(), mode);

        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_driver(connection, inbound_tx, outbound_rx));

        Self {
            outbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            _handle: handle,
        }
    }

    async fn open_stream(&self) -> Result<YamuxStream, KcpError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.outbound_tx
            .send(OutboundRequest { response_tx })
            .await
            .map_err(|_| KcpError::DriverGone)?;
        response_rx.await.map_err(|_| KcpError::DriverGone)?
    }

    async fn accept_stream(&self) -> Result<YamuxStream, KcpError> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await.ok_or(KcpError::DriverGone)
    }
}

pub struct KcpTunnelStream {
    inner: tokio_util::compat::Compat<YamuxStream>,
    peer_addr: SocketAddr,
    connection_id: String,
    // Keeps the yamux driver task's channels alive for this stream's
    // lifetime; dropped together with the stream.
    _driver: Driver,
}

impl fmt::Debug for KcpTunnelStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KcpTunnelStream")
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl tokio::io::AsyncRead for KcpTunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for KcpTunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl TunnelStream for KcpTunnelStream {
    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn connection_id(&self) -> String {
        self.connection_id.clone()
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats::default()
    }
}

async fn bind_udp(local_addr: SocketAddr) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(local_addr).await
}

#[derive(Debug, Default)]
pub struct KcpDialer;

#[async_trait]
impl Dialer for KcpDialer {
    async fn dial(
        &self,
        addr: SocketAddr,
        _server_name: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<BoxedStream> {
        let local_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = bind_udp(local_addr).await.map_err(TransportError::Io)?;
        let kcp_stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Connection("dial cancelled".into())),
            result = KcpStream::connect_with_socket(&kcp_config(), socket, addr) => {
                result.map_err(|e| TransportError::Connection(e.to_string()))?
            }
        };

        let driver = Driver::spawn(kcp_stream, true);
        let yamux_stream = driver.open_stream().await.map_err(TransportError::from)?;

        Ok(Box::pin(KcpTunnelStream {
            inner: TokioAsyncReadCompatExt::compat(yamux_stream),
            peer_addr: addr,
            connection_id: format!("kcp-{addr}"),
            _driver: driver,
        }))
    }

    fn name(&self) -> &str {
        "kcp"
    }
}

#[derive(Debug)]
pub struct KcpListenerAdapter {
    listener: tokio::sync::Mutex<TokioKcpListener>,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl KcpListenerAdapter {
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let socket = bind_udp(addr).await.map_err(TransportError::Io)?;
        let local_addr = socket.local_addr().map_err(TransportError::Io)?;
        let listener = TokioKcpListener::from_socket(kcp_config(), socket)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            listener: tokio::sync::Mutex::new(listener),
            local_addr,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Listener for KcpListenerAdapter {
    async fn accept(&self) -> TransportResult<(BoxedStream, SocketAddr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::StreamClosed);
        }
        let (kcp_stream, peer_addr) = {
            let mut listener = self.listener.lock().await;
            listener.accept().await.map_err(|e| TransportError::Connection(e.to_string()))?
        };

        let driver = Driver::spawn(kcp_stream, false);
        let yamux_stream = driver.accept_stream().await.map_err(TransportError::from)?;

        let boxed: BoxedStream = Box::pin(KcpTunnelStream {
            inner: TokioAsyncReadCompatExt::compat(yamux_stream),
            peer_addr,
            connection_id: format!("kcp-{peer_addr}"),
            _driver: driver,
        });
        Ok((boxed, peer_addr))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_after_close_returns_stream_closed() {
        let listener = KcpListenerAdapter::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        listener.close().await;
        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed));
    }

    #[tokio::test]
    async fn dial_honours_cancellation() {
        let dialer = KcpDialer;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err = dialer.dial(addr, "", &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
