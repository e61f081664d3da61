//! Plain TCP transport adapter.
//!
//! Grounded on the teacher's raw-socket bind path
//! (`localup-server-tcp-proxy/src/server.rs`): `socket2` is used only to
//! set `SO_REUSEADDR` before handing the socket to Tokio, since
//! `tokio::net::TcpListener` has no direct way to request it. Per-socket
//! tuning (`TCP_NODELAY`, 512 KiB send/recv buffers) applies to every
//! accepted and dialed stream.

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tunnox_transport::{
    BoxedStream, ConnectionStats, Dialer, Listener, TransportError, TransportResult, TunnelStream,
};

/// Socket buffer size applied to every TCP stream this adapter creates.
const SOCKET_BUFFER_BYTES: usize = 512 * 1024;
const LISTEN_BACKLOG: i32 = 128;
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

fn tune(socket: &Socket) -> io::Result<()> {
    socket.set_nodelay(true)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_BYTES)?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_BYTES)?;
    socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
    Ok(())
}

pub struct TcpTunnelStream {
    inner: TcpStream,
    peer_addr: SocketAddr,
    connection_id: String,
}

impl fmt::Debug for TcpTunnelStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTunnelStream")
            .field("peer_addr", &self.peer_addr)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

impl AsyncRead for TcpTunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTunnelStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl TunnelStream for TcpTunnelStream {
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

fn accepted_std_stream(stream: TcpStream, peer_addr: SocketAddr) -> TransportResult<BoxedStream> {
    let socket = Socket::from(stream.into_std()?);
    tune(&socket)?;
    let std_stream: std::net::TcpStream = socket.into();
    std_stream.set_nonblocking(true)?;
    let stream = TcpStream::from_std(std_stream)?;

    Ok(Box::pin(TcpTunnelStream {
        inner: stream,
        peer_addr,
        connection_id: format!("tcp-{peer_addr}"),
    }))
}

#[derive(Debug)]
pub struct TcpListenerAdapter {
    listener: TokioTcpListener,
    closed: AtomicBool,
}

impl TcpListenerAdapter {
    /// Binds with `SO_REUSEADDR` set, so a restart doesn't fail on a
    /// socket still draining `TIME_WAIT`.
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::Io)?;
        socket.set_reuse_address(true).map_err(TransportError::Io)?;
        tune(&socket).map_err(TransportError::Io)?;
        socket.bind(&addr.into()).map_err(|e| {
            TransportError::Connection(format!("bind {addr} failed: {e}"))
        })?;
        socket.listen(LISTEN_BACKLOG).map_err(TransportError::Io)?;
        socket.set_nonblocking(true).map_err(TransportError::Io)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TokioTcpListener::from_std(std_listener).map_err(TransportError::Io)?;
        info!(%addr, "tcp listener bound");
        Ok(Self {
            listener,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Listener for TcpListenerAdapter {
    async fn accept(&self) -> TransportResult<(BoxedStream, SocketAddr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::StreamClosed);
        }
        let (stream, peer_addr) = self.listener.accept().await.map_err(TransportError::Io)?;
        debug!(%peer_addr, "tcp connection accepted");
        let boxed = accepted_std_stream(stream, peer_addr)?;
        Ok((boxed, peer_addr))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) {
        // TcpListener has no explicit close; dropping it stops new accepts.
        // The flag makes a closed listener's accept() fail fast instead of
        // relying on the caller to drop the Arc.
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(
        &self,
        addr: SocketAddr,
        _server_name: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<BoxedStream> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Connection("dial cancelled".into())),
            result = TcpStream::connect(addr) => result.map_err(TransportError::Io)?,
        };
        let peer_addr = stream.peer_addr().map_err(TransportError::Io)?;
        accepted_std_stream(stream, peer_addr)
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn round_trips_bytes_over_loopback() {
        let listener = TcpListenerAdapter::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(b"world").await.unwrap();
        });

        let dialer = TcpDialer;
        let mut client = dialer
            .dial(addr, "", &CancellationToken::new())
            .await
            .unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut resp = [0u8; 5];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(&resp, b"world");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn accept_after_close_returns_stream_closed() {
        let listener = TcpListenerAdapter::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        listener.close().await;
        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed));
    }

    #[tokio::test]
    async fn dial_honours_cancellation() {
        let dialer = TcpDialer;
        let cancel = CancellationToken::new();
        cancel.cancel();
        // An address nothing listens on; if cancellation weren't honoured
        // this would have to wait out the OS connect timeout instead.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err = dialer.dial(addr, "", &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
