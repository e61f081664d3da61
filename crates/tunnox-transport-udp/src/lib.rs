//! Raw UDP transport adapter.
//!
//! One socket accepts datagrams from many peers; each distinct peer
//! address becomes its own virtual session (grounded on the
//! `PocketRelay-Server` tunnel service's `recv_from` demux loop, which
//! keys in-flight tunnels by the packet's source address). A session is
//! evicted after 30 seconds of inactivity — the same budget the bridge
//! gives a waiting tunnel, and reset on every byte this adapter moves so
//! the two timers stay in lockstep (see DESIGN.md's Open Question
//! decision on UDP session lifetime).

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tunnox_transport::{BoxedStream, ConnectionStats, Dialer, Listener, TransportError, TransportResult};

/// Inactivity budget before a peer's session is dropped, aligned with the
/// bridge's waiting-tunnel TTL.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const MAX_DATAGRAM: usize = 65_507;
const SESSION_QUEUE_DEPTH: usize = 256;

struct Session {
    inbound_tx: mpsc::Sender<Bytes>,
    last_seen_ms: Arc<AtomicI64>,
}

fn touch(last_seen_ms: &AtomicI64, epoch: Instant) {
    last_seen_ms.store(epoch.elapsed().as_millis() as i64, Ordering::Relaxed);
}

pub struct UdpTunnelStream {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    inbound_rx: mpsc::Receiver<Bytes>,
    last_seen_ms: Arc<AtomicI64>,
    epoch: Instant,
    leftover: bytes::BytesMut,
}

impl fmt::Debug for UdpTunnelStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTunnelStream").field("peer_addr", &self.peer_addr).finish()
    }
}

impl AsyncRead for UdpTunnelStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if !self.leftover.is_empty() {
            let n = std::cmp::min(buf.remaining(), self.leftover.len());
            buf.put_slice(&self.leftover[..n]);
            let _ = self.leftover.split_to(n);
            return Poll::Ready(Ok(()));
        }

        match self.inbound_rx.poll_recv(cx) {
            Poll::Ready(Some(data)) => {
                touch(&self.last_seen_ms, self.epoch);
                let n = std::cmp::min(buf.remaining(), data.len());
                buf.put_slice(&data[..n]);
                if n < data.len() {
                    self.leftover.extend_from_slice(&data[n..]);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for UdpTunnelStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match this.socket.poll_send_to(cx, buf, this.peer_addr) {
            Poll::Ready(Ok(n)) => {
                touch(&this.last_seen_ms, this.epoch);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl tunnox_transport::TunnelStream for UdpTunnelStream {
    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn connection_id(&self) -> String {
        format!("udp-{}", self.peer_addr)
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats::default()
    }
}

#[derive(Debug)]
pub struct UdpListenerAdapter {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<(BoxedStream, SocketAddr)>>,
    closed: AtomicBool,
}

impl UdpListenerAdapter {
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await.map_err(TransportError::Io)?);
        let local_addr = socket.local_addr().map_err(TransportError::Io)?;

        let sessions: Arc<DashMap<SocketAddr, Session>> = Arc::new(DashMap::new());
        let (accept_tx, accept_rx) = mpsc::channel(64);
        let epoch = Instant::now();

        tokio::spawn(recv_loop(socket.clone(), sessions.clone(), accept_tx, epoch));
        tokio::spawn(sweep_loop(sessions, epoch));

        debug!(%local_addr, "udp listener bound");
        Ok(Self {
            socket,
            local_addr,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            closed: AtomicBool::new(false),
        })
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    sessions: Arc<DashMap<SocketAddr, Session>>,
    accept_tx: mpsc::Sender<(BoxedStream, SocketAddr)>,
    epoch: Instant,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, peer_addr) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "udp recv failed");
                continue;
            }
        };
        let data = Bytes::copy_from_slice(&buf[..n]);

        if let Some(session) = sessions.get(&peer_addr) {
            touch(&session.last_seen_ms, epoch);
            if session.inbound_tx.try_send(data).is_err() {
                warn!(%peer_addr, "udp session queue full, dropping datagram");
            }
            continue;
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let last_seen_ms = Arc::new(AtomicI64::new(epoch.elapsed().as_millis() as i64));
        sessions.insert(
            peer_addr,
            Session {
                inbound_tx: inbound_tx.clone(),
                last_seen_ms: last_seen_ms.clone(),
            },
        );

        let _ = inbound_tx.try_send(data);

        let stream = UdpTunnelStream {
            socket: socket.clone(),
            peer_addr,
            inbound_rx,
            last_seen_ms,
            epoch,
            leftover: bytes::BytesMut::new(),
        };
        let boxed: BoxedStream = Box::pin(stream);
        if accept_tx.send((boxed, peer_addr)).await.is_err() {
            break;
        }
    }
}

async fn sweep_loop(sessions: Arc<DashMap<SocketAddr, Session>>, epoch: Instant) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let now_ms = epoch.elapsed().as_millis() as i64;
        let timeout_ms = SESSION_IDLE_TIMEOUT.as_millis() as i64;
        sessions.retain(|addr, session| {
            let idle = now_ms - session.last_seen_ms.load(Ordering::Relaxed);
            let keep = idle < timeout_ms;
            if !keep {
                debug!(%addr, "evicting idle udp session");
            }
            keep
        });
    }
}

#[async_trait]
impl Listener for UdpListenerAdapter {
    async fn accept(&self) -> TransportResult<(BoxedStream, SocketAddr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::StreamClosed);
        }
        let mut rx = self.accept_rx.lock().await;
        rx.recv().await.ok_or_else(|| TransportError::Connection("udp listener closed".into()))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct UdpDialer;

#[async_trait]
impl Dialer for UdpDialer {
    async fn dial(
        &self,
        addr: SocketAddr,
        _server_name: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<BoxedStream> {
        if cancel.is_cancelled() {
            return Err(TransportError::Connection("dial cancelled".into()));
        }
        let local_addr: SocketAddr = if addr.is_ipv4() { "0.0.0.0:0".parse().unwrap() } else { "[::]:0".parse().unwrap() };
        let socket = Arc::new(UdpSocket::bind(local_addr).await.map_err(TransportError::Io)?);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Connection("dial cancelled".into())),
            result = socket.connect(addr) => result.map_err(TransportError::Io)?,
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let epoch = Instant::now();
        let last_seen_ms = Arc::new(AtomicI64::new(0));

        let reader_socket = socket.clone();
        let reader_last_seen = last_seen_ms.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match reader_socket.recv(&mut buf).await {
                    Ok(n) => {
                        touch(&reader_last_seen, epoch);
                        if inbound_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Box::pin(UdpTunnelStream {
            socket,
            peer_addr: addr,
            inbound_rx,
            last_seen_ms,
            epoch,
            leftover: bytes::BytesMut::new(),
        }))
    }

    fn name(&self) -> &str {
        "udp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn client_and_server_exchange_datagrams() {
        let listener = UdpListenerAdapter::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = UdpDialer;
        let mut client = dialer
            .dial(addr, "", &CancellationToken::new())
            .await
            .unwrap();
        client.write_all(b"ping").await.unwrap();

        let (mut server_side, _peer) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4];
        server_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server_side.write_all(b"pong").await.unwrap();
        let mut resp = [0u8; 4];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(&resp, b"pong");
    }

    #[tokio::test]
    async fn accept_after_close_returns_stream_closed() {
        let listener = UdpListenerAdapter::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        listener.close().await;
        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed));
    }

    #[tokio::test]
    async fn dial_honours_cancellation() {
        let dialer = UdpDialer;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = dialer.dial(addr, "", &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
