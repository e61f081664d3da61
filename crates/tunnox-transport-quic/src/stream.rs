//! A single QUIC bidirectional stream, wrapped as a [`TunnelStream`].

use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tunnox_transport::{ConnectionStats, TunnelStream};

pub struct QuicTunnelStream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    peer_addr: SocketAddr,
    connection_id: String,
}

impl QuicTunnelStream {
    pub(crate) fn new(
        send: quinn::SendStream,
        recv: quinn::RecvStream,
        peer_addr: SocketAddr,
        stable_id: usize,
    ) -> Self {
        Self {
            send,
            recv,
            peer_addr,
            connection_id: format!("quic-{stable_id}"),
        }
    }
}

impl fmt::Debug for QuicTunnelStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuicTunnelStream")
            .field("peer_addr", &self.peer_addr)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

impl AsyncRead for QuicTunnelStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for QuicTunnelStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().send).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().send).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().send).poll_shutdown(cx)
    }
}

impl TunnelStream for QuicTunnelStream {
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
