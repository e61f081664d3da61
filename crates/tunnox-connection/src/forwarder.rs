//! The `Read`/`Write`/`Close` contract the bridge's copy pump drives,
//! and the construction rules that pick an implementation for a given
//! connection.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tunnox_transport::BoxedStream;

/// Flat byte-stream contract the bridge's pump drives. `read`/`write`
/// mirror `tokio::io::AsyncRead`/`AsyncWrite` short-read/short-write
/// semantics exactly: a short write is the caller's cue to treat the
/// peer as gone rather than retry.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;
    async fn write(&self, buf: &[u8]) -> std::io::Result<usize>;
    async fn close(&self) -> std::io::Result<()>;
}

/// Construction rule 1 (and, in practice, 2 and 3 as well): every
/// `tunnox-transport` stream already exposes a single `AsyncRead +
/// AsyncWrite` object, so `tokio::io::split` gives a composite
/// reader/writer pair at zero framing cost. The halves are behind a
/// mutex each only so the forwarder can be shared between the two
/// pump directions without unsafe aliasing; under normal operation
/// each mutex has exactly one habitual caller (the read-side pump
/// locks the reader, the write-side pump locks the writer) so there is
/// no real contention.
pub struct CompositeForwarder {
    reader: Mutex<tokio::io::ReadHalf<BoxedStream>>,
    writer: Mutex<tokio::io::WriteHalf<BoxedStream>>,
}

impl CompositeForwarder {
    pub fn new(stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Forwarder for CompositeForwarder {
    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut reader = self.reader.lock().await;
        reader.read(buf).await
    }

    async fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let mut writer = self.writer.lock().await;
        writer.write(buf).await
    }

    async fn close(&self) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

/// Construction rule 4: no stream was available at all. Reads report
/// EOF immediately, writes are silently discarded, close is a no-op —
/// the bridge keeps its lifecycle (waiting, ready signal, close
/// handlers) without ever copying a byte.
#[derive(Debug, Default)]
pub struct NullForwarder;

#[async_trait]
impl Forwarder for NullForwarder {
    async fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }

    async fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    async fn close(&self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs the construction rules in order. Rules 2 and 3 have no
/// distinct representation here because every adapter already
/// satisfies rule 1's "underlying reader/writer pair" directly; they
/// are named in the doc comments above rather than in separate code
/// paths to keep that collapse explicit instead of silent.
pub fn build_forwarder(stream: Option<BoxedStream>) -> Arc<dyn Forwarder> {
    match stream {
        Some(stream) => Arc::new(CompositeForwarder::new(stream)),
        None => Arc::new(NullForwarder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tunnox_transport::{ConnectionStats, TunnelStream};

    #[derive(Debug)]
    struct LoopbackStream {
        data: std::collections::VecDeque<u8>,
    }

    impl AsyncRead for LoopbackStream {
        fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
            let n = std::cmp::min(buf.remaining(), self.data.len());
            for _ in 0..n {
                buf.put_slice(&[self.data.pop_front().unwrap()]);
            }
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for LoopbackStream {
        fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
            self.data.extend(buf.iter().copied());
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl TunnelStream for LoopbackStream {
        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:1".parse().unwrap()
        }
        fn connection_id(&self) -> String {
            "loopback".into()
        }
        fn stats(&self) -> ConnectionStats {
            ConnectionStats::default()
        }
    }

    #[tokio::test]
    async fn composite_forwarder_round_trips_through_split_stream() {
        let stream: BoxedStream = Box::pin(LoopbackStream { data: Default::default() });
        let forwarder = build_forwarder(Some(stream));

        let n = forwarder.write(b"hello").await.unwrap();
        assert_eq!(n, 5);

        let mut buf = [0u8; 5];
        let n = forwarder.read(&mut buf).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn null_forwarder_reads_eof_and_discards_writes() {
        let forwarder = build_forwarder(None);
        let mut buf = [0u8; 4];
        assert_eq!(forwarder.read(&mut buf).await.unwrap(), 0);
        assert_eq!(forwarder.write(b"data").await.unwrap(), 4);
        forwarder.close().await.unwrap();
    }
}
